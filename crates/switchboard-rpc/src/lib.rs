//! Newline-framed JSON-RPC 2.0 correlator.
//!
//! One [`RpcPeer`] per subprocess. The peer owns a writer task that
//! serializes every outbound frame (each line ends with `\n`), an atomic id
//! allocator, and a pending map of one-shot channels keyed by request id.
//!
//! Inbound traffic is classified by [`RpcPeer::dispatch_line`]:
//!
//! - `id` + `result`/`error` → a reply; the matching pending caller is
//!   completed. Unknown ids are logged and dropped.
//! - `id` + `method` → a server-initiated request; handed back to the
//!   caller, which must answer with the same id.
//! - `method` only → a notification.
//!
//! Malformed lines never kill the connection: they are logged at warn and
//! dropped.

use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Errors surfaced to request callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer replied with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
        /// Optional error data.
        data: Option<Value>,
    },
    /// The connection went away before the reply arrived.
    #[error("rpc connection closed")]
    ConnectionClosed,
}

/// Result alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// An inbound message that is not a reply to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server-initiated request; must be answered with the same id.
    Request {
        /// The peer's request id, echoed verbatim in the reply.
        id: Value,
        /// Method name.
        method: String,
        /// Params (null when absent).
        params: Value,
    },
    /// Notification; no reply expected.
    Notification {
        /// Method name.
        method: String,
        /// Params (null when absent).
        params: Value,
    },
}

type PendingMap = Arc<DashMap<u64, oneshot::Sender<RpcResult<Value>>>>;

/// Removes the pending entry when a request future is dropped before its
/// reply arrives, so cancelled callers do not leak map entries.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pending.remove(&self.id);
        }
    }
}

/// A reply not yet awaited. Dropping it removes the pending entry.
pub struct PendingReply {
    rx: oneshot::Receiver<RpcResult<Value>>,
    guard: PendingGuard,
}

impl PendingReply {
    /// Await the reply.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] for error replies;
    /// [`RpcError::ConnectionClosed`] when the connection died first.
    pub async fn wait(mut self) -> RpcResult<Value> {
        let reply = (&mut self.rx).await.map_err(|_| RpcError::ConnectionClosed);
        self.guard.armed = false;
        reply?
    }
}

/// A JSON-RPC 2.0 peer over any byte sink.
///
/// Reading is the owner's job: drain the subprocess stdout line-by-line
/// and feed each line to [`RpcPeer::dispatch_line`].
pub struct RpcPeer {
    next_id: AtomicU64,
    pending: PendingMap,
    writer_tx: mpsc::Sender<String>,
}

impl RpcPeer {
    /// Wrap a writer. Spawns the writer task that owns `writer` and
    /// serializes all outbound frames.
    #[must_use]
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::channel::<String>(64);
        tokio::spawn(write_loop(writer, writer_rx));
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            writer_tx,
        }
    }

    /// Send a request and await its reply.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] when the peer answers with an error object;
    /// [`RpcError::ConnectionClosed`] when the writer or the pending
    /// channel is gone.
    pub async fn request(&self, method: &str, params: Value) -> RpcResult<Value> {
        self.request_detached(method, params).await?.wait().await
    }

    /// Send a request now, defer awaiting the reply.
    ///
    /// The frame is enqueued to the writer before this returns, so call
    /// order is write order; the returned [`PendingReply`] can be awaited
    /// from another task (dropping it cleans up the pending entry).
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] when the writer task is gone.
    pub async fn request_detached(&self, method: &str, params: Value) -> RpcResult<PendingReply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let guard = PendingGuard {
            id,
            pending: Arc::clone(&self.pending),
            armed: true,
        };

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self.send_value(&frame).await.is_err() {
            return Err(RpcError::ConnectionClosed);
        }
        Ok(PendingReply { rx, guard })
    }

    /// Send a notification (no reply expected).
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] when the writer task is gone.
    pub async fn notify(&self, method: &str, params: Value) -> RpcResult<()> {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.send_value(&frame).await
    }

    /// Answer a server-initiated request.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] when the writer task is gone.
    pub async fn reply(&self, id: Value, result: Value) -> RpcResult<()> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.send_value(&frame).await
    }

    /// Answer a server-initiated request with an error.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectionClosed`] when the writer task is gone.
    pub async fn reply_error(&self, id: Value, code: i64, message: &str) -> RpcResult<()> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        });
        self.send_value(&frame).await
    }

    /// Classify one inbound line.
    ///
    /// Replies complete their pending caller and return `None`; requests
    /// and notifications are returned for the owner to handle. Malformed
    /// lines and unknown reply ids are logged and dropped.
    pub fn dispatch_line(&self, line: &str) -> Option<Inbound> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping malformed json-rpc line");
                return None;
            },
        };

        let method = value.get("method").and_then(Value::as_str);
        let id = value.get("id").cloned();

        match (id, method) {
            (Some(id), Some(method)) => Some(Inbound::Request {
                id,
                method: method.to_string(),
                params: value.get("params").cloned().unwrap_or(Value::Null),
            }),
            (None, Some(method)) => Some(Inbound::Notification {
                method: method.to_string(),
                params: value.get("params").cloned().unwrap_or(Value::Null),
            }),
            (Some(id), None) => {
                self.complete_reply(&id, &value);
                None
            },
            (None, None) => {
                warn!("dropping json-rpc line with neither id nor method");
                None
            },
        }
    }

    /// Fail every pending request, e.g. when the subprocess exits.
    pub fn fail_all_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(RpcError::ConnectionClosed));
            }
        }
    }

    /// Number of requests still awaiting replies.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn complete_reply(&self, id: &Value, value: &Value) {
        let Some(id) = id.as_u64() else {
            warn!(?id, "dropping reply with non-numeric id");
            return;
        };
        let Some((_, tx)) = self.pending.remove(&id) else {
            warn!(id, "dropping reply with unknown id");
            return;
        };

        let outcome = if let Some(error) = value.get("error") {
            Err(RpcError::Remote {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                data: error.get("data").cloned(),
            })
        } else {
            Ok(value.get("result").cloned().unwrap_or(Value::Null))
        };

        if tx.send(outcome).is_err() {
            debug!(id, "reply arrived after caller cancelled");
        }
    }

    async fn send_value(&self, frame: &Value) -> RpcResult<()> {
        let line = frame.to_string();
        self.writer_tx
            .send(line)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "rpc writer failed; stopping");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "rpc writer flush failed; stopping");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    async fn read_frame(
        reader: &mut tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
    ) -> Value {
        let line = reader.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn requests_get_monotonic_ids_and_newline_framing() {
        let (ours, theirs) = duplex(4096);
        let peer = Arc::new(RpcPeer::new(ours));
        let mut reader = BufReader::new(theirs).lines();

        let p = Arc::clone(&peer);
        let first = tokio::spawn(async move { p.request("initialize", json!({})).await });
        let frame = read_frame(&mut reader).await;
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["method"], "initialize");

        let p = Arc::clone(&peer);
        let second = tokio::spawn(async move { p.request("thread/start", json!({})).await });
        let frame = read_frame(&mut reader).await;
        assert_eq!(frame["id"], 2);

        // Replies out of order: id 2 first.
        assert!(
            peer.dispatch_line(r#"{"jsonrpc":"2.0","id":2,"result":{"threadId":"t"}}"#)
                .is_none()
        );
        assert!(
            peer.dispatch_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
                .is_none()
        );

        assert_eq!(
            second.await.unwrap().unwrap(),
            json!({"threadId": "t"})
        );
        assert_eq!(first.await.unwrap().unwrap(), json!({}));
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_replies_surface_as_remote_errors() {
        let (ours, theirs) = duplex(4096);
        let peer = Arc::new(RpcPeer::new(ours));
        let mut reader = BufReader::new(theirs).lines();

        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.request("initialize", json!({})).await });
        let _ = read_frame(&mut reader).await;

        peer.dispatch_line(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"no rollout found"}}"#,
        );
        match call.await.unwrap() {
            Err(RpcError::Remote { code, message, .. }) => {
                assert_eq!(code, -1);
                assert_eq!(message, "no rollout found");
            },
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn classifies_requests_and_notifications() {
        let (ours, _theirs) = duplex(4096);
        let peer = RpcPeer::new(ours);

        let inbound = peer
            .dispatch_line(r#"{"jsonrpc":"2.0","id":100,"method":"execCommandApproval","params":{"command":"ls"}}"#)
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Request {
                id: json!(100),
                method: "execCommandApproval".to_string(),
                params: json!({"command": "ls"}),
            }
        );

        let inbound = peer
            .dispatch_line(r#"{"jsonrpc":"2.0","method":"item/started","params":{"item":{}}}"#)
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Notification {
                method: "item/started".to_string(),
                params: json!({"item": {}}),
            }
        );
    }

    #[tokio::test]
    async fn malformed_and_unknown_lines_are_dropped() {
        let (ours, _theirs) = duplex(4096);
        let peer = RpcPeer::new(ours);

        assert!(peer.dispatch_line("this is not json").is_none());
        assert!(peer.dispatch_line("").is_none());
        assert!(peer.dispatch_line(r#"{"jsonrpc":"2.0"}"#).is_none());
        // Reply for an id nobody is waiting on.
        assert!(
            peer.dispatch_line(r#"{"jsonrpc":"2.0","id":999,"result":{}}"#)
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancelled_callers_are_cleaned_up() {
        let (ours, theirs) = duplex(4096);
        let peer = Arc::new(RpcPeer::new(ours));
        let mut reader = BufReader::new(theirs).lines();

        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.request("turn/start", json!({})).await });
        let _ = read_frame(&mut reader).await;
        assert_eq!(peer.pending_count(), 1);

        call.abort();
        let _ = call.await;
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_pending_unblocks_callers() {
        let (ours, theirs) = duplex(4096);
        let peer = Arc::new(RpcPeer::new(ours));
        let mut reader = BufReader::new(theirs).lines();

        let p = Arc::clone(&peer);
        let call = tokio::spawn(async move { p.request("turn/start", json!({})).await });
        let _ = read_frame(&mut reader).await;

        peer.fail_all_pending();
        assert!(matches!(
            call.await.unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn replies_echo_the_peers_id_verbatim() {
        let (ours, theirs) = duplex(4096);
        let peer = RpcPeer::new(ours);
        let mut reader = BufReader::new(theirs).lines();

        peer.reply(json!(100), json!({"decision": "accept"}))
            .await
            .unwrap();
        let frame = read_frame(&mut reader).await;
        assert_eq!(frame["id"], 100);
        assert_eq!(frame["result"]["decision"], "accept");

        peer.reply_error(json!("str-id"), -32601, "method not found")
            .await
            .unwrap();
        let frame = read_frame(&mut reader).await;
        assert_eq!(frame["id"], "str-id");
        assert_eq!(frame["error"]["code"], -32601);
    }
}
