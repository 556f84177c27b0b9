//! WebSocket endpoints.
//!
//! One listener serves both paths: `/ws/browser/<session_id>` for viewers
//! and `/ws/cli/<session_id>` for the Claude-style CLI dialing back. Each
//! connection gets a writer task draining its queue into the socket;
//! browser queues are bounded (a full queue closes the connection with an
//! abnormal code), the CLI queue is not (the CLI is the producer we must
//! never stall).

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};

use switchboard_core::types::SessionId;
use switchboard_protocol::browser::ClientCommand;

use crate::hub::Bridge;

/// Which side of the bridge a socket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// A browser viewer.
    Browser,
    /// The CLI side of a Claude session.
    Cli,
}

/// Parse a request path into its socket kind and session id.
#[must_use]
pub fn parse_ws_path(path: &str) -> Option<(SocketKind, SessionId)> {
    let rest = path.strip_prefix("/ws/")?;
    let (kind, id) = rest.split_once('/')?;
    let kind = match kind {
        "browser" => SocketKind::Browser,
        "cli" => SocketKind::Cli,
        _ => return None,
    };
    let session_id: SessionId = id.parse().ok()?;
    Some((kind, session_id))
}

/// Accept loop. Runs until the listener fails.
pub async fn serve(bridge: Arc<Bridge>, listener: TcpListener) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "websocket accept failed");
                continue;
            },
        };
        debug!(%addr, "incoming websocket connection");
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(bridge, stream).await {
                debug!(%addr, error = %e, "websocket connection ended");
            }
        });
    }
}

async fn handle_connection(
    bridge: Arc<Bridge>,
    stream: TcpStream,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut path = String::new();
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok(response)
    })
    .await?;

    let Some((kind, session_id)) = parse_ws_path(&path) else {
        warn!(path, "rejecting websocket with unroutable path");
        return Ok(());
    };

    match kind {
        SocketKind::Browser => browser_connection(bridge, session_id, ws).await,
        SocketKind::Cli => cli_connection(bridge, session_id, ws).await,
    }
    Ok(())
}

/// Browser side: wait for `session_subscribe`, attach, then route
/// commands until the socket closes.
async fn browser_connection(
    bridge: Arc<Bridge>,
    session_id: SessionId,
    ws: WebSocketStream<TcpStream>,
) {
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(crate::hub::CONN_QUEUE_LIMIT);

    // Writer task: drains the bounded queue. When the hub drops the queue
    // (overflow), close abnormally so the browser reconnects and
    // re-subscribes from its last ack.
    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(Message::text(line)).await.is_err() {
                return;
            }
        }
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Error,
                reason: "write queue overflow".into(),
            })))
            .await;
    });

    // First message must be a subscribe.
    let mut conn_id = None;
    while let Some(message) = source.next().await {
        let Ok(Message::Text(text)) = message else {
            continue;
        };
        match serde_json::from_str::<ClientCommand>(&text) {
            Ok(ClientCommand::SessionSubscribe { last_seq }) => {
                conn_id = Some(
                    bridge
                        .subscribe_browser(session_id, last_seq, tx.clone())
                        .await,
                );
                break;
            },
            Ok(_) => {
                warn!(session = %session_id, "browser sent a command before subscribing");
            },
            Err(e) => {
                warn!(session = %session_id, error = %e, "malformed browser message dropped");
            },
        }
    }
    let Some(conn_id) = conn_id else {
        writer.abort();
        return;
    };
    info!(session = %session_id, conn = conn_id, "browser connected");

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => {
                    bridge
                        .handle_client_command(session_id, conn_id, command)
                        .await;
                },
                Err(e) => {
                    warn!(session = %session_id, error = %e, "malformed browser message dropped");
                },
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {},
        }
    }

    bridge.unsubscribe_browser(session_id, conn_id);
    writer.abort();
    info!(session = %session_id, conn = conn_id, "browser disconnected");
}

/// CLI side: attach the writer, stream NDJSON messages into the adapter,
/// detach on close.
async fn cli_connection(
    bridge: Arc<Bridge>,
    session_id: SessionId,
    ws: WebSocketStream<TcpStream>,
) {
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(Message::text(line)).await.is_err() {
                return;
            }
        }
    });

    bridge.attach_cli(session_id, tx).await;
    info!(session = %session_id, "cli attached");

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => bridge.handle_cli_message(session_id, value).await,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "malformed cli line dropped");
                },
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {},
        }
    }

    bridge.detach_cli(session_id);
    writer.abort();
    info!(session = %session_id, "cli detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_browser_and_cli_paths() {
        let id = SessionId::new();
        assert_eq!(
            parse_ws_path(&format!("/ws/browser/{id}")),
            Some((SocketKind::Browser, id))
        );
        assert_eq!(
            parse_ws_path(&format!("/ws/cli/{id}")),
            Some((SocketKind::Cli, id))
        );
    }

    #[test]
    fn rejects_unroutable_paths() {
        assert_eq!(parse_ws_path("/ws/browser/not-a-uuid"), None);
        assert_eq!(parse_ws_path("/ws/other/2f0c0f9e-b9f0-4a2e-8f66-1a2b3c4d5e6f"), None);
        assert_eq!(parse_ws_path("/api/sessions"), None);
        assert_eq!(parse_ws_path("/ws/browser"), None);
    }
}
