//! The browser-facing message schema.
//!
//! One tagged union in each direction. Every outbound message except
//! `event_replay` is replayable: the bridge stores it in the per-session
//! ring and attaches a monotonically increasing `seq` when it goes out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::types::PermissionRequestId;

/// A ring entry: a sequenced, replayable outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Per-session sequence number, starting at 1.
    pub seq: u64,
    /// The serialized outbound message (without its `seq` field).
    pub message: Value,
}

/// Serialize an outbound message and attach its sequence number.
///
/// The ring stores the bare message; the `seq` field is stamped on at send
/// and replay time so both paths agree.
#[must_use]
pub fn sequenced_json(message: &Value, seq: u64) -> Value {
    let mut out = message.clone();
    if let Value::Object(map) = &mut out {
        map.insert("seq".to_string(), Value::from(seq));
    }
    out
}

/// Outbound messages: bridge → browser.
///
/// Variants that originate in a subprocess (`assistant`, `stream_event`,
/// `result`, …) carry their body as a flattened [`Value`] so adapter A can
/// pass NDJSON through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEvent {
    /// Session snapshot, sent once per subscription and on (re)init.
    SessionInit {
        /// Session record enriched with CLI-reported fields.
        session: Value,
    },
    /// Incremental session metadata change.
    SessionUpdate {
        /// Updated session record.
        session: Value,
    },
    /// An assistant message (complete or consolidated).
    Assistant {
        /// Subprocess-shaped body, passed through.
        #[serde(flatten)]
        payload: Value,
    },
    /// A streaming event (content block start/delta/stop, message delta).
    StreamEvent {
        /// Subprocess-shaped body, passed through.
        #[serde(flatten)]
        payload: Value,
    },
    /// Turn result.
    Result {
        /// Subprocess-shaped body, passed through.
        #[serde(flatten)]
        payload: Value,
    },
    /// A subprocess wants permission to use a tool.
    PermissionRequest {
        /// Server-generated id the browser must echo back.
        request_id: PermissionRequestId,
        /// Common-schema tool name (`Bash`, `Edit`, `mcp:<server>:<tool>`, …).
        tool_name: String,
        /// Tool input, as the backend shaped it.
        input: Value,
    },
    /// A pending permission request was resolved or timed out; dismiss it.
    PermissionCancelled {
        /// The request that is no longer pending.
        request_id: PermissionRequestId,
    },
    /// Tool progress notification (adapter A passthrough).
    ToolProgress {
        /// Subprocess-shaped body.
        #[serde(flatten)]
        payload: Value,
    },
    /// Tool use summary (adapter A passthrough).
    ToolUseSummary {
        /// Subprocess-shaped body.
        #[serde(flatten)]
        payload: Value,
    },
    /// Coarse session status change.
    StatusChange {
        /// New status label.
        status: String,
    },
    /// Authentication status (adapter A passthrough).
    AuthStatus {
        /// Subprocess-shaped body.
        #[serde(flatten)]
        payload: Value,
    },
    /// An error the browser should surface.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// The CLI side of this session attached.
    CliConnected,
    /// The CLI side of this session went away.
    CliDisconnected {
        /// Exit code, when the disconnect came from process exit.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    /// Echo of a user message, so every attached viewer sees it.
    UserMessage {
        /// Message content.
        content: Value,
    },
    /// Full known history, sent unsequenced on subscribe.
    MessageHistory {
        /// Messages in emission order.
        messages: Vec<Value>,
    },
    /// A replay batch. Not itself replayable.
    EventReplay {
        /// Ring entries with `seq > last_seq`, in order.
        events: Vec<SequencedEvent>,
    },
    /// The session was renamed.
    SessionNameUpdate {
        /// New display name.
        name: String,
    },
    /// Pull-request status pushed from the HTTP subsystem.
    PrStatusUpdate {
        /// Poller payload, passed through.
        payload: Value,
    },
    /// MCP server status snapshot (adapter B).
    McpStatus {
        /// Per-server status entries.
        servers: Value,
    },
    /// Background task notification.
    TaskNotification {
        /// Notification payload.
        payload: Value,
    },
}

impl BrowserEvent {
    /// Whether this message belongs in the replay ring.
    ///
    /// `event_replay` wraps other messages and must never be replayed
    /// itself.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::EventReplay { .. })
    }
}

/// Decision carried by a `permission_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehavior {
    /// Let the tool run.
    Allow,
    /// Refuse.
    Deny,
}

/// Inbound messages: browser → bridge.
///
/// User-intent variants carry a `client_msg_id` idempotency token; the
/// bridge drops duplicates by remembering the most recent tokens per
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// First message after connect: attach to the session's event stream.
    SessionSubscribe {
        /// Highest `seq` the browser has already applied (0 for none).
        #[serde(default)]
        last_seq: u64,
    },
    /// Periodic acknowledgement of received events.
    SessionAck {
        /// Highest `seq` applied so far.
        last_seq: u64,
    },
    /// Send a user message to the subprocess.
    UserMessage {
        /// Message content.
        content: Value,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Answer a pending permission request.
    PermissionResponse {
        /// The request being answered.
        request_id: PermissionRequestId,
        /// Allow or deny.
        behavior: PermissionBehavior,
        /// Caller-edited tool input (allow only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        /// Permission rule updates to apply alongside the decision.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Value>,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Interrupt the current turn.
    Interrupt {
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Switch model (adapter A only; adapter B rejects it).
    SetModel {
        /// Model identifier.
        model: String,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Switch permission mode (adapter A only; adapter B rejects it).
    SetPermissionMode {
        /// Mode name in the CLI's spelling.
        mode: String,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Fetch MCP server status (adapter B).
    McpGetStatus {
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Enable or disable an MCP server (adapter B).
    McpToggle {
        /// Server name.
        server: String,
        /// Desired enabled state.
        enabled: bool,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Reconnect an MCP server (adapter B).
    McpReconnect {
        /// Server name.
        server: String,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
    /// Replace the MCP server configuration (adapter B).
    McpSetServers {
        /// Full server map, as the backend config expects it.
        servers: Value,
        /// Idempotency token.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },
}

impl ClientCommand {
    /// The idempotency token, when this command is a user intent.
    #[must_use]
    pub fn client_msg_id(&self) -> Option<&str> {
        match self {
            Self::UserMessage { client_msg_id, .. }
            | Self::PermissionResponse { client_msg_id, .. }
            | Self::Interrupt { client_msg_id }
            | Self::SetModel { client_msg_id, .. }
            | Self::SetPermissionMode { client_msg_id, .. }
            | Self::McpGetStatus { client_msg_id }
            | Self::McpToggle { client_msg_id, .. }
            | Self::McpReconnect { client_msg_id, .. }
            | Self::McpSetServers { client_msg_id, .. } => client_msg_id.as_deref(),
            Self::SessionSubscribe { .. } | Self::SessionAck { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_tags_are_snake_case() {
        let event = BrowserEvent::CliConnected;
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "cli_connected"})
        );

        let event = BrowserEvent::PermissionCancelled {
            request_id: PermissionRequestId::from_raw("r1"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "permission_cancelled", "request_id": "r1"})
        );
    }

    #[test]
    fn passthrough_bodies_are_flattened() {
        let event = BrowserEvent::Assistant {
            payload: json!({"message": {"id": "m1", "content": []}}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "assistant");
        assert_eq!(value["message"]["id"], "m1");
    }

    #[test]
    fn sequenced_json_stamps_seq() {
        let message = serde_json::to_value(BrowserEvent::CliConnected).unwrap();
        let out = sequenced_json(&message, 42);
        assert_eq!(out["seq"], 42);
        assert_eq!(out["type"], "cli_connected");
    }

    #[test]
    fn event_replay_is_not_replayable() {
        let replay = BrowserEvent::EventReplay { events: Vec::new() };
        assert!(!replay.is_replayable());
        assert!(BrowserEvent::CliConnected.is_replayable());
    }

    #[test]
    fn inbound_subscribe_defaults_last_seq() {
        let cmd: ClientCommand =
            serde_json::from_value(json!({"type": "session_subscribe"})).unwrap();
        assert_eq!(cmd, ClientCommand::SessionSubscribe { last_seq: 0 });
    }

    #[test]
    fn inbound_intents_expose_client_msg_id() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "user_message",
            "content": {"text": "hi"},
            "client_msg_id": "c-1"
        }))
        .unwrap();
        assert_eq!(cmd.client_msg_id(), Some("c-1"));

        let cmd: ClientCommand =
            serde_json::from_value(json!({"type": "session_ack", "last_seq": 9})).unwrap();
        assert_eq!(cmd.client_msg_id(), None);
    }

    #[test]
    fn permission_response_roundtrips() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "permission_response",
            "request_id": "req-1",
            "behavior": "allow",
            "updated_input": {"command": "ls"}
        }))
        .unwrap();
        match cmd {
            ClientCommand::PermissionResponse {
                behavior,
                updated_input,
                ..
            } => {
                assert_eq!(behavior, PermissionBehavior::Allow);
                assert_eq!(updated_input, Some(json!({"command": "ls"})));
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
