//! Inbound NDJSON processing for the Claude-style CLI.
//!
//! The CLI streams messages the browser schema already understands, so the
//! adapter is a thin classifier: capture the internal session id from
//! `system.init`, hand `can_use_tool` control requests to the arbiter, and
//! forward the rest as-is.

use serde_json::Value;
use std::sync::Mutex;
use tracing::warn;

use switchboard_core::types::SessionId;
use switchboard_protocol::claude::{self, ControlRequest};

/// What to do with one inbound NDJSON message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaudeInbound {
    /// Forward to the browser fan-out, sequenced.
    Forward(Value),
    /// First `system.init`: the bridge emits an enriched `session_init`
    /// and the launcher stores the captured id for `--resume`.
    SessionInit {
        /// The CLI's internal session id, when it announced one.
        cli_session_id: Option<String>,
        /// The raw init message, for enrichment.
        message: Value,
    },
    /// A tool-permission request for the arbiter.
    Permission(ControlRequest),
    /// A non-permission control request; forwarded so the browser can
    /// answer protocol-level queries itself.
    OtherControl(Value),
}

/// Per-session state for the Claude adapter.
#[derive(Debug)]
pub struct ClaudeAdapter {
    session_id: SessionId,
    /// First captured internal session id. Never overwritten: a drifting
    /// id mid-session would make the stored resume token stale, so drift
    /// is logged loudly instead.
    cli_session_id: Mutex<Option<String>>,
    init_seen: Mutex<bool>,
}

impl ClaudeAdapter {
    /// Create an adapter for a session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            cli_session_id: Mutex::new(None),
            init_seen: Mutex::new(false),
        }
    }

    /// The captured internal session id, if any.
    #[must_use]
    pub fn cli_session_id(&self) -> Option<String> {
        self.cli_session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Classify one inbound message.
    pub fn process(&self, message: Value) -> ClaudeInbound {
        if claude::is_system_init(&message) {
            return self.process_init(message);
        }
        if claude::message_type(&message) == Some("control_request") {
            return match ControlRequest::parse(&message) {
                Some(request) if request.is_permission() => ClaudeInbound::Permission(request),
                _ => ClaudeInbound::OtherControl(message),
            };
        }
        ClaudeInbound::Forward(message)
    }

    fn process_init(&self, message: Value) -> ClaudeInbound {
        let announced = claude::init_session_id(&message).map(str::to_string);

        let mut stored = self
            .cli_session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match (&*stored, &announced) {
            (None, Some(id)) => *stored = Some(id.clone()),
            (Some(current), Some(id)) if current != id => {
                // Resume would use a stale token if we silently adopted the
                // new id; keep the first and flag it for investigation.
                warn!(
                    session = %self.session_id,
                    stored = %current,
                    announced = %id,
                    "cli internal session id changed mid-session; keeping first"
                );
            },
            _ => {},
        }
        drop(stored);

        let mut init_seen = self
            .init_seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *init_seen {
            // Re-inits are informational; pass through without re-emitting
            // the enriched snapshot.
            return ClaudeInbound::Forward(message);
        }
        *init_seen = true;
        drop(init_seen);

        ClaudeInbound::SessionInit {
            cli_session_id: announced,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init_message(session_id: &str) -> Value {
        json!({
            "type": "system",
            "subtype": "init",
            "session_id": session_id,
            "model": "opus",
        })
    }

    #[test]
    fn first_init_is_captured_and_reported_once() {
        let adapter = ClaudeAdapter::new(SessionId::new());
        match adapter.process(init_message("cli-abc")) {
            ClaudeInbound::SessionInit { cli_session_id, .. } => {
                assert_eq!(cli_session_id.as_deref(), Some("cli-abc"));
            },
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(adapter.cli_session_id().as_deref(), Some("cli-abc"));

        // A second init passes through and never overwrites the id.
        match adapter.process(init_message("cli-xyz")) {
            ClaudeInbound::Forward(_) => {},
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(adapter.cli_session_id().as_deref(), Some("cli-abc"));
    }

    #[test]
    fn permission_control_requests_are_split_out() {
        let adapter = ClaudeAdapter::new(SessionId::new());
        let message = json!({
            "type": "control_request",
            "request_id": "cr-1",
            "request": {"subtype": "can_use_tool", "tool_name": "Bash", "input": {}},
        });
        match adapter.process(message) {
            ClaudeInbound::Permission(request) => {
                assert_eq!(request.request_id, "cr-1");
            },
            other => panic!("unexpected: {other:?}"),
        }

        let other_control = json!({
            "type": "control_request",
            "request_id": "cr-2",
            "request": {"subtype": "hook_callback"},
        });
        assert!(matches!(
            adapter.process(other_control),
            ClaudeInbound::OtherControl(_)
        ));
    }

    #[test]
    fn everything_else_is_forwarded() {
        let adapter = ClaudeAdapter::new(SessionId::new());
        for message in [
            json!({"type": "assistant", "message": {"id": "m1"}}),
            json!({"type": "stream_event", "event": {}}),
            json!({"type": "result", "subtype": "success"}),
            json!({"type": "keep_alive"}),
            json!({"type": "auth_status", "status": "ok"}),
        ] {
            assert_eq!(
                adapter.process(message.clone()),
                ClaudeInbound::Forward(message)
            );
        }
    }
}
