//! The Claude-style NDJSON envelope.
//!
//! The subprocess streams one JSON object per line over the loopback
//! WebSocket. Almost everything is forwarded to the browser untouched, so
//! these helpers peek at [`Value`]s instead of forcing a full schema; only
//! the two transformed shapes (`system.init` and `control_request`) get
//! typed views.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The `type` field of an NDJSON message, if present.
#[must_use]
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

/// The `subtype` field, if present.
#[must_use]
pub fn message_subtype(message: &Value) -> Option<&str> {
    message.get("subtype").and_then(Value::as_str)
}

/// Whether this message is the `system.init` announcement.
#[must_use]
pub fn is_system_init(message: &Value) -> bool {
    message_type(message) == Some("system") && message_subtype(message) == Some("init")
}

/// The CLI's internal session id carried by `system.init`.
#[must_use]
pub fn init_session_id(message: &Value) -> Option<&str> {
    message.get("session_id").and_then(Value::as_str)
}

/// Subtype marker for tool-permission control requests.
pub const CAN_USE_TOOL: &str = "can_use_tool";

/// A `control_request` message: the subprocess asks the bridge something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// The CLI's own correlation id; the reply must echo it.
    pub request_id: String,
    /// Request body.
    pub request: ControlRequestBody,
}

impl ControlRequest {
    /// Parse a `control_request` message.
    ///
    /// Returns `None` when the message is not a control request or is
    /// missing required fields.
    #[must_use]
    pub fn parse(message: &Value) -> Option<Self> {
        if message_type(message) != Some("control_request") {
            return None;
        }
        serde_json::from_value(message.clone()).ok()
    }

    /// Whether this is a tool-permission request.
    #[must_use]
    pub fn is_permission(&self) -> bool {
        self.request.subtype == CAN_USE_TOOL
    }
}

/// Body of a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequestBody {
    /// Request kind (`can_use_tool` is the one the arbiter handles).
    pub subtype: String,
    /// Tool the subprocess wants to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool input, untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Anything else the CLI sent along.
    #[serde(flatten)]
    pub rest: Value,
}

/// Build the `control_response` answering a `can_use_tool` request.
///
/// `allow` selects the subtype; `updated_input` and `updated_permissions`
/// ride along only on allow.
#[must_use]
pub fn control_response(
    request_id: &str,
    allow: bool,
    updated_input: Option<Value>,
    updated_permissions: Option<Value>,
) -> Value {
    let mut response = json!({
        "subtype": if allow { "allow" } else { "deny" },
        "request_id": request_id,
    });
    if allow {
        if let Value::Object(map) = &mut response {
            if let Some(input) = updated_input {
                map.insert("updated_input".to_string(), input);
            }
            if let Some(perms) = updated_permissions {
                map.insert("updated_permissions".to_string(), perms);
            }
        }
    }
    json!({
        "type": "control_response",
        "response": response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_system_init_and_extracts_session_id() {
        let message = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "cli-abc",
            "model": "opus",
        });
        assert!(is_system_init(&message));
        assert_eq!(init_session_id(&message), Some("cli-abc"));

        let other = json!({"type": "assistant", "message": {}});
        assert!(!is_system_init(&other));
    }

    #[test]
    fn parses_can_use_tool_control_request() {
        let message = json!({
            "type": "control_request",
            "request_id": "cr-9",
            "request": {
                "subtype": "can_use_tool",
                "tool_name": "Bash",
                "input": {"command": "ls"},
            }
        });
        let request = ControlRequest::parse(&message).unwrap();
        assert!(request.is_permission());
        assert_eq!(request.request_id, "cr-9");
        assert_eq!(request.request.tool_name.as_deref(), Some("Bash"));
    }

    #[test]
    fn parse_rejects_other_message_types() {
        let message = json!({"type": "keep_alive"});
        assert!(ControlRequest::parse(&message).is_none());
    }

    #[test]
    fn deny_response_drops_updated_input() {
        let response = control_response("cr-9", false, Some(json!({"command": "rm"})), None);
        assert_eq!(response["type"], "control_response");
        assert_eq!(response["response"]["subtype"], "deny");
        assert!(response["response"].get("updated_input").is_none());
    }

    #[test]
    fn allow_response_carries_updates() {
        let response = control_response(
            "cr-9",
            true,
            Some(json!({"command": "ls -la"})),
            Some(json!([{"rule": "allow Bash(ls*)"}])),
        );
        assert_eq!(response["response"]["subtype"], "allow");
        assert_eq!(response["response"]["updated_input"]["command"], "ls -la");
        assert!(response["response"]["updated_permissions"].is_array());
    }
}
