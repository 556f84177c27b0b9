//! Builders for common-schema content blocks and stream events.
//!
//! Both adapters speak the same browser-facing shapes: assistant messages
//! made of content blocks, and `stream_event` payloads describing block
//! lifecycles. Adapter A gets them from its subprocess verbatim; adapter B
//! synthesizes them from the item lifecycle with these helpers.

use serde_json::{Value, json};

/// A text content block.
#[must_use]
pub fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

/// A thinking content block.
#[must_use]
pub fn thinking_block(text: &str) -> Value {
    json!({"type": "thinking", "thinking": text})
}

/// A tool_use content block.
#[must_use]
pub fn tool_use_block(id: &str, name: &str, input: Value) -> Value {
    json!({"type": "tool_use", "id": id, "name": name, "input": input})
}

/// A tool_result content block.
#[must_use]
pub fn tool_result_block(tool_use_id: &str, content: Value, is_error: bool) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": content,
        "is_error": is_error,
    })
}

/// An assistant-message body carrying the given content blocks.
///
/// This is the flattened payload of a browser `assistant` event; callers
/// wrap it in [`crate::BrowserEvent::Assistant`].
#[must_use]
pub fn assistant_payload(message_id: &str, content: Vec<Value>) -> Value {
    json!({
        "message": {
            "id": message_id,
            "type": "message",
            "role": "assistant",
            "content": content,
        }
    })
}

/// A `content_block_start` stream-event payload.
#[must_use]
pub fn content_block_start(index: usize, content_block: Value) -> Value {
    json!({
        "event": {
            "type": "content_block_start",
            "index": index,
            "content_block": content_block,
        }
    })
}

/// A `content_block_delta` stream-event payload.
#[must_use]
pub fn content_block_delta(index: usize, delta: Value) -> Value {
    json!({
        "event": {
            "type": "content_block_delta",
            "index": index,
            "delta": delta,
        }
    })
}

/// A text delta for [`content_block_delta`].
#[must_use]
pub fn text_delta(text: &str) -> Value {
    json!({"type": "text_delta", "text": text})
}

/// A thinking delta for [`content_block_delta`].
#[must_use]
pub fn thinking_delta(text: &str) -> Value {
    json!({"type": "thinking_delta", "thinking": text})
}

/// A `content_block_stop` stream-event payload.
#[must_use]
pub fn content_block_stop(index: usize) -> Value {
    json!({
        "event": {
            "type": "content_block_stop",
            "index": index,
        }
    })
}

/// A `message_delta` stream-event payload carrying the stop reason.
#[must_use]
pub fn message_delta(stop_reason: Option<&str>) -> Value {
    json!({
        "event": {
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason},
        }
    })
}
