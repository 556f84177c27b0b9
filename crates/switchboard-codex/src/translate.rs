//! Folds the backend's item lifecycle into the common browser schema.
//!
//! Items arrive as `item/started`, zero or more `item/<kind>/delta`, and
//! `item/completed`. The translator keys a small state table by the
//! backend-assigned item id, remembers whether `item/started` was seen (a
//! completion without it must backfill the tool_use block first), and
//! accumulates agent-message deltas for the consolidated `assistant`
//! message.

use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::warn;

use switchboard_protocol::blocks;
use switchboard_protocol::browser::BrowserEvent;
use switchboard_protocol::codex::{ItemKind, ItemSnapshot};

/// Stable assistant-message id for an agent message item.
#[must_use]
pub fn agent_message_id(item_id: &str) -> String {
    format!("codex-agent-{item_id}")
}

fn tool_message_id(item_id: &str) -> String {
    format!("codex-item-{item_id}")
}

fn result_message_id(item_id: &str) -> String {
    format!("codex-item-{item_id}-result")
}

#[derive(Debug)]
struct ItemEntry {
    kind: ItemKind,
    started_seen: bool,
    buffer: String,
}

/// Per-session item lifecycle state.
#[derive(Debug, Default)]
pub struct Translator {
    items: HashMap<String, ItemEntry>,
}

impl Translator {
    /// Create an empty translator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `item/started`.
    pub fn item_started(&mut self, item: &ItemSnapshot) -> Vec<BrowserEvent> {
        if item.kind == ItemKind::Unknown {
            warn!(item = %item.id, "dropping item of unknown kind");
            return Vec::new();
        }
        self.items.insert(
            item.id.clone(),
            ItemEntry {
                kind: item.kind,
                started_seen: true,
                buffer: String::new(),
            },
        );
        match item.kind {
            ItemKind::AgentMessage => vec![BrowserEvent::StreamEvent {
                payload: blocks::content_block_start(0, blocks::text_block("")),
            }],
            ItemKind::Reasoning => vec![BrowserEvent::StreamEvent {
                payload: blocks::content_block_start(0, blocks::thinking_block("")),
            }],
            ItemKind::CommandExecution | ItemKind::FileChange | ItemKind::WebSearch => {
                Self::tool_use_events(item)
            },
            ItemKind::Unknown => Vec::new(),
        }
    }

    /// Handle `item/<kind>/delta`.
    ///
    /// `kind` is the segment from the method name; a delta for an item we
    /// never saw start is tracked so the completion can still consolidate.
    pub fn item_delta(&mut self, item_id: &str, kind: &str, delta: &str) -> Vec<BrowserEvent> {
        let kind = parse_kind(kind);
        let entry = self.items.entry(item_id.to_string()).or_insert(ItemEntry {
            kind,
            started_seen: false,
            buffer: String::new(),
        });
        match entry.kind {
            ItemKind::AgentMessage => {
                entry.buffer.push_str(delta);
                vec![BrowserEvent::StreamEvent {
                    payload: blocks::content_block_delta(0, blocks::text_delta(delta)),
                }]
            },
            ItemKind::Reasoning => vec![BrowserEvent::StreamEvent {
                payload: blocks::content_block_delta(0, blocks::thinking_delta(delta)),
            }],
            _ => Vec::new(),
        }
    }

    /// Handle `item/completed`.
    pub fn item_completed(&mut self, item: &ItemSnapshot) -> Vec<BrowserEvent> {
        let entry = self.items.remove(&item.id);
        let started_seen = entry.as_ref().is_some_and(|e| e.started_seen);

        match item.kind {
            ItemKind::AgentMessage => {
                let text = item
                    .text
                    .clone()
                    .unwrap_or_else(|| entry.map(|e| e.buffer).unwrap_or_default());
                vec![
                    BrowserEvent::Assistant {
                        payload: blocks::assistant_payload(
                            &agent_message_id(&item.id),
                            vec![blocks::text_block(&text)],
                        ),
                    },
                    BrowserEvent::StreamEvent {
                        payload: blocks::message_delta(None),
                    },
                    BrowserEvent::StreamEvent {
                        payload: blocks::content_block_stop(0),
                    },
                ]
            },
            ItemKind::Reasoning => vec![BrowserEvent::StreamEvent {
                payload: blocks::content_block_stop(0),
            }],
            ItemKind::CommandExecution => {
                let mut events = Vec::new();
                if !started_seen {
                    events.extend(Self::tool_use_events(item));
                }
                let output = item.aggregated_output.clone().unwrap_or_default();
                let exit_code = item.exit_code.unwrap_or(0);
                if output.is_empty() && exit_code == 0 {
                    // Silent success: the tool_use block stands alone.
                    return events;
                }
                events.push(BrowserEvent::Assistant {
                    payload: blocks::assistant_payload(
                        &result_message_id(&item.id),
                        vec![blocks::tool_result_block(
                            &item.id,
                            Value::String(output),
                            exit_code != 0,
                        )],
                    ),
                });
                events
            },
            ItemKind::FileChange => {
                let mut events = Vec::new();
                if !started_seen {
                    events.extend(Self::tool_use_events(item));
                }
                let paths = changed_paths(item.changes.as_ref());
                let summary = if paths.is_empty() {
                    "no files changed".to_string()
                } else {
                    format!("applied changes to {}", paths.join(", "))
                };
                events.push(BrowserEvent::Assistant {
                    payload: blocks::assistant_payload(
                        &result_message_id(&item.id),
                        vec![blocks::tool_result_block(
                            &item.id,
                            Value::String(summary),
                            false,
                        )],
                    ),
                });
                events
            },
            ItemKind::WebSearch => {
                let mut events = Vec::new();
                if !started_seen {
                    events.extend(Self::tool_use_events(item));
                }
                let content = item
                    .rest
                    .get("results")
                    .or_else(|| item.rest.get("actions"))
                    .cloned()
                    .unwrap_or_else(|| Value::String("search completed".to_string()));
                events.push(BrowserEvent::Assistant {
                    payload: blocks::assistant_payload(
                        &result_message_id(&item.id),
                        vec![blocks::tool_result_block(&item.id, content, false)],
                    ),
                });
                events
            },
            ItemKind::Unknown => {
                warn!(item = %item.id, "dropping completion of unknown item kind");
                Vec::new()
            },
        }
    }

    /// Tool block events for a tool-shaped item: the stream-event start
    /// plus the `assistant` message carrying the block.
    fn tool_use_events(item: &ItemSnapshot) -> Vec<BrowserEvent> {
        let (name, input) = match item.kind {
            ItemKind::CommandExecution => (
                "Bash".to_string(),
                // String or array, preserved as the backend sent it.
                json!({"command": item.command.clone().unwrap_or(Value::Null)}),
            ),
            ItemKind::FileChange => {
                let changes = item.changes.clone().unwrap_or_else(|| json!([]));
                let name = if all_creates(&changes) { "Write" } else { "Edit" };
                (name.to_string(), json!({"changes": changes}))
            },
            ItemKind::WebSearch => (
                "WebSearch".to_string(),
                json!({"query": item.query.clone().unwrap_or_default()}),
            ),
            _ => return Vec::new(),
        };
        let block = blocks::tool_use_block(&item.id, &name, input);
        vec![
            BrowserEvent::StreamEvent {
                payload: blocks::content_block_start(0, block.clone()),
            },
            BrowserEvent::Assistant {
                payload: blocks::assistant_payload(&tool_message_id(&item.id), vec![block]),
            },
        ]
    }

    /// Items currently mid-lifecycle (for diagnostics).
    #[must_use]
    pub fn open_items(&self) -> usize {
        self.items.len()
    }
}

fn parse_kind(kind: &str) -> ItemKind {
    serde_json::from_value(Value::String(kind.to_string())).unwrap_or(ItemKind::Unknown)
}

fn all_creates(changes: &Value) -> bool {
    match changes.as_array() {
        Some(list) if !list.is_empty() => list
            .iter()
            .all(|c| c.get("kind").and_then(Value::as_str) == Some("create")),
        _ => false,
    }
}

fn changed_paths(changes: Option<&Value>) -> Vec<String> {
    changes
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|c| c.get("path").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(value: Value) -> ItemSnapshot {
        serde_json::from_value(value).unwrap()
    }

    fn delta_texts(events: &[BrowserEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                BrowserEvent::StreamEvent { payload }
                    if payload["event"]["type"] == "content_block_delta" =>
                {
                    payload["event"]["delta"]["text"].as_str().map(str::to_string)
                },
                _ => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Agent messages
    // -----------------------------------------------------------------------

    #[test]
    fn agent_message_streams_then_consolidates() {
        let mut translator = Translator::new();

        let started = translator.item_started(&snapshot(json!({
            "id": "i1", "type": "agentMessage"
        })));
        assert_eq!(started.len(), 1);

        let d1 = translator.item_delta("i1", "agentMessage", "Hello ");
        let d2 = translator.item_delta("i1", "agentMessage", "world!");
        assert_eq!(delta_texts(&d1), ["Hello "]);
        assert_eq!(delta_texts(&d2), ["world!"]);

        let completed = translator.item_completed(&snapshot(json!({
            "id": "i1", "type": "agentMessage"
        })));
        assert_eq!(completed.len(), 3);

        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected assistant first");
        };
        assert_eq!(payload["message"]["id"], "codex-agent-i1");
        assert_eq!(payload["message"]["content"][0]["text"], "Hello world!");

        let BrowserEvent::StreamEvent { payload } = &completed[1] else {
            panic!("expected message_delta");
        };
        assert_eq!(payload["event"]["type"], "message_delta");
        assert!(payload["event"]["delta"]["stop_reason"].is_null());

        let BrowserEvent::StreamEvent { payload } = &completed[2] else {
            panic!("expected content_block_stop");
        };
        assert_eq!(payload["event"]["type"], "content_block_stop");
        assert_eq!(translator.open_items(), 0);
    }

    #[test]
    fn agent_message_prefers_final_text_over_buffer() {
        let mut translator = Translator::new();
        translator.item_started(&snapshot(json!({"id": "i2", "type": "agentMessage"})));
        translator.item_delta("i2", "agentMessage", "partial");
        let completed = translator.item_completed(&snapshot(json!({
            "id": "i2", "type": "agentMessage", "text": "the whole answer"
        })));
        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected assistant");
        };
        assert_eq!(
            payload["message"]["content"][0]["text"],
            "the whole answer"
        );
    }

    // -----------------------------------------------------------------------
    // Reasoning
    // -----------------------------------------------------------------------

    #[test]
    fn reasoning_opens_and_closes_a_thinking_block() {
        let mut translator = Translator::new();
        let started = translator.item_started(&snapshot(json!({"id": "r1", "type": "reasoning"})));
        let BrowserEvent::StreamEvent { payload } = &started[0] else {
            panic!("expected stream event");
        };
        assert_eq!(
            payload["event"]["content_block"]["type"],
            "thinking"
        );

        let deltas = translator.item_delta("r1", "reasoning", "hmm");
        let BrowserEvent::StreamEvent { payload } = &deltas[0] else {
            panic!("expected delta");
        };
        assert_eq!(payload["event"]["delta"]["thinking"], "hmm");

        let completed =
            translator.item_completed(&snapshot(json!({"id": "r1", "type": "reasoning"})));
        assert_eq!(completed.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Command execution
    // -----------------------------------------------------------------------

    #[test]
    fn command_execution_preserves_array_commands() {
        let mut translator = Translator::new();
        let started = translator.item_started(&snapshot(json!({
            "id": "c1", "type": "commandExecution", "command": ["ls", "-la"]
        })));
        // content_block_start + assistant tool_use.
        assert_eq!(started.len(), 2);
        let BrowserEvent::Assistant { payload } = &started[1] else {
            panic!("expected assistant");
        };
        let block = &payload["message"]["content"][0];
        assert_eq!(block["name"], "Bash");
        assert_eq!(block["input"]["command"], json!(["ls", "-la"]));

        let completed = translator.item_completed(&snapshot(json!({
            "id": "c1", "type": "commandExecution",
            "command": ["ls", "-la"],
            "aggregatedOutput": "total 4\n",
            "exitCode": 0,
        })));
        assert_eq!(completed.len(), 1);
        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected tool_result");
        };
        let block = &payload["message"]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "c1");
        assert_eq!(block["is_error"], false);
    }

    #[test]
    fn silent_success_emits_no_synthetic_result() {
        let mut translator = Translator::new();
        translator.item_started(&snapshot(json!({
            "id": "c2", "type": "commandExecution", "command": "true"
        })));
        let completed = translator.item_completed(&snapshot(json!({
            "id": "c2", "type": "commandExecution", "command": "true", "exitCode": 0
        })));
        assert!(completed.is_empty());
    }

    #[test]
    fn failed_command_result_is_error() {
        let mut translator = Translator::new();
        translator.item_started(&snapshot(json!({
            "id": "c3", "type": "commandExecution", "command": "false"
        })));
        let completed = translator.item_completed(&snapshot(json!({
            "id": "c3", "type": "commandExecution", "command": "false",
            "aggregatedOutput": "", "exitCode": 1,
        })));
        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected tool_result");
        };
        assert_eq!(payload["message"]["content"][0]["is_error"], true);
    }

    #[test]
    fn completion_without_start_backfills_tool_use() {
        let mut translator = Translator::new();
        let completed = translator.item_completed(&snapshot(json!({
            "id": "c4", "type": "commandExecution",
            "command": "echo hi",
            "aggregatedOutput": "hi\n",
            "exitCode": 0,
        })));
        // tool_use start + assistant tool_use + tool_result.
        assert_eq!(completed.len(), 3);
        let BrowserEvent::Assistant { payload } = &completed[1] else {
            panic!("expected backfilled tool_use");
        };
        assert_eq!(payload["message"]["content"][0]["type"], "tool_use");
        let BrowserEvent::Assistant { payload } = &completed[2] else {
            panic!("expected tool_result");
        };
        assert_eq!(payload["message"]["content"][0]["type"], "tool_result");
    }

    // -----------------------------------------------------------------------
    // File changes
    // -----------------------------------------------------------------------

    #[test]
    fn all_create_changes_use_write() {
        let mut translator = Translator::new();
        let started = translator.item_started(&snapshot(json!({
            "id": "f1", "type": "fileChange",
            "changes": [{"kind": "create", "path": "a.rs"}, {"kind": "create", "path": "b.rs"}],
        })));
        let BrowserEvent::Assistant { payload } = &started[1] else {
            panic!("expected assistant");
        };
        assert_eq!(payload["message"]["content"][0]["name"], "Write");
    }

    #[test]
    fn mixed_changes_use_edit_and_summarize_paths() {
        let mut translator = Translator::new();
        let started = translator.item_started(&snapshot(json!({
            "id": "f2", "type": "fileChange",
            "changes": [{"kind": "create", "path": "a.rs"}, {"kind": "modify", "path": "b.rs"}],
        })));
        let BrowserEvent::Assistant { payload } = &started[1] else {
            panic!("expected assistant");
        };
        assert_eq!(payload["message"]["content"][0]["name"], "Edit");

        let completed = translator.item_completed(&snapshot(json!({
            "id": "f2", "type": "fileChange",
            "changes": [{"kind": "create", "path": "a.rs"}, {"kind": "modify", "path": "b.rs"}],
        })));
        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected tool_result");
        };
        let content = payload["message"]["content"][0]["content"].as_str().unwrap();
        assert!(content.contains("a.rs"));
        assert!(content.contains("b.rs"));
    }

    // -----------------------------------------------------------------------
    // Web search & unknown kinds
    // -----------------------------------------------------------------------

    #[test]
    fn web_search_carries_query_and_results() {
        let mut translator = Translator::new();
        let started = translator.item_started(&snapshot(json!({
            "id": "w1", "type": "webSearch", "query": "rust tokio"
        })));
        let BrowserEvent::Assistant { payload } = &started[1] else {
            panic!("expected assistant");
        };
        assert_eq!(payload["message"]["content"][0]["name"], "WebSearch");
        assert_eq!(
            payload["message"]["content"][0]["input"]["query"],
            "rust tokio"
        );

        let completed = translator.item_completed(&snapshot(json!({
            "id": "w1", "type": "webSearch", "query": "rust tokio",
            "results": [{"url": "https://tokio.rs"}],
        })));
        let BrowserEvent::Assistant { payload } = &completed[0] else {
            panic!("expected tool_result");
        };
        assert_eq!(
            payload["message"]["content"][0]["content"][0]["url"],
            "https://tokio.rs"
        );
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        let mut translator = Translator::new();
        assert!(
            translator
                .item_started(&snapshot(json!({"id": "u1", "type": "todoList"})))
                .is_empty()
        );
        assert!(
            translator
                .item_completed(&snapshot(json!({"id": "u1", "type": "todoList"})))
                .is_empty()
        );
    }
}
