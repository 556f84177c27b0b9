//! The Codex-style app-server JSON-RPC payloads.
//!
//! Requests the bridge sends (`initialize`, `thread/*`, `turn/*`, the MCP
//! config scripts), notifications the backend streams (the item lifecycle),
//! and the server-initiated approval requests with their reply shapes.
//!
//! Everything here is camelCase on the wire except where the protocol says
//! otherwise; sandbox and approval-policy enums are kebab-case and come
//! from [`switchboard_core::session`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use switchboard_core::session::{ApprovalPolicy, SandboxMode};

// Outgoing request methods.

/// Handshake, first request on the wire.
pub const INITIALIZE: &str = "initialize";
/// Start a fresh conversation thread.
pub const THREAD_START: &str = "thread/start";
/// Resume a prior thread by id.
pub const THREAD_RESUME: &str = "thread/resume";
/// Start a turn (user prompt).
pub const TURN_START: &str = "turn/start";
/// Interrupt the active turn (notification).
pub const TURN_INTERRUPT: &str = "turn/interrupt";
/// Read current account rate limits.
pub const RATE_LIMITS_READ: &str = "account/rateLimits/read";

// MCP management methods.

/// List MCP server status.
pub const MCP_STATUS_LIST: &str = "mcpServerStatus/list";
/// Read the backend config.
pub const CONFIG_READ: &str = "config/read";
/// Write one config value.
pub const CONFIG_VALUE_WRITE: &str = "config/value/write";
/// Write several config values atomically.
pub const CONFIG_BATCH_WRITE: &str = "config/batchWrite";
/// Reload MCP servers after a config change.
pub const MCP_RELOAD: &str = "config/mcpServer/reload";

// Incoming notification methods.

/// A new item entered the lifecycle.
pub const ITEM_STARTED: &str = "item/started";
/// An item finished.
pub const ITEM_COMPLETED: &str = "item/completed";
/// The active turn finished.
pub const TURN_COMPLETED: &str = "turn/completed";
/// Rate limits changed.
pub const RATE_LIMITS_UPDATED: &str = "account/rateLimits/updated";

// Server-initiated approval request methods.

/// Item-level command approval (replied with accept/decline).
pub const CMD_REQUEST_APPROVAL: &str = "item/commandExecution/requestApproval";
/// Legacy command approval (replied with approved/denied).
pub const EXEC_COMMAND_APPROVAL: &str = "execCommandApproval";
/// Item-level file-change approval (replied with accept/decline).
pub const FILE_CHANGE_REQUEST_APPROVAL: &str = "item/fileChange/requestApproval";
/// Legacy patch approval (replied with approved/denied).
pub const APPLY_PATCH_APPROVAL: &str = "applyPatchApproval";
/// MCP tool approval (replied with accept/decline).
pub const MCP_TOOL_REQUEST_APPROVAL: &str = "item/mcpToolCall/requestApproval";
/// Dynamic tool invocation (replied with a [`DynamicToolCallResponse`]).
pub const DYNAMIC_TOOL_CALL: &str = "item/tool/call";
/// Question for the user (replied with [`UserInputAnswers`]).
pub const REQUEST_USER_INPUT: &str = "item/tool/requestUserInput";

/// Extract the item kind from an `item/<kind>/delta` method name.
#[must_use]
pub fn delta_kind(method: &str) -> Option<&str> {
    let rest = method.strip_prefix("item/")?;
    rest.strip_suffix("/delta")
}

/// Render a backend `command` field for display.
///
/// Some backend versions send arrays, others single strings; the raw form
/// is preserved everywhere (approval replies echo it) and this join is for
/// the browser-facing `input.command` only.
#[must_use]
pub fn command_display(command: &Value) -> String {
    match command {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// `initialize` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Who is connecting.
    pub client_info: ClientInfo,
}

/// Client metadata attached to `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// `thread/start` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartParams {
    /// Working directory for the thread.
    pub cwd: String,
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sandbox policy (kebab-case on the wire).
    pub sandbox: SandboxMode,
    /// Approval policy (kebab-case on the wire).
    pub approval_policy: ApprovalPolicy,
}

/// `thread/resume` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResumeParams {
    /// The thread to resume.
    pub thread_id: String,
    /// Working directory for the thread.
    pub cwd: String,
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sandbox policy.
    pub sandbox: SandboxMode,
    /// Approval policy.
    pub approval_policy: ApprovalPolicy,
}

/// Reply to `thread/start` / `thread/resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResult {
    /// The thread id — becomes the session's `cli_internal_id`.
    pub thread_id: String,
}

/// `turn/start` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    /// Thread to run the turn on.
    pub thread_id: String,
    /// Prompt content.
    pub input: Vec<UserInputItem>,
}

/// One element of a turn's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserInputItem {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Reply to `turn/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResult {
    /// Id of the started turn; scopes interrupts.
    pub turn_id: String,
}

/// `turn/interrupt` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInterruptParams {
    /// Thread the turn belongs to.
    pub thread_id: String,
    /// The turn to interrupt.
    pub turn_id: String,
}

/// Kinds of items in the backend's output lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    /// Assistant prose.
    AgentMessage,
    /// Model reasoning.
    Reasoning,
    /// A shell command run.
    CommandExecution,
    /// File creations/edits.
    FileChange,
    /// A web search.
    WebSearch,
    /// Anything this adapter does not understand (logged and dropped).
    #[serde(other)]
    Unknown,
}

/// An item snapshot, as carried by `item/started` and `item/completed`.
///
/// Fields beyond the id and kind depend on the kind; they are kept loose
/// and extracted at the translator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSnapshot {
    /// Backend-assigned item id.
    pub id: String,
    /// Item kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Final text (agent messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Command line — string or array, preserved as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
    /// Merged stdout/stderr (command executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_output: Option<String>,
    /// Exit code (command executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Change list (file changes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
    /// Query (web searches).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub rest: Value,
}

/// `item/started` / `item/completed` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLifecycleParams {
    /// The item.
    pub item: ItemSnapshot,
}

/// `item/<kind>/delta` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDeltaParams {
    /// The item this delta belongs to.
    pub item_id: String,
    /// The appended text.
    pub delta: String,
}

/// Params of both command-approval request flavours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandApprovalParams {
    /// Item id (item-level flavour).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Call id (legacy flavour).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Command — string or array, preserved.
    pub command: Value,
    /// Working directory, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Backend's stated reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandApprovalParams {
    /// The id to correlate tool blocks with, whichever flavour supplied it.
    #[must_use]
    pub fn tool_use_id(&self) -> Option<&str> {
        self.item_id.as_deref().or(self.call_id.as_deref())
    }
}

/// Params of both file-change approval flavours.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeApprovalParams {
    /// Item id (item-level flavour).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Call id (legacy flavour).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Paths touched by the change set.
    #[serde(default)]
    pub file_paths: Vec<String>,
    /// Full change list, untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
    /// Backend's stated reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `item/mcpToolCall/requestApproval` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolApprovalParams {
    /// Item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// MCP server name.
    pub server: String,
    /// Tool name on that server.
    pub tool: String,
    /// Tool input, untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// `item/tool/call` params (dynamic tools).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicToolCallParams {
    /// Correlation id for the call.
    pub call_id: String,
    /// Tool name.
    pub tool: String,
    /// Tool input, untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// `item/tool/requestUserInput` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequestParams {
    /// Item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Questions, in presentation order. The browser answers by index; the
    /// reply maps answers back to each question's stable id.
    pub questions: Vec<UserInputQuestion>,
}

/// One question posed to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputQuestion {
    /// Stable question id, echoed in the reply.
    pub id: String,
    /// The question text.
    pub question: String,
    /// Choices, when the question is multiple-choice.
    #[serde(default)]
    pub options: Vec<UserInputOption>,
}

/// One selectable answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputOption {
    /// Display label; also the value echoed back.
    pub label: String,
}

/// Accept/decline decision (item-level approvals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Let it run.
    Accept,
    /// Refuse.
    Decline,
}

/// Approved/denied decision (legacy `execCommandApproval` /
/// `applyPatchApproval`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    /// Let it run.
    Approved,
    /// Refuse.
    Denied,
}

/// JSON-RPC result body carrying an accept/decline decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    /// The decision.
    pub decision: ApprovalDecision,
}

/// JSON-RPC result body carrying an approved/denied decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecisionResult {
    /// The decision.
    pub decision: ReviewDecision,
}

/// Reply body for `item/tool/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicToolCallResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// Result content.
    #[serde(default)]
    pub content_items: Vec<ToolContentItem>,
}

impl DynamicToolCallResponse {
    /// A failure response carrying one text item.
    #[must_use]
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            content_items: vec![ToolContentItem::InputText { text: text.into() }],
        }
    }
}

/// Content element of a [`DynamicToolCallResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContentItem {
    /// Plain text.
    InputText {
        /// The text.
        text: String,
    },
}

/// Reply body for `item/tool/requestUserInput`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInputAnswers {
    /// Answers keyed by stable question id.
    pub answers: BTreeMap<String, UserInputAnswerList>,
}

/// Answers to a single question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputAnswerList {
    /// Selected labels.
    pub answers: Vec<String>,
}

/// Cached account rate limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Primary window, as the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<Value>,
    /// Secondary window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_kind_parses_item_delta_methods() {
        assert_eq!(delta_kind("item/agentMessage/delta"), Some("agentMessage"));
        assert_eq!(delta_kind("item/reasoning/delta"), Some("reasoning"));
        assert_eq!(delta_kind("item/started"), None);
        assert_eq!(delta_kind("turn/completed"), None);
    }

    #[test]
    fn command_display_joins_arrays_and_keeps_strings() {
        assert_eq!(
            command_display(&json!(["rm", "-rf", "/tmp/t"])),
            "rm -rf /tmp/t"
        );
        assert_eq!(
            command_display(&json!("/bin/zsh -lc 'echo hi'")),
            "/bin/zsh -lc 'echo hi'"
        );
    }

    #[test]
    fn thread_params_serialize_kebab_case_enums() {
        let params = ThreadStartParams {
            cwd: "/work".into(),
            model: None,
            sandbox: SandboxMode::WorkspaceWrite,
            approval_policy: ApprovalPolicy::Untrusted,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["sandbox"], "workspace-write");
        assert_eq!(value["approvalPolicy"], "untrusted");
        assert!(value.get("model").is_none());
    }

    #[test]
    fn item_snapshot_tolerates_unknown_kinds() {
        let item: ItemSnapshot = serde_json::from_value(json!({
            "id": "x1",
            "type": "todoList",
            "entries": [],
        }))
        .unwrap();
        assert_eq!(item.kind, ItemKind::Unknown);
    }

    #[test]
    fn item_snapshot_parses_command_execution() {
        let item: ItemSnapshot = serde_json::from_value(json!({
            "id": "c1",
            "type": "commandExecution",
            "command": ["ls", "-la"],
            "aggregatedOutput": "total 0\n",
            "exitCode": 0,
        }))
        .unwrap();
        assert_eq!(item.kind, ItemKind::CommandExecution);
        assert_eq!(item.exit_code, Some(0));
        assert_eq!(item.aggregated_output.as_deref(), Some("total 0\n"));
    }

    #[test]
    fn decision_results_use_protocol_spellings() {
        assert_eq!(
            serde_json::to_value(DecisionResult {
                decision: ApprovalDecision::Accept
            })
            .unwrap(),
            json!({"decision": "accept"})
        );
        assert_eq!(
            serde_json::to_value(ReviewDecisionResult {
                decision: ReviewDecision::Denied
            })
            .unwrap(),
            json!({"decision": "denied"})
        );
    }

    #[test]
    fn dynamic_tool_failure_shape() {
        let response = DynamicToolCallResponse::failure("timed out");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["contentItems"][0]["type"], "inputText");
        assert_eq!(value["contentItems"][0]["text"], "timed out");
    }

    #[test]
    fn user_input_answers_key_by_question_id() {
        let mut answers = UserInputAnswers::default();
        answers.answers.insert(
            "q-color".to_string(),
            UserInputAnswerList {
                answers: vec!["blue".to_string()],
            },
        );
        let value = serde_json::to_value(&answers).unwrap();
        assert_eq!(value["answers"]["q-color"]["answers"][0], "blue");
    }
}
