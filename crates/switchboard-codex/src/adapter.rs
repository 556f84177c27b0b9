//! The Codex adapter: handshake state machine, intent queue, and routing.
//!
//! Lifecycle: `Initializing → AwaitingThread → Ready`, or `Failed` on an
//! error reply to `initialize` or the thread request. Browser intents that
//! arrive before `Ready` are buffered in a bounded FIFO and flushed, in
//! order, once the handshake completes; the flush holds the state lock so
//! no freshly received intent can interleave.

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchboard_approval::{PendingPermission, PermissionOrigin};
use switchboard_core::session::{ApprovalPolicy, SandboxMode};
use switchboard_core::types::{PermissionRequestId, SessionId};
use switchboard_protocol::blocks;
use switchboard_protocol::browser::{BrowserEvent, ClientCommand, PermissionBehavior};
use switchboard_protocol::codex::{
    self, ClientInfo, CommandApprovalParams, DynamicToolCallParams, FileChangeApprovalParams,
    InitializeParams, ItemDeltaParams, ItemLifecycleParams, McpToolApprovalParams,
    RateLimitSnapshot, ThreadResult, ThreadResumeParams, ThreadStartParams, TurnInterruptParams,
    TurnStartParams, TurnStartResult, UserInputItem, UserInputRequestParams,
};
use switchboard_rpc::{Inbound, RpcPeer};

use crate::mcp;
use crate::translate::Translator;

/// Most intents buffered while the handshake is in flight. Overflow
/// rejects the oldest with a browser error event.
pub const QUEUE_LIMIT: usize = 256;

/// Launch-time configuration for one Codex session.
#[derive(Debug, Clone)]
pub struct CodexConfig {
    /// The bridge session this adapter serves.
    pub session_id: SessionId,
    /// Working directory for the thread.
    pub working_dir: String,
    /// Model override.
    pub model: Option<String>,
    /// Sandbox policy.
    pub sandbox: SandboxMode,
    /// Approval policy (already mapped from the permission mode).
    pub approval_policy: ApprovalPolicy,
    /// Thread to resume, when relaunching with a known conversation.
    pub resume_thread_id: Option<String>,
}

/// Everything the adapter pushes back to its owner.
///
/// One channel, kind-tagged — the bridge routes each concern (fan-out,
/// launcher metadata, arbiter registration) to its own handler.
#[derive(Debug)]
pub enum CodexOutput {
    /// Fan this out to attached browsers, sequenced.
    Browser(BrowserEvent),
    /// The thread id was captured; the launcher stores it as the
    /// session's `cli_internal_id`.
    ThreadStarted {
        /// The backend's thread id.
        thread_id: String,
    },
    /// The handshake failed; the launcher marks the session exited.
    InitError {
        /// What went wrong.
        message: String,
    },
    /// Register this pending request with the arbiter and fan out its
    /// `permission_request`.
    Permission(Box<PendingPermission>),
    /// A browser permission response surfaced through the intent queue;
    /// the bridge resolves it against the arbiter.
    PermissionResponse {
        /// The request being answered.
        request_id: PermissionRequestId,
        /// Allow or deny.
        behavior: PermissionBehavior,
        /// Edited input, when supplied.
        updated_input: Option<Value>,
        /// Permission updates, when supplied.
        updated_permissions: Option<Value>,
    },
    /// Rate limits changed; the bridge wraps them as a sequenced event
    /// and the HTTP layer reads the cache.
    RateLimits(RateLimitSnapshot),
}

/// Errors returned to the bridge for rejected browser intents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodexSendError {
    /// The backend does not expose this operation post-handshake.
    #[error("unsupported by this backend: {0}")]
    Unsupported(&'static str),
    /// Initialization failed; all sends are rejected.
    #[error("session initialization failed")]
    InitFailed,
    /// The command needs a completed handshake and cannot be queued.
    #[error("not available until the session is ready")]
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initializing,
    AwaitingThread,
    Ready,
    Failed,
}

#[derive(Debug)]
enum QueuedIntent {
    UserMessage(Value),
    PermissionResponse {
        request_id: PermissionRequestId,
        behavior: PermissionBehavior,
        updated_input: Option<Value>,
        updated_permissions: Option<Value>,
    },
    Interrupt,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    queue: VecDeque<QueuedIntent>,
}

/// One Codex subprocess, seen from the bridge.
pub struct CodexAdapter {
    config: CodexConfig,
    peer: RpcPeer,
    state: tokio::sync::Mutex<State>,
    translator: std::sync::Mutex<Translator>,
    thread_id: std::sync::Mutex<Option<String>>,
    turn_id: Arc<std::sync::Mutex<Option<String>>>,
    rate_limits: std::sync::Mutex<RateLimitSnapshot>,
    output: mpsc::UnboundedSender<CodexOutput>,
}

impl CodexAdapter {
    /// Wrap the subprocess's stdin. The owner drains stdout and feeds each
    /// line to [`CodexAdapter::handle_line`], and spawns
    /// [`CodexAdapter::run_handshake`].
    #[must_use]
    pub fn new<W>(
        config: CodexConfig,
        stdin: W,
        output: mpsc::UnboundedSender<CodexOutput>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            config,
            peer: RpcPeer::new(stdin),
            state: tokio::sync::Mutex::new(State {
                phase: Phase::Initializing,
                queue: VecDeque::new(),
            }),
            translator: std::sync::Mutex::new(Translator::new()),
            thread_id: std::sync::Mutex::new(None),
            turn_id: Arc::new(std::sync::Mutex::new(None)),
            rate_limits: std::sync::Mutex::new(RateLimitSnapshot::default()),
            output,
        })
    }

    /// The session this adapter serves.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.config.session_id
    }

    /// Last cached rate limits.
    #[must_use]
    pub fn rate_limits(&self) -> RateLimitSnapshot {
        self.rate_limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Drive the init handshake: `initialize`, then `thread/start` or
    /// `thread/resume`, then flush the queue. Spawned by the owner right
    /// after construction.
    pub async fn run_handshake(self: Arc<Self>) {
        let init_params = InitializeParams {
            client_info: ClientInfo {
                name: "switchboard".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let params = serde_json::to_value(&init_params).unwrap_or(Value::Null);
        if let Err(e) = self.peer.request(codex::INITIALIZE, params).await {
            self.fail_init(format!("initialize failed: {e}")).await;
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.phase = Phase::AwaitingThread;
        }

        let thread_reply = match &self.config.resume_thread_id {
            Some(thread_id) => {
                let params = ThreadResumeParams {
                    thread_id: thread_id.clone(),
                    cwd: self.config.working_dir.clone(),
                    model: self.config.model.clone(),
                    sandbox: self.config.sandbox,
                    approval_policy: self.config.approval_policy,
                };
                self.peer
                    .request(
                        codex::THREAD_RESUME,
                        serde_json::to_value(&params).unwrap_or(Value::Null),
                    )
                    .await
            },
            None => {
                let params = ThreadStartParams {
                    cwd: self.config.working_dir.clone(),
                    model: self.config.model.clone(),
                    sandbox: self.config.sandbox,
                    approval_policy: self.config.approval_policy,
                };
                self.peer
                    .request(
                        codex::THREAD_START,
                        serde_json::to_value(&params).unwrap_or(Value::Null),
                    )
                    .await
            },
        };

        let thread_id = match thread_reply {
            Ok(value) => match serde_json::from_value::<ThreadResult>(value) {
                Ok(result) => result.thread_id,
                Err(e) => {
                    self.fail_init(format!("malformed thread reply: {e}")).await;
                    return;
                },
            },
            Err(e) => {
                self.fail_init(format!("thread request failed: {e}")).await;
                return;
            },
        };

        info!(session = %self.config.session_id, thread = %thread_id, "codex thread ready");
        *self
            .thread_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(thread_id.clone());

        self.emit(CodexOutput::ThreadStarted {
            thread_id: thread_id.clone(),
        });
        self.emit(CodexOutput::Browser(BrowserEvent::SessionInit {
            session: json!({
                "session_id": self.config.session_id,
                "backend": "codex",
                "cli_internal_id": thread_id,
                "model": self.config.model,
                "cwd": self.config.working_dir,
            }),
        }));

        // Best-effort side read; failure only costs the cache.
        let adapter = Arc::clone(&self);
        tokio::spawn(async move {
            match adapter.peer.request(codex::RATE_LIMITS_READ, json!({})).await {
                Ok(value) => adapter.update_rate_limits(&value),
                Err(e) => debug!(error = %e, "rate limit read failed"),
            }
        });

        // Flush under the lock so nothing received mid-flush interleaves.
        let mut state = self.state.lock().await;
        let queued: Vec<QueuedIntent> = state.queue.drain(..).collect();
        for intent in queued {
            self.dispatch(intent).await;
        }
        state.phase = Phase::Ready;
        drop(state);
    }

    /// Accept a browser intent.
    ///
    /// Before `Ready`, only `user_message`, `permission_response`, and
    /// `interrupt` are queued; `set_model` and `set_permission_mode` are
    /// unsupported in any phase.
    ///
    /// # Errors
    ///
    /// [`CodexSendError::Unsupported`] for operations this backend does not
    /// expose, [`CodexSendError::InitFailed`] after a failed handshake, and
    /// [`CodexSendError::NotReady`] for non-queueable commands received
    /// before the handshake completed.
    pub async fn send_command(&self, command: ClientCommand) -> Result<(), CodexSendError> {
        match &command {
            ClientCommand::SetModel { .. } => {
                return Err(CodexSendError::Unsupported("set_model"));
            },
            ClientCommand::SetPermissionMode { .. } => {
                return Err(CodexSendError::Unsupported("set_permission_mode"));
            },
            _ => {},
        }

        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Failed => Err(CodexSendError::InitFailed),
            Phase::Ready => {
                drop(state);
                self.dispatch_ready(command).await;
                Ok(())
            },
            Phase::Initializing | Phase::AwaitingThread => {
                let intent = match command {
                    ClientCommand::UserMessage { content, .. } => {
                        QueuedIntent::UserMessage(content)
                    },
                    ClientCommand::PermissionResponse {
                        request_id,
                        behavior,
                        updated_input,
                        updated_permissions,
                        ..
                    } => QueuedIntent::PermissionResponse {
                        request_id,
                        behavior,
                        updated_input,
                        updated_permissions,
                    },
                    ClientCommand::Interrupt { .. } => QueuedIntent::Interrupt,
                    _ => return Err(CodexSendError::NotReady),
                };
                if state.queue.len() >= QUEUE_LIMIT {
                    state.queue.pop_front();
                    self.emit(CodexOutput::Browser(BrowserEvent::Error {
                        message: "intent queue overflow: oldest buffered intent dropped"
                            .to_string(),
                    }));
                }
                state.queue.push_back(intent);
                Ok(())
            },
        }
    }

    /// Feed one stdout line from the subprocess.
    pub async fn handle_line(&self, line: &str) {
        match self.peer.dispatch_line(line) {
            None => {},
            Some(Inbound::Notification { method, params }) => {
                self.handle_notification(&method, params);
            },
            Some(Inbound::Request { id, method, params }) => {
                self.handle_server_request(id, &method, params).await;
            },
        }
    }

    /// Deliver a JSON-RPC reply composed by the arbiter.
    pub async fn rpc_reply(&self, id: Value, result: Value) {
        if let Err(e) = self.peer.reply(id, result).await {
            warn!(session = %self.config.session_id, error = %e, "approval reply failed");
        }
    }

    /// The subprocess exited: fail pending calls, reject future sends.
    pub async fn on_process_exit(&self) {
        self.peer.fail_all_pending();
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.phase = Phase::Failed;
    }

    async fn fail_init(&self, message: String) {
        warn!(session = %self.config.session_id, "{message}");
        let mut state = self.state.lock().await;
        state.queue.clear();
        state.phase = Phase::Failed;
        drop(state);
        self.emit(CodexOutput::Browser(BrowserEvent::Error {
            message: message.clone(),
        }));
        self.emit(CodexOutput::InitError { message });
    }

    async fn dispatch_ready(&self, command: ClientCommand) {
        match command {
            ClientCommand::UserMessage { content, .. } => {
                self.dispatch(QueuedIntent::UserMessage(content)).await;
            },
            ClientCommand::PermissionResponse {
                request_id,
                behavior,
                updated_input,
                updated_permissions,
                ..
            } => {
                self.dispatch(QueuedIntent::PermissionResponse {
                    request_id,
                    behavior,
                    updated_input,
                    updated_permissions,
                })
                .await;
            },
            ClientCommand::Interrupt { .. } => self.dispatch(QueuedIntent::Interrupt).await,
            ClientCommand::McpGetStatus { .. } => {
                let event = mcp::get_status(&self.peer).await;
                self.emit(CodexOutput::Browser(event));
            },
            ClientCommand::McpToggle {
                server, enabled, ..
            } => {
                let event = mcp::toggle(&self.peer, &server, enabled).await;
                self.emit(CodexOutput::Browser(event));
            },
            ClientCommand::McpReconnect { server, .. } => {
                let event = mcp::reconnect(&self.peer, &server).await;
                self.emit(CodexOutput::Browser(event));
            },
            ClientCommand::McpSetServers { servers, .. } => {
                let event = mcp::set_servers(&self.peer, &servers).await;
                self.emit(CodexOutput::Browser(event));
            },
            ClientCommand::SessionSubscribe { .. }
            | ClientCommand::SessionAck { .. }
            | ClientCommand::SetModel { .. }
            | ClientCommand::SetPermissionMode { .. } => {},
        }
    }

    async fn dispatch(&self, intent: QueuedIntent) {
        match intent {
            QueuedIntent::UserMessage(content) => self.start_turn(&content).await,
            QueuedIntent::PermissionResponse {
                request_id,
                behavior,
                updated_input,
                updated_permissions,
            } => {
                self.emit(CodexOutput::PermissionResponse {
                    request_id,
                    behavior,
                    updated_input,
                    updated_permissions,
                });
            },
            QueuedIntent::Interrupt => self.interrupt_turn().await,
        }
    }

    async fn start_turn(&self, content: &Value) {
        let Some(thread_id) = self
            .thread_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
        else {
            warn!(session = %self.config.session_id, "user message before thread was ready");
            return;
        };
        let text = user_text(content);
        let params = TurnStartParams {
            thread_id,
            input: vec![UserInputItem::Text { text }],
        };
        // The frame is written in call order here; the reply is awaited off
        // to the side so a slow backend cannot stall the intent path.
        let pending = match self
            .peer
            .request_detached(
                codex::TURN_START,
                serde_json::to_value(&params).unwrap_or(Value::Null),
            )
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(session = %self.config.session_id, error = %e, "turn/start failed");
                self.emit(CodexOutput::Browser(BrowserEvent::Error {
                    message: format!("failed to start turn: {e}"),
                }));
                return;
            },
        };
        let turn_slot = Arc::clone(&self.turn_id);
        let output = self.output.clone();
        let session_id = self.config.session_id;
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(value) => {
                    if let Ok(result) = serde_json::from_value::<TurnStartResult>(value) {
                        *turn_slot
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner) =
                            Some(result.turn_id);
                    }
                },
                Err(e) => {
                    warn!(session = %session_id, error = %e, "turn/start failed");
                    let _ = output.send(CodexOutput::Browser(BrowserEvent::Error {
                        message: format!("failed to start turn: {e}"),
                    }));
                },
            }
        });
    }

    async fn interrupt_turn(&self) {
        let thread_id = self
            .thread_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let turn_id = self
            .turn_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let (Some(thread_id), Some(turn_id)) = (thread_id, turn_id) else {
            // No turn to scope the interrupt to.
            return;
        };
        let params = TurnInterruptParams { thread_id, turn_id };
        if let Err(e) = self
            .peer
            .notify(
                codex::TURN_INTERRUPT,
                serde_json::to_value(&params).unwrap_or(Value::Null),
            )
            .await
        {
            warn!(session = %self.config.session_id, error = %e, "turn/interrupt failed");
        }
    }

    fn handle_notification(&self, method: &str, params: Value) {
        match method {
            codex::ITEM_STARTED => {
                let Ok(parsed) = serde_json::from_value::<ItemLifecycleParams>(params) else {
                    warn!("malformed item/started params");
                    return;
                };
                let events = self
                    .translator
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .item_started(&parsed.item);
                for event in events {
                    self.emit(CodexOutput::Browser(event));
                }
            },
            codex::ITEM_COMPLETED => {
                let Ok(parsed) = serde_json::from_value::<ItemLifecycleParams>(params) else {
                    warn!("malformed item/completed params");
                    return;
                };
                let events = self
                    .translator
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .item_completed(&parsed.item);
                for event in events {
                    self.emit(CodexOutput::Browser(event));
                }
            },
            codex::TURN_COMPLETED => {
                *self
                    .turn_id
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
                // Flattened payloads must be objects.
                let payload = if params.is_object() { params } else { json!({}) };
                self.emit(CodexOutput::Browser(BrowserEvent::Result { payload }));
            },
            codex::RATE_LIMITS_UPDATED => self.update_rate_limits(&params),
            other => {
                if let Some(kind) = codex::delta_kind(other) {
                    let kind = kind.to_string();
                    let Ok(parsed) = serde_json::from_value::<ItemDeltaParams>(params) else {
                        warn!(method = other, "malformed item delta params");
                        return;
                    };
                    let events = self
                        .translator
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .item_delta(&parsed.item_id, &kind, &parsed.delta);
                    for event in events {
                        self.emit(CodexOutput::Browser(event));
                    }
                } else {
                    warn!(method = other, "unknown notification dropped");
                }
            },
        }
    }

    async fn handle_server_request(&self, id: Value, method: &str, params: Value) {
        let session_id = self.config.session_id;
        match method {
            codex::CMD_REQUEST_APPROVAL | codex::EXEC_COMMAND_APPROVAL => {
                let Ok(parsed) = serde_json::from_value::<CommandApprovalParams>(params) else {
                    self.reject_request(id, method, "malformed params").await;
                    return;
                };
                let origin = if method == codex::EXEC_COMMAND_APPROVAL {
                    PermissionOrigin::CodexReview { rpc_id: id }
                } else {
                    PermissionOrigin::CodexDecision { rpc_id: id }
                };
                let mut input = json!({"command": codex::command_display(&parsed.command)});
                if let (Value::Object(map), Some(cwd)) = (&mut input, &parsed.cwd) {
                    map.insert("cwd".to_string(), Value::String(cwd.clone()));
                }
                self.emit(CodexOutput::Permission(Box::new(PendingPermission::new(
                    session_id, "Bash", input, origin,
                ))));
            },
            codex::FILE_CHANGE_REQUEST_APPROVAL | codex::APPLY_PATCH_APPROVAL => {
                let Ok(parsed) = serde_json::from_value::<FileChangeApprovalParams>(params)
                else {
                    self.reject_request(id, method, "malformed params").await;
                    return;
                };
                let origin = if method == codex::APPLY_PATCH_APPROVAL {
                    PermissionOrigin::CodexReview { rpc_id: id }
                } else {
                    PermissionOrigin::CodexDecision { rpc_id: id }
                };
                let input = json!({
                    "file_paths": parsed.file_paths,
                    "changes": parsed.changes.unwrap_or_else(|| json!([])),
                });
                self.emit(CodexOutput::Permission(Box::new(PendingPermission::new(
                    session_id, "Edit", input, origin,
                ))));
            },
            codex::MCP_TOOL_REQUEST_APPROVAL => {
                let Ok(parsed) = serde_json::from_value::<McpToolApprovalParams>(params) else {
                    self.reject_request(id, method, "malformed params").await;
                    return;
                };
                let tool_name = format!("mcp:{}:{}", parsed.server, parsed.tool);
                let input = parsed.input.unwrap_or_else(|| json!({}));
                self.emit(CodexOutput::Permission(Box::new(PendingPermission::new(
                    session_id,
                    tool_name,
                    input,
                    PermissionOrigin::CodexDecision { rpc_id: id },
                ))));
            },
            codex::DYNAMIC_TOOL_CALL => {
                let Ok(parsed) = serde_json::from_value::<DynamicToolCallParams>(params) else {
                    self.reject_request(id, method, "malformed params").await;
                    return;
                };
                let tool_name = format!("dynamic:{}", parsed.tool);
                let input = parsed.input.clone().unwrap_or_else(|| json!({}));
                // The browser sees the tool_use block up front; the result
                // arrives on resolution (or as an error on timeout).
                self.emit(CodexOutput::Browser(BrowserEvent::Assistant {
                    payload: blocks::assistant_payload(
                        &format!("dynamic-{}", parsed.call_id),
                        vec![blocks::tool_use_block(
                            &parsed.call_id,
                            &tool_name,
                            input.clone(),
                        )],
                    ),
                }));
                self.emit(CodexOutput::Permission(Box::new(PendingPermission::new(
                    session_id,
                    tool_name,
                    input,
                    PermissionOrigin::CodexDynamicTool {
                        rpc_id: id,
                        call_id: parsed.call_id,
                    },
                ))));
            },
            codex::REQUEST_USER_INPUT => {
                let Ok(parsed) = serde_json::from_value::<UserInputRequestParams>(params) else {
                    self.reject_request(id, method, "malformed params").await;
                    return;
                };
                let input = json!({
                    "questions": serde_json::to_value(&parsed.questions).unwrap_or(Value::Null),
                });
                self.emit(CodexOutput::Permission(Box::new(PendingPermission::new(
                    session_id,
                    "AskUserQuestion",
                    input,
                    PermissionOrigin::CodexUserInput {
                        rpc_id: id,
                        questions: parsed.questions,
                    },
                ))));
            },
            other => {
                warn!(method = other, "unknown server request");
                if let Err(e) = self.peer.reply_error(id, -32601, "method not found").await {
                    warn!(error = %e, "failed to reject unknown request");
                }
            },
        }
    }

    async fn reject_request(&self, id: Value, method: &str, reason: &str) {
        warn!(method, reason, "rejecting server request");
        if let Err(e) = self.peer.reply_error(id, -32602, reason).await {
            warn!(error = %e, "failed to send rejection");
        }
    }

    fn update_rate_limits(&self, value: &Value) {
        let snapshot: RateLimitSnapshot =
            serde_json::from_value(value.clone()).unwrap_or_default();
        *self
            .rate_limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot.clone();
        self.emit(CodexOutput::RateLimits(snapshot));
    }

    fn emit(&self, output: CodexOutput) {
        if self.output.send(output).is_err() {
            debug!(session = %self.config.session_id, "adapter output receiver gone");
        }
    }
}

impl std::fmt::Debug for CodexAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodexAdapter")
            .field("session_id", &self.config.session_id)
            .finish_non_exhaustive()
    }
}

/// Pull the prompt text out of a browser `user_message` content value.
fn user_text(content: &Value) -> String {
    if let Some(text) = content.as_str() {
        return text.to_string();
    }
    if let Some(text) = content.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    content.to_string()
}
