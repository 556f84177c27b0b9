//! Per-session fan-out and command routing.
//!
//! One [`SessionHub`] per session: the event ring, the attached browser
//! connections (each with a bounded outbound queue), the dedup window for
//! client idempotency tokens, and the loopback CLI socket for Claude
//! sessions. The [`Bridge`] owns the hubs, the permission arbiter, and the
//! launcher, and routes everything between them.
//!
//! Lock order inside a hub is always ring → history → connections; every
//! critical section is small and synchronous.

use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchboard_approval::{
    Decision, PendingPermission, PermissionArbiter, PermissionOrigin, ReplyAction, Resolution,
};
use switchboard_claude::{ClaudeAdapter, ClaudeInbound};
use switchboard_codex::CodexOutput;
use switchboard_core::session::BackendKind;
use switchboard_core::types::SessionId;
use switchboard_launcher::{Launcher, LauncherEvent};
use switchboard_protocol::browser::{
    BrowserEvent, ClientCommand, PermissionBehavior, sequenced_json,
};
use switchboard_protocol::codex::RateLimitSnapshot;

use crate::ring::EventRing;

/// Bounded per-connection write queue; overflow closes the connection.
pub(crate) const CONN_QUEUE_LIMIT: usize = 64;
/// How many messages the history snapshot keeps.
const HISTORY_LIMIT: usize = 1024;
/// Dedup window for client idempotency tokens.
const DEDUP_TOKEN_LIMIT: usize = 128;
/// Browser intents buffered while the Claude CLI has not dialed back yet.
const PENDING_CLI_LIMIT: usize = 256;
/// Cadence of the permission timeout sweep.
const EXPIRE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct BrowserConn {
    tx: mpsc::Sender<String>,
    last_acked: u64,
}

/// Per-session fan-out state.
pub struct SessionHub {
    session_id: SessionId,
    ring: Mutex<EventRing>,
    history: Mutex<VecDeque<Value>>,
    connections: Mutex<HashMap<u64, BrowserConn>>,
    next_conn_id: AtomicU64,
    recent_tokens: Mutex<VecDeque<String>>,
    claude: ClaudeAdapter,
    cli: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending_cli: Mutex<VecDeque<String>>,
}

impl SessionHub {
    fn new(session_id: SessionId, ring_capacity: usize) -> Self {
        Self {
            session_id,
            ring: Mutex::new(EventRing::new(ring_capacity)),
            history: Mutex::new(VecDeque::new()),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            recent_tokens: Mutex::new(VecDeque::new()),
            claude: ClaudeAdapter::new(session_id),
            cli: Mutex::new(None),
            pending_cli: Mutex::new(VecDeque::new()),
        }
    }

    /// Sequence a message, record it, and fan it out to every attached
    /// connection. Slow consumers are pruned, not waited on.
    fn publish(&self, message: Value) -> u64 {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = ring.append(message.clone());
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back(message.clone());
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        let line = sequenced_json(&message, seq).to_string();
        let mut dropped = Vec::new();
        {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (id, conn) in connections.iter() {
                if conn.tx.try_send(line.clone()).is_err() {
                    dropped.push(*id);
                }
            }
            for id in &dropped {
                connections.remove(id);
            }
        }
        drop(ring);
        for id in dropped {
            warn!(session = %self.session_id, conn = id, "slow or closed browser connection dropped");
        }
        seq
    }

    /// Attach a browser connection: preamble (`session_init`,
    /// `message_history`, one `event_replay`) is queued before the
    /// connection joins the live fan-out, all under the ring lock, so no
    /// event can be missed or reordered around the replay.
    fn subscribe(&self, last_seq: u64, session_snapshot: Value, tx: mpsc::Sender<String>) -> u64 {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);

        let init = serde_json::to_value(BrowserEvent::SessionInit {
            session: session_snapshot,
        })
        .unwrap_or(Value::Null);
        let history_messages: Vec<Value> = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.iter().cloned().collect()
        };
        let history = serde_json::to_value(BrowserEvent::MessageHistory {
            messages: history_messages,
        })
        .unwrap_or(Value::Null);

        let _ = tx.try_send(init.to_string());
        let _ = tx.try_send(history.to_string());

        let replay = ring.replay_from(last_seq);
        if !replay.is_empty() {
            let batch = serde_json::to_value(BrowserEvent::EventReplay { events: replay })
                .unwrap_or(Value::Null);
            let _ = tx.try_send(batch.to_string());
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                conn_id,
                BrowserConn {
                    tx,
                    last_acked: last_seq,
                },
            );
        drop(ring);
        conn_id
    }

    fn unsubscribe(&self, conn_id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn_id);
    }

    fn set_acked(&self, conn_id: u64, last_seq: u64) {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = connections.get_mut(&conn_id) {
            conn.last_acked = conn.last_acked.max(last_seq);
        }
    }

    /// Remember an idempotency token; `false` means duplicate (drop it).
    fn remember_token(&self, token: &str) -> bool {
        let mut recent = self
            .recent_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if recent.iter().any(|t| t == token) {
            return false;
        }
        recent.push_back(token.to_string());
        while recent.len() > DEDUP_TOKEN_LIMIT {
            recent.pop_front();
        }
        true
    }

    /// Send a line to the CLI side; buffered until the CLI dials back.
    fn cli_send(&self, line: String) {
        let cli = self.cli.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = cli.as_ref() {
            if tx.send(line.clone()).is_ok() {
                return;
            }
        }
        drop(cli);
        let mut pending = self
            .pending_cli
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.push_back(line);
        while pending.len() > PENDING_CLI_LIMIT {
            pending.pop_front();
        }
    }

    fn attach_cli(&self, tx: mpsc::UnboundedSender<String>) {
        let queued: Vec<String> = {
            let mut pending = self
                .pending_cli
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pending.drain(..).collect()
        };
        for line in queued {
            let _ = tx.send(line);
        }
        *self.cli.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn detach_cli(&self) {
        *self.cli.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("session_id", &self.session_id)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// The bridge: hubs, arbiter, launcher, and the routing between them.
pub struct Bridge {
    launcher: Arc<Launcher>,
    arbiter: PermissionArbiter,
    hubs: Mutex<HashMap<SessionId, Arc<SessionHub>>>,
    ring_capacity: usize,
}

impl Bridge {
    /// Create the bridge around a launcher.
    #[must_use]
    pub fn new(launcher: Arc<Launcher>, ring_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            arbiter: PermissionArbiter::new(),
            hubs: Mutex::new(HashMap::new()),
            ring_capacity,
        })
    }

    /// The launcher behind this bridge.
    #[must_use]
    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    /// Start the launcher-event loop and the permission timeout sweeper.
    pub fn start(self: &Arc<Self>, events: mpsc::UnboundedReceiver<LauncherEvent>) {
        let bridge = Arc::clone(self);
        tokio::spawn(bridge.event_loop(events));

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EXPIRE_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                for resolution in bridge.arbiter.expire(tokio::time::Instant::now()) {
                    bridge.apply_resolution(resolution).await;
                }
            }
        });
    }

    fn hub(&self, session_id: SessionId) -> Arc<SessionHub> {
        let mut hubs = self.hubs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            hubs.entry(session_id)
                .or_insert_with(|| Arc::new(SessionHub::new(session_id, self.ring_capacity))),
        )
    }

    /// Fan a typed event out to a session.
    pub fn emit(&self, session_id: SessionId, event: &BrowserEvent) {
        let message = match serde_json::to_value(event) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = %session_id, error = %e, "unserializable event dropped");
                return;
            },
        };
        self.hub(session_id).publish(message);
    }

    /// Fan a raw passthrough message out to a session.
    pub fn emit_raw(&self, session_id: SessionId, message: Value) {
        self.hub(session_id).publish(message);
    }

    // ------------------------------------------------------------------
    // Browser side
    // ------------------------------------------------------------------

    /// Attach a browser connection after its `session_subscribe`.
    pub async fn subscribe_browser(
        &self,
        session_id: SessionId,
        last_seq: u64,
        tx: mpsc::Sender<String>,
    ) -> u64 {
        let snapshot = self
            .launcher
            .session(session_id)
            .await
            .and_then(|info| serde_json::to_value(info).ok())
            .unwrap_or(Value::Null);
        let conn_id = self.hub(session_id).subscribe(last_seq, snapshot, tx);
        info!(session = %session_id, conn = conn_id, last_seq, "browser subscribed");
        conn_id
    }

    /// Detach a browser connection.
    pub fn unsubscribe_browser(&self, session_id: SessionId, conn_id: u64) {
        self.hub(session_id).unsubscribe(conn_id);
    }

    /// Route one inbound browser command.
    pub async fn handle_client_command(
        &self,
        session_id: SessionId,
        conn_id: u64,
        command: ClientCommand,
    ) {
        let hub = self.hub(session_id);
        if let Some(token) = command.client_msg_id() {
            if !hub.remember_token(token) {
                debug!(session = %session_id, token, "duplicate client message dropped");
                return;
            }
        }
        match command {
            ClientCommand::SessionSubscribe { .. } => {
                // Handled at the socket layer; a re-subscribe mid-stream is
                // ignored.
            },
            ClientCommand::SessionAck { last_seq } => hub.set_acked(conn_id, last_seq),
            command => {
                let backend = self.launcher.session(session_id).await.map(|s| s.backend);
                match backend {
                    Some(BackendKind::Claude) => {
                        self.claude_command(hub.as_ref(), session_id, command).await;
                    },
                    Some(BackendKind::Codex) => {
                        self.codex_command(session_id, command).await;
                    },
                    None => {
                        self.emit(
                            session_id,
                            &BrowserEvent::Error {
                                message: "unknown session".to_string(),
                            },
                        );
                    },
                }
            },
        }
    }

    async fn claude_command(
        &self,
        hub: &SessionHub,
        session_id: SessionId,
        command: ClientCommand,
    ) {
        match command {
            ClientCommand::UserMessage { content, .. } => {
                self.emit(
                    session_id,
                    &BrowserEvent::UserMessage {
                        content: content.clone(),
                    },
                );
                let line = json!({
                    "type": "user",
                    "message": {"role": "user", "content": content},
                });
                hub.cli_send(line.to_string());
            },
            ClientCommand::PermissionResponse {
                request_id,
                behavior,
                updated_input,
                updated_permissions,
                ..
            } => {
                let decision = decision_from(behavior, updated_input, updated_permissions);
                if let Some(resolution) = self.arbiter.resolve(&request_id, &decision) {
                    self.apply_resolution(resolution).await;
                }
            },
            ClientCommand::Interrupt { .. } => {
                hub.cli_send(control_line("interrupt", json!({})));
            },
            ClientCommand::SetModel { model, .. } => {
                hub.cli_send(control_line("set_model", json!({"model": model})));
            },
            ClientCommand::SetPermissionMode { mode, .. } => {
                hub.cli_send(control_line("set_permission_mode", json!({"mode": mode})));
            },
            ClientCommand::McpGetStatus { .. }
            | ClientCommand::McpToggle { .. }
            | ClientCommand::McpReconnect { .. }
            | ClientCommand::McpSetServers { .. } => {
                self.emit(
                    session_id,
                    &BrowserEvent::Error {
                        message: "mcp management is not supported for this backend".to_string(),
                    },
                );
            },
            ClientCommand::SessionSubscribe { .. } | ClientCommand::SessionAck { .. } => {},
        }
    }

    async fn codex_command(&self, session_id: SessionId, command: ClientCommand) {
        let Some(adapter) = self.launcher.codex_adapter(session_id).await else {
            self.emit(
                session_id,
                &BrowserEvent::Error {
                    message: "session has no live backend".to_string(),
                },
            );
            return;
        };
        if let ClientCommand::UserMessage { content, .. } = &command {
            self.emit(
                session_id,
                &BrowserEvent::UserMessage {
                    content: content.clone(),
                },
            );
        }
        if let Err(e) = adapter.send_command(command).await {
            self.emit(
                session_id,
                &BrowserEvent::Error {
                    message: e.to_string(),
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // CLI loopback side (Claude)
    // ------------------------------------------------------------------

    /// The CLI side of a session dialed back.
    pub async fn attach_cli(&self, session_id: SessionId, tx: mpsc::UnboundedSender<String>) {
        self.hub(session_id).attach_cli(tx);
        self.launcher
            .update_state(session_id, switchboard_core::session::SessionState::Connected)
            .await;
        self.emit(session_id, &BrowserEvent::CliConnected);
    }

    /// The CLI socket went away.
    pub fn detach_cli(&self, session_id: SessionId) {
        self.hub(session_id).detach_cli();
        self.emit(
            session_id,
            &BrowserEvent::CliDisconnected { exit_code: None },
        );
    }

    /// One NDJSON message from the CLI socket.
    pub async fn handle_cli_message(&self, session_id: SessionId, message: Value) {
        let hub = self.hub(session_id);
        match hub.claude.process(message) {
            ClaudeInbound::Forward(message) => self.emit_raw(session_id, message),
            ClaudeInbound::OtherControl(message) => self.emit_raw(session_id, message),
            ClaudeInbound::SessionInit {
                cli_session_id,
                message,
            } => {
                if let Some(cli_id) = cli_session_id {
                    self.launcher.set_cli_internal_id(session_id, cli_id).await;
                }
                let snapshot = self
                    .launcher
                    .session(session_id)
                    .await
                    .and_then(|info| serde_json::to_value(info).ok())
                    .unwrap_or(Value::Null);
                let session = merge_objects(snapshot, &message);
                self.emit(session_id, &BrowserEvent::SessionInit { session });
            },
            ClaudeInbound::Permission(request) => {
                let tool_name = request
                    .request
                    .tool_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                let input = request.request.input.clone().unwrap_or_else(|| json!({}));
                let pending = PendingPermission::new(
                    session_id,
                    tool_name,
                    input,
                    PermissionOrigin::ClaudeControl {
                        cli_request_id: request.request_id,
                    },
                );
                let event = self.arbiter.register(pending);
                self.emit(session_id, &event);
            },
        }
    }

    // ------------------------------------------------------------------
    // Out-of-band pushes
    // ------------------------------------------------------------------

    /// PR status pushed from the HTTP subsystem, wrapped as a sequenced
    /// event.
    pub fn push_pr_status(&self, session_id: SessionId, payload: Value) {
        self.emit(session_id, &BrowserEvent::PrStatusUpdate { payload });
    }

    /// Session rename pushed from the HTTP subsystem.
    pub fn push_session_name(&self, session_id: SessionId, name: String) {
        self.emit(session_id, &BrowserEvent::SessionNameUpdate { name });
    }

    /// Current rate limits for a Codex session (HTTP surface).
    pub async fn rate_limits(&self, session_id: SessionId) -> Option<RateLimitSnapshot> {
        let adapter = self.launcher.codex_adapter(session_id).await?;
        Some(adapter.rate_limits())
    }

    // ------------------------------------------------------------------
    // Launcher events & resolutions
    // ------------------------------------------------------------------

    async fn event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<LauncherEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                LauncherEvent::SessionUpdate { info } => {
                    let session = serde_json::to_value(&info).unwrap_or(Value::Null);
                    self.emit(info.session_id, &BrowserEvent::SessionUpdate { session });
                },
                LauncherEvent::SessionExited {
                    session_id,
                    exit_code,
                } => {
                    for cancelled in self.arbiter.cancel_session(&session_id) {
                        self.emit(session_id, &cancelled);
                    }
                    self.emit(
                        session_id,
                        &BrowserEvent::CliDisconnected {
                            exit_code: Some(exit_code),
                        },
                    );
                },
                LauncherEvent::LaunchError {
                    session_id,
                    message,
                } => {
                    self.emit(session_id, &BrowserEvent::Error { message });
                },
                LauncherEvent::Codex { session_id, output } => {
                    self.handle_codex_output(session_id, output).await;
                },
            }
        }
    }

    async fn handle_codex_output(&self, session_id: SessionId, output: CodexOutput) {
        match output {
            CodexOutput::Browser(event) => self.emit(session_id, &event),
            CodexOutput::Permission(pending) => {
                let event = self.arbiter.register(*pending);
                self.emit(session_id, &event);
            },
            CodexOutput::PermissionResponse {
                request_id,
                behavior,
                updated_input,
                updated_permissions,
            } => {
                let decision = decision_from(behavior, updated_input, updated_permissions);
                if let Some(resolution) = self.arbiter.resolve(&request_id, &decision) {
                    self.apply_resolution(resolution).await;
                }
            },
            CodexOutput::RateLimits(snapshot) => {
                let payload = json!({
                    "kind": "rate_limit_update",
                    "limits": serde_json::to_value(&snapshot).unwrap_or(Value::Null),
                });
                self.emit(session_id, &BrowserEvent::TaskNotification { payload });
            },
            // The launcher already folded these into the session record.
            CodexOutput::ThreadStarted { .. } | CodexOutput::InitError { .. } => {},
        }
    }

    /// Deliver a resolution: backend reply plus its browser events.
    pub async fn apply_resolution(&self, resolution: Resolution) {
        let session_id = resolution.session_id;
        match resolution.reply {
            ReplyAction::ClaudeControlResponse { message } => {
                self.hub(session_id).cli_send(message.to_string());
            },
            ReplyAction::CodexReply { id, result } => {
                if let Some(adapter) = self.launcher.codex_adapter(session_id).await {
                    adapter.rpc_reply(id, result).await;
                } else {
                    warn!(session = %session_id, "approval reply with no live codex adapter");
                }
            },
        }
        for event in resolution.browser_events {
            self.emit(session_id, &event);
        }
    }

    /// Pending permission count (diagnostics).
    #[must_use]
    pub fn pending_permissions(&self) -> usize {
        self.arbiter.pending_count()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("ring_capacity", &self.ring_capacity)
            .finish_non_exhaustive()
    }
}

fn decision_from(
    behavior: PermissionBehavior,
    updated_input: Option<Value>,
    updated_permissions: Option<Value>,
) -> Decision {
    match behavior {
        PermissionBehavior::Allow => Decision::Allow {
            updated_input,
            updated_permissions,
        },
        PermissionBehavior::Deny => Decision::Deny,
    }
}

/// A control line on the CLI socket (interrupt, set_model, …).
fn control_line(subtype: &str, mut request: Value) -> String {
    if let Value::Object(map) = &mut request {
        map.insert("subtype".to_string(), Value::String(subtype.to_string()));
    }
    json!({
        "type": "control_request",
        "request_id": Uuid::new_v4().to_string(),
        "request": request,
    })
    .to_string()
}

/// Overlay interesting CLI init fields onto the session snapshot.
fn merge_objects(base: Value, overlay: &Value) -> Value {
    let mut out = match base {
        Value::Object(map) => Value::Object(map),
        _ => json!({}),
    };
    if let (Value::Object(out_map), Value::Object(overlay_map)) = (&mut out, overlay) {
        for (key, value) in overlay_map {
            if key == "type" || key == "subtype" {
                continue;
            }
            out_map
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
    out
}
