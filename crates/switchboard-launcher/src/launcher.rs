//! The session supervisor.
//!
//! Owns the session registry, spawns subprocesses through the backend
//! adapters, watches exits (with the crash-loop grace window that clears a
//! stale resume token), and keeps the on-disk snapshot current. Long
//! operations (kill waits, handshakes) run outside the registry lock;
//! the lock only guards small state updates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use switchboard_codex::{CodexAdapter, CodexConfig, CodexOutput};
use switchboard_core::session::{
    ApprovalPolicy, BackendKind, LaunchOptions, PermissionMode, SessionInfo, SessionState,
};
use switchboard_core::types::SessionId;

use crate::handle::{KILLED_EXIT_CODE, SubprocessHandle, pid_alive};
use crate::store::SessionStore;
use crate::worktree::inject_guardrails;

/// SIGTERM-to-SIGKILL grace for `kill`.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Old-process kill deadline during `relaunch`.
const RELAUNCH_KILL_GRACE: Duration = Duration::from_secs(2);
/// A resume-spawned process dying inside this window clears the resume
/// token, so the next relaunch starts a fresh conversation.
const CRASH_LOOP_GRACE: Duration = Duration::from_secs(5);

/// Launcher configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Directory for the snapshot file.
    pub data_dir: PathBuf,
    /// Claude-style CLI binary (name or path).
    pub claude_binary: String,
    /// Codex-style CLI binary (name or path).
    pub codex_binary: String,
    /// Port of the bridge's WebSocket listener, for `--sdk-url`.
    pub loopback_port: u16,
}

/// Events the launcher pushes to the bridge.
#[derive(Debug)]
pub enum LauncherEvent {
    /// A session record changed.
    SessionUpdate {
        /// The updated record.
        info: SessionInfo,
    },
    /// A subprocess exited.
    SessionExited {
        /// The session.
        session_id: SessionId,
        /// Exit code (-1 for killed).
        exit_code: i32,
    },
    /// A launch failed before the subprocess existed.
    LaunchError {
        /// The session.
        session_id: SessionId,
        /// User-visible reason.
        message: String,
    },
    /// Output from a Codex adapter, tagged with its session.
    Codex {
        /// The session.
        session_id: SessionId,
        /// The adapter output.
        output: CodexOutput,
    },
}

/// Launcher errors.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Unknown session id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}

/// Result alias for launcher operations.
pub type LauncherResult<T> = Result<T, LauncherError>;

struct SessionEntry {
    info: SessionInfo,
    opts: LaunchOptions,
    handle: Option<Arc<SubprocessHandle>>,
    codex: Option<Arc<CodexAdapter>>,
    launched_at: Option<Instant>,
    resume_used: bool,
    /// Bumped whenever the subprocess handle is replaced or deliberately
    /// taken, so a stale exit watcher cannot clobber a relaunched session.
    generation: u64,
}

/// The session supervisor.
pub struct Launcher {
    config: LauncherConfig,
    store: SessionStore,
    registry: Mutex<HashMap<SessionId, SessionEntry>>,
    events: mpsc::UnboundedSender<LauncherEvent>,
}

impl Launcher {
    /// Create a launcher; `events` feeds the bridge.
    #[must_use]
    pub fn new(config: LauncherConfig, events: mpsc::UnboundedSender<LauncherEvent>) -> Arc<Self> {
        let store = SessionStore::new(&config.data_dir);
        Arc::new(Self {
            config,
            store,
            registry: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Launch a new session.
    ///
    /// A failed spawn still creates the record — in `Exited` with code -1
    /// — and emits a user-visible `LaunchError`.
    pub async fn launch(self: &Arc<Self>, opts: LaunchOptions) -> SessionInfo {
        let session_id = SessionId::new();
        let info = SessionInfo::from_launch(session_id, &opts);
        {
            let mut registry = self.registry.lock().await;
            registry.insert(
                session_id,
                SessionEntry {
                    info: info.clone(),
                    opts: opts.clone(),
                    handle: None,
                    codex: None,
                    launched_at: None,
                    resume_used: false,
                    generation: 0,
                },
            );
        }
        self.persist().await;
        self.emit_update(&info);

        self.spawn_process(session_id, None).await;
        self.session(session_id).await.unwrap_or(info)
    }

    /// Kill the old subprocess (≤2 s grace), then spawn again with the
    /// resume token when one is known.
    ///
    /// # Errors
    ///
    /// [`LauncherError::SessionNotFound`] for unknown ids.
    pub async fn relaunch(self: &Arc<Self>, session_id: SessionId) -> LauncherResult<bool> {
        let (old_handle, resume) = {
            let mut registry = self.registry.lock().await;
            let entry = registry
                .get_mut(&session_id)
                .ok_or(LauncherError::SessionNotFound(session_id))?;
            let resume = entry.info.cli_internal_id.clone();
            entry.info.state = match entry.info.backend {
                BackendKind::Claude => SessionState::Starting,
                BackendKind::Codex => SessionState::Connected,
            };
            entry.info.exit_code = None;
            // Whatever the old watcher observes from here on is stale.
            entry.generation = entry.generation.saturating_add(1);
            (entry.handle.take(), resume)
        };

        if let Some(handle) = old_handle {
            if handle.is_alive() {
                // Best-effort: ignore how (or whether) the old one died.
                let _ = handle.terminate(RELAUNCH_KILL_GRACE).await;
            }
        }

        info!(session = %session_id, resume = ?resume, "relaunching session");
        self.spawn_process(session_id, resume).await;
        Ok(true)
    }

    /// SIGTERM → 5 s → SIGKILL. Marks the session exited with code -1.
    ///
    /// Returns `false` when there was no live subprocess to kill.
    ///
    /// # Errors
    ///
    /// [`LauncherError::SessionNotFound`] for unknown ids.
    pub async fn kill(&self, session_id: SessionId) -> LauncherResult<bool> {
        let handle = {
            let mut registry = self.registry.lock().await;
            let entry = registry
                .get_mut(&session_id)
                .ok_or(LauncherError::SessionNotFound(session_id))?;
            entry.generation = entry.generation.saturating_add(1);
            entry.handle.take()
        };
        let Some(handle) = handle else {
            return Ok(false);
        };
        if !handle.is_alive() {
            return Ok(false);
        }

        let _ = handle.terminate(KILL_GRACE).await;

        {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get_mut(&session_id) {
                entry.info.mark_exited(KILLED_EXIT_CODE);
                if let Some(codex) = &entry.codex {
                    codex.on_process_exit().await;
                }
            }
        }
        self.persist().await;
        let _ = self.events.send(LauncherEvent::SessionExited {
            session_id,
            exit_code: KILLED_EXIT_CODE,
        });
        Ok(true)
    }

    /// Rebuild the registry from the snapshot after a server restart.
    ///
    /// Claude sessions with a live pid go back to `Starting` (the bridge
    /// re-attaches when the CLI reconnects). Codex sessions cannot be
    /// re-attached over stdio and are treated as exited even when alive.
    /// Returns the count of recovered-alive sessions.
    pub async fn restore_from_disk(&self) -> usize {
        let Some(sessions) = self.store.load().await else {
            return 0;
        };
        let mut recovered: usize = 0;
        {
            let mut registry = self.registry.lock().await;
            for mut info in sessions {
                let alive = info.pid.is_some_and(pid_alive);
                if info.state != SessionState::Exited {
                    match (info.backend, alive) {
                        (BackendKind::Claude, true) => {
                            info.state = SessionState::Starting;
                            recovered = recovered.saturating_add(1);
                        },
                        (BackendKind::Codex, _) | (BackendKind::Claude, false) => {
                            info.mark_exited(info.exit_code.unwrap_or(KILLED_EXIT_CODE));
                        },
                    }
                }
                let opts = options_from_info(&info);
                registry.insert(
                    info.session_id,
                    SessionEntry {
                        info,
                        opts,
                        handle: None,
                        codex: None,
                        launched_at: None,
                        resume_used: false,
                        generation: 0,
                    },
                );
            }
        }
        self.persist().await;
        info!(recovered, "restored launcher snapshot");
        recovered
    }

    /// One session record.
    pub async fn session(&self, session_id: SessionId) -> Option<SessionInfo> {
        let registry = self.registry.lock().await;
        registry.get(&session_id).map(|e| e.info.clone())
    }

    /// All session records.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let registry = self.registry.lock().await;
        registry.values().map(|e| e.info.clone()).collect()
    }

    /// The Codex adapter for a session, when it has one.
    pub async fn codex_adapter(&self, session_id: SessionId) -> Option<Arc<CodexAdapter>> {
        let registry = self.registry.lock().await;
        registry.get(&session_id).and_then(|e| e.codex.clone())
    }

    /// Store the CLI's internal conversation id (adapter A init, Codex
    /// thread start). First capture wins; drift is logged, never adopted.
    pub async fn set_cli_internal_id(&self, session_id: SessionId, cli_id: String) {
        let updated = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&session_id) else {
                return;
            };
            match &entry.info.cli_internal_id {
                Some(current) if *current != cli_id => {
                    warn!(
                        session = %session_id,
                        stored = %current,
                        announced = %cli_id,
                        "cli internal id changed; keeping first"
                    );
                    None
                },
                Some(_) => None,
                None => {
                    entry.info.cli_internal_id = Some(cli_id);
                    Some(entry.info.clone())
                },
            }
        };
        if let Some(info) = updated {
            self.persist().await;
            self.emit_update(&info);
        }
    }

    /// Update the supervisor's view of a session state (bridge calls this
    /// on CLI socket attach/detach).
    pub async fn update_state(&self, session_id: SessionId, state: SessionState) {
        let updated = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&session_id) else {
                return;
            };
            if entry.info.state == SessionState::Exited {
                // Terminal; nothing moves a session out of it.
                return;
            }
            entry.info.state = state;
            entry.info.clone()
        };
        self.persist().await;
        self.emit_update(&updated);
    }

    /// Archive or unarchive a session.
    pub async fn set_archived(&self, session_id: SessionId, archived: bool) {
        let updated = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&session_id) else {
                return;
            };
            entry.info.archived = archived;
            entry.info.clone()
        };
        self.persist().await;
        self.emit_update(&updated);
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    async fn spawn_process(self: &Arc<Self>, session_id: SessionId, resume: Option<String>) {
        let opts = {
            let registry = self.registry.lock().await;
            let Some(entry) = registry.get(&session_id) else {
                return;
            };
            entry.opts.clone()
        };

        if let Some(worktree) = &opts.worktree {
            if let Err(e) = inject_guardrails(&opts.working_dir, worktree) {
                warn!(session = %session_id, error = %e, "worktree guardrail injection failed");
            }
        }

        let spawn_result = match opts.backend {
            BackendKind::Claude => self
                .spawn_claude(session_id, &opts, resume.as_deref())
                .map(|handle| (handle, None)),
            BackendKind::Codex => self.spawn_codex(session_id, &opts, resume.clone()),
        };

        match spawn_result {
            Ok((handle, codex)) => {
                let handle = Arc::new(handle);
                let pid = handle.pid();
                let generation = {
                    let mut registry = self.registry.lock().await;
                    let Some(entry) = registry.get_mut(&session_id) else {
                        return;
                    };
                    entry.info.pid = pid;
                    entry.info.exit_code = None;
                    entry.handle = Some(Arc::clone(&handle));
                    entry.codex = codex;
                    entry.launched_at = Some(Instant::now());
                    entry.resume_used = resume.is_some();
                    entry.generation = entry.generation.saturating_add(1);
                    entry.generation
                };
                self.persist().await;
                if let Some(info) = self.session(session_id).await {
                    self.emit_update(&info);
                }
                self.spawn_exit_watcher(session_id, handle, generation);
            },
            Err(message) => {
                warn!(session = %session_id, "{message}");
                {
                    let mut registry = self.registry.lock().await;
                    if let Some(entry) = registry.get_mut(&session_id) {
                        entry.info.mark_exited(KILLED_EXIT_CODE);
                    }
                }
                self.persist().await;
                let _ = self.events.send(LauncherEvent::LaunchError {
                    session_id,
                    message,
                });
                if let Some(info) = self.session(session_id).await {
                    self.emit_update(&info);
                }
            },
        }
    }

    fn spawn_claude(
        &self,
        session_id: SessionId,
        opts: &LaunchOptions,
        resume: Option<&str>,
    ) -> Result<SubprocessHandle, String> {
        let binary = resolve_binary(&self.config.claude_binary)
            .map_err(|e| format!("claude binary not found: {e}"))?;
        let mut command = switchboard_claude::build_command(
            &binary,
            session_id,
            self.config.loopback_port,
            opts,
            resume,
        );
        let mut handle = SubprocessHandle::spawn(&mut command)
            .map_err(|e| format!("failed to spawn claude subprocess: {e}"))?;

        // Stdout/stderr are drained for logging only; the CLI talks to the
        // bridge over the loopback WebSocket.
        if let Some(stdout) = handle.take_stdout() {
            spawn_log_drain(session_id, "stdout", stdout);
        }
        if let Some(stderr) = handle.take_stderr() {
            spawn_log_drain(session_id, "stderr", stderr);
        }
        Ok(handle)
    }

    fn spawn_codex(
        self: &Arc<Self>,
        session_id: SessionId,
        opts: &LaunchOptions,
        resume: Option<String>,
    ) -> Result<(SubprocessHandle, Option<Arc<CodexAdapter>>), String> {
        let binary = resolve_binary(&self.config.codex_binary)
            .map_err(|e| format!("codex binary not found: {e}"))?;
        let mut command = switchboard_codex::build_command(&binary, opts);
        let mut handle = SubprocessHandle::spawn(&mut command)
            .map_err(|e| format!("failed to spawn codex subprocess: {e}"))?;

        let stdin = handle
            .take_stdin()
            .ok_or_else(|| "codex subprocess has no stdin".to_string())?;
        let stdout = handle
            .take_stdout()
            .ok_or_else(|| "codex subprocess has no stdout".to_string())?;
        if let Some(stderr) = handle.take_stderr() {
            spawn_log_drain(session_id, "stderr", stderr);
        }

        let approval_policy = if opts.dangerously_skip_permissions {
            ApprovalPolicy::Never
        } else {
            PermissionMode::to_approval_policy(opts.permission_mode)
        };
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let adapter = CodexAdapter::new(
            CodexConfig {
                session_id,
                working_dir: opts.working_dir.to_string_lossy().into_owned(),
                model: opts.model.clone(),
                sandbox: opts.codex.sandbox,
                approval_policy,
                resume_thread_id: resume,
            },
            stdin,
            output_tx,
        );

        // Reader task: stdout is the JSON-RPC channel, never logged as
        // prose.
        let reader = Arc::clone(&adapter);
        tokio::spawn(async move {
            use tokio::io::AsyncBufReadExt;
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                reader.handle_line(&line).await;
            }
        });

        tokio::spawn(Arc::clone(&adapter).run_handshake());
        self.spawn_codex_forwarder(session_id, output_rx);

        Ok((handle, Some(adapter)))
    }

    fn spawn_codex_forwarder(
        self: &Arc<Self>,
        session_id: SessionId,
        mut rx: mpsc::UnboundedReceiver<CodexOutput>,
    ) {
        let launcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(output) = rx.recv().await {
                match &output {
                    CodexOutput::ThreadStarted { thread_id } => {
                        launcher
                            .set_cli_internal_id(session_id, thread_id.clone())
                            .await;
                    },
                    CodexOutput::InitError { message } => {
                        launcher.mark_init_failed(session_id, message).await;
                    },
                    _ => {},
                }
                let _ = launcher
                    .events
                    .send(LauncherEvent::Codex { session_id, output });
            }
        });
    }

    fn spawn_exit_watcher(
        self: &Arc<Self>,
        session_id: SessionId,
        handle: Arc<SubprocessHandle>,
        generation: u64,
    ) {
        let launcher = Arc::clone(self);
        tokio::spawn(async move {
            let exit_code = handle.wait().await;
            launcher.on_exit(session_id, exit_code, generation).await;
        });
    }

    async fn on_exit(&self, session_id: SessionId, exit_code: i32, generation: u64) {
        let (already_exited, codex) = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&session_id) else {
                return;
            };
            if entry.generation != generation {
                // A kill or relaunch already superseded this subprocess.
                return;
            }
            let already_exited = entry.info.state == SessionState::Exited;
            if !already_exited {
                // Crash loop: a resume-spawned process dying this quickly
                // means the token points at a conversation the CLI cannot
                // reload. Clear it so the next relaunch starts fresh.
                let crashed_early = entry
                    .launched_at
                    .is_some_and(|at| at.elapsed() < CRASH_LOOP_GRACE);
                if entry.resume_used && crashed_early && entry.info.cli_internal_id.is_some() {
                    warn!(
                        session = %session_id,
                        "resume crash-loop detected; clearing cli internal id"
                    );
                    entry.info.cli_internal_id = None;
                }
                entry.info.mark_exited(exit_code);
            }
            entry.handle = None;
            (already_exited, entry.codex.clone())
        };

        if already_exited {
            return;
        }
        if let Some(codex) = codex {
            codex.on_process_exit().await;
        }
        self.persist().await;
        debug!(session = %session_id, exit_code, "session exited");
        let _ = self.events.send(LauncherEvent::SessionExited {
            session_id,
            exit_code,
        });
        if let Some(info) = self.session(session_id).await {
            self.emit_update(&info);
        }
    }

    async fn mark_init_failed(&self, session_id: SessionId, message: &str) {
        warn!(session = %session_id, "codex init failed: {message}");
        let handle = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(&session_id) else {
                return;
            };
            if entry.info.state != SessionState::Exited {
                entry.info.mark_exited(1);
            }
            entry.handle.take()
        };
        if let Some(handle) = handle {
            // Fire-and-forget: the process serves no purpose post-failure.
            tokio::spawn(async move {
                let _ = handle.terminate(RELAUNCH_KILL_GRACE).await;
            });
        }
        self.persist().await;
        let _ = self.events.send(LauncherEvent::SessionExited {
            session_id,
            exit_code: 1,
        });
    }

    async fn persist(&self) {
        let sessions = self.sessions().await;
        self.store.save(&sessions).await;
    }

    fn emit_update(&self, info: &SessionInfo) {
        let _ = self.events.send(LauncherEvent::SessionUpdate {
            info: info.clone(),
        });
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

/// Resolve a binary name: explicit paths pass through, bare names get a
/// PATH lookup.
fn resolve_binary(name: &str) -> Result<PathBuf, which::Error> {
    let path = Path::new(name);
    if path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
        return Ok(path.to_path_buf());
    }
    which::which(name)
}

/// Reconstruct launch options from a restored record. Allowed tools and
/// extra env are not persisted; a relaunch after restart proceeds without
/// them.
fn options_from_info(info: &SessionInfo) -> LaunchOptions {
    let mut opts = LaunchOptions::new(info.backend, info.working_dir.clone());
    opts.model = info.model.clone();
    opts.permission_mode = info.permission_mode;
    opts.dangerously_skip_permissions = info.dangerously_skip_permissions;
    opts.worktree = info.worktree.clone();
    opts.codex = info.codex.clone().unwrap_or_default();
    opts
}

/// Drain a byte stream into debug logs.
fn spawn_log_drain<R>(session_id: SessionId, stream: &'static str, reader: R)
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session = %session_id, stream, "{line}");
        }
    });
}
