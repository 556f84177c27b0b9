//! The session data model.
//!
//! A [`SessionInfo`] tracks one conversation with one subprocess. The
//! launcher owns these records and persists them (minus the process handle)
//! across server restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::types::SessionId;

/// Which backend CLI a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Claude-style CLI: dials back to the bridge over a loopback WebSocket
    /// and streams NDJSON.
    Claude,
    /// Codex-style CLI: speaks JSON-RPC 2.0 over its own stdio.
    Codex,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Codex => write!(f, "codex"),
        }
    }
}

/// Lifecycle state of a session, as seen by the supervisor.
///
/// `Exited` is terminal. Codex sessions never expose `Starting`: the init
/// handshake is internal to the adapter, so they are `Connected` from spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Spawned, waiting for the CLI to attach (Claude loopback dial-back).
    Starting,
    /// CLI attached and idle.
    Connected,
    /// A turn is in flight.
    Running,
    /// Subprocess is gone. Terminal.
    Exited,
}

impl SessionState {
    /// Whether the session has reached its terminal state.
    #[must_use]
    pub fn is_exited(self) -> bool {
        matches!(self, Self::Exited)
    }
}

/// Sandbox policy for Codex sessions. Kebab-case on the wire; camelCase
/// variants must never appear in outbound JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    /// Writes confined to the workspace.
    WorkspaceWrite,
    /// No confinement.
    DangerFullAccess,
    /// No writes at all.
    ReadOnly,
}

impl Default for SandboxMode {
    fn default() -> Self {
        Self::WorkspaceWrite
    }
}

/// Codex approval policy. Kebab-case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Never ask; everything is pre-approved.
    Never,
    /// Ask for anything not trusted.
    Untrusted,
    /// Ask only after a failure.
    OnFailure,
    /// Ask when the model requests it.
    OnRequest,
}

/// Permission mode accepted by the Claude CLI (`--permission-mode`).
///
/// CamelCase is the CLI's own spelling; it never reaches the Codex wire —
/// [`PermissionMode::to_approval_policy`] is the only crossing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask on every sensitive tool use.
    Default,
    /// Plan mode: read-only exploration.
    Plan,
    /// Edits are pre-approved, everything else asks.
    AcceptEdits,
    /// Skip all prompts.
    BypassPermissions,
}

impl PermissionMode {
    /// The spelling the Claude CLI expects as a flag value.
    #[must_use]
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Plan => "plan",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
        }
    }

    /// Map to the Codex approval-policy enum.
    ///
    /// Only `BypassPermissions` turns prompts off; every other mode (and a
    /// missing mode) maps to `untrusted`.
    #[must_use]
    pub fn to_approval_policy(mode: Option<Self>) -> ApprovalPolicy {
        match mode {
            Some(Self::BypassPermissions) => ApprovalPolicy::Never,
            _ => ApprovalPolicy::Untrusted,
        }
    }
}

/// Metadata recorded when a session runs inside an isolated git worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    /// Whether the working directory is a worktree (vs the main checkout).
    pub is_worktree: bool,
    /// Path of the main repository checkout.
    pub repo_root: PathBuf,
    /// Branch the caller asked for.
    pub requested_branch: String,
    /// Branch actually checked out (may differ if the requested name was
    /// taken).
    pub actual_branch: String,
}

/// Codex-only launch options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodexOptions {
    /// Whether the subprocess may reach the internet (`tools.webSearch`).
    #[serde(default)]
    pub internet_access: bool,
    /// Sandbox policy.
    #[serde(default)]
    pub sandbox: SandboxMode,
}

/// Everything needed to launch a session.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Which backend to run.
    pub backend: BackendKind,
    /// Working directory for the subprocess.
    pub working_dir: PathBuf,
    /// Model override, passed through to the CLI.
    pub model: Option<String>,
    /// Permission mode (Claude flag; mapped to approval policy for Codex).
    pub permission_mode: Option<PermissionMode>,
    /// Tools pre-approved on the Claude command line.
    pub allowed_tools: Vec<String>,
    /// Skip all permission prompts. Mutually exclusive with
    /// `permission_mode` on the wire; takes precedence when both are set.
    pub dangerously_skip_permissions: bool,
    /// Extra environment entries layered over the server's own.
    pub env: HashMap<String, String>,
    /// Worktree metadata, when launching into an isolated worktree.
    pub worktree: Option<WorktreeInfo>,
    /// Codex-only options.
    pub codex: CodexOptions,
}

impl LaunchOptions {
    /// Minimal options for a backend in a working directory.
    #[must_use]
    pub fn new(backend: BackendKind, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            working_dir: working_dir.into(),
            model: None,
            permission_mode: None,
            allowed_tools: Vec::new(),
            dangerously_skip_permissions: false,
            env: HashMap::new(),
            worktree: None,
            codex: CodexOptions::default(),
        }
    }
}

/// A session record, as persisted in the launcher snapshot.
///
/// The subprocess handle itself is never serialized; `pid` is enough to
/// re-probe liveness after a server restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Server-generated session id.
    pub session_id: SessionId,
    /// Which backend this session runs.
    pub backend: BackendKind,
    /// Working directory of the subprocess.
    pub working_dir: PathBuf,
    /// Model override, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Permission mode, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    /// Supervisor's view of the lifecycle.
    pub state: SessionState,
    /// Exit code once the subprocess is gone (-1 for killed / spawn failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// OS pid while the subprocess is alive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// The subprocess's own conversation id, used for resume. Cleared when
    /// a resume-spawned process dies inside the crash-loop grace window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_internal_id: Option<String>,
    /// Whether the session is archived (still subscribable for viewing).
    #[serde(default)]
    pub archived: bool,
    /// Worktree metadata, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeInfo>,
    /// Whether permission prompts were skipped at launch.
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
    /// Codex-only options recorded for relaunch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex: Option<CodexOptions>,
}

impl SessionInfo {
    /// Build the initial record for a freshly launched session.
    ///
    /// Claude sessions start in `Starting` (the CLI has yet to dial back);
    /// Codex sessions are `Connected` from spawn.
    #[must_use]
    pub fn from_launch(session_id: SessionId, opts: &LaunchOptions) -> Self {
        let state = match opts.backend {
            BackendKind::Claude => SessionState::Starting,
            BackendKind::Codex => SessionState::Connected,
        };
        Self {
            session_id,
            backend: opts.backend,
            working_dir: opts.working_dir.clone(),
            model: opts.model.clone(),
            permission_mode: opts.permission_mode,
            state,
            exit_code: None,
            created_at: Utc::now(),
            pid: None,
            cli_internal_id: None,
            archived: false,
            worktree: opts.worktree.clone(),
            dangerously_skip_permissions: opts.dangerously_skip_permissions,
            codex: match opts.backend {
                BackendKind::Codex => Some(opts.codex.clone()),
                BackendKind::Claude => None,
            },
        }
    }

    /// Record a subprocess exit.
    pub fn mark_exited(&mut self, exit_code: i32) {
        self.state = SessionState::Exited;
        self.exit_code = Some(exit_code);
        self.pid = None;
    }
}
