//! Core types for the Switchboard bridge server.
//!
//! Switchboard sits between browser clients and long-lived AI coding CLI
//! subprocesses. This crate holds the types shared by every subsystem:
//! identifiers, the session data model, and the wire enums both backends
//! agree on.

pub mod session;
pub mod types;

pub use session::{
    BackendKind, CodexOptions, LaunchOptions, PermissionMode, SandboxMode, SessionInfo,
    SessionState, WorktreeInfo,
};
pub use types::{PermissionRequestId, SessionId};
