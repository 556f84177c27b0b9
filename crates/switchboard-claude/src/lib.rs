//! Adapter for Claude-style CLI subprocesses.
//!
//! The subprocess does not speak over stdio: at launch it receives
//! `--sdk-url ws://127.0.0.1:<port>/ws/cli/<session_id>` and dials back to
//! the bridge, then streams NDJSON both ways. Most messages pass through
//! to the browser untouched; the adapter transforms exactly two shapes
//! (`system.init` and `control_request`) and builds the spawn command.

pub mod adapter;
pub mod spawn;

pub use adapter::{ClaudeAdapter, ClaudeInbound};
pub use spawn::{CLAUDE_BRIDGE_ENV, build_command};
