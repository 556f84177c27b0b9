//! Wire schemas for Switchboard.
//!
//! Three surfaces meet here:
//!
//! - the browser-facing message schema (one tagged union each way),
//! - the Claude-style NDJSON envelope (mostly passed through untouched),
//! - the Codex-style app-server JSON-RPC payloads.
//!
//! Backend-sourced tool inputs are untyped blobs; they stay
//! [`serde_json::Value`] until the adapter's translator boundary extracts
//! the fields it needs.

pub mod blocks;
pub mod browser;
pub mod claude;
pub mod codex;

pub use browser::{
    BrowserEvent, ClientCommand, PermissionBehavior, SequencedEvent, sequenced_json,
};
