//! Adapter for Codex-style CLI subprocesses.
//!
//! The hardest seam in the bridge: a full JSON-RPC 2.0 client over the
//! subprocess's stdio with a protocol-aware translator. The adapter owns
//! the init handshake (`initialize` → `thread/start`|`thread/resume`),
//! buffers browser intents until the handshake completes, folds streaming
//! item-lifecycle notifications into the common browser schema, and routes
//! server-initiated approval requests to the permission arbiter.

pub mod adapter;
pub mod mcp;
pub mod spawn;
pub mod translate;

pub use adapter::{CodexAdapter, CodexConfig, CodexOutput, CodexSendError};
pub use spawn::build_command;
pub use translate::Translator;
