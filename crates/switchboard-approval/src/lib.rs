//! Permission arbitration.
//!
//! Subprocesses ask for approval before running sensitive tools; browsers
//! answer. The [`PermissionArbiter`] is the correlation table in between:
//! it records each pending request together with the reply shape its
//! backend expects, fans a `permission_request` out through the bridge,
//! and when a decision (or a timeout) arrives, composes the
//! backend-appropriate reply.

pub mod arbiter;
pub mod origin;

pub use arbiter::{PendingPermission, PermissionArbiter, Resolution};
pub use origin::{Decision, PermissionOrigin, ReplyAction};
