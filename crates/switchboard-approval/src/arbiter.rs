//! The pending-permission table.
//!
//! Registration and resolution are small synchronous table operations; the
//! bridge routes the resulting browser events and backend replies. Timeout
//! sweeping is driven from outside (the hub runs a periodic
//! [`PermissionArbiter::expire`] pass) so tests can control the clock.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use switchboard_core::types::{PermissionRequestId, SessionId};
use switchboard_protocol::blocks;
use switchboard_protocol::browser::BrowserEvent;

use crate::origin::{Decision, PermissionOrigin, ReplyAction};

/// How long a dynamic tool call may wait for a browser answer.
pub const DYNAMIC_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// One request awaiting a browser decision.
#[derive(Debug, Clone)]
pub struct PendingPermission {
    /// Server-side id the browser echoes back.
    pub request_id: PermissionRequestId,
    /// Session the request belongs to.
    pub session_id: SessionId,
    /// Common-schema tool name shown to the user.
    pub tool_name: String,
    /// Tool input, as the backend shaped it.
    pub input: Value,
    /// Where the request came from and how to answer it.
    pub origin: PermissionOrigin,
    /// When the request was recorded.
    pub created_at: DateTime<Utc>,
    /// When to give up, if ever. User-driven approvals have no deadline by
    /// default; dynamic tool calls hard-deadline at
    /// [`DYNAMIC_TOOL_TIMEOUT`].
    pub deadline: Option<Instant>,
}

impl PendingPermission {
    /// Build a pending entry. Dynamic tool origins get the 120 s deadline;
    /// adapter-A requests reuse the CLI's own request id so the reply can
    /// be correlated verbatim.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        tool_name: impl Into<String>,
        input: Value,
        origin: PermissionOrigin,
    ) -> Self {
        let request_id = match &origin {
            PermissionOrigin::ClaudeControl { cli_request_id } => {
                PermissionRequestId::from_raw(cli_request_id.clone())
            },
            _ => PermissionRequestId::new(),
        };
        let deadline = match &origin {
            PermissionOrigin::CodexDynamicTool { .. } => {
                Instant::now().checked_add(DYNAMIC_TOOL_TIMEOUT)
            },
            _ => None,
        };
        Self {
            request_id,
            session_id,
            tool_name: tool_name.into(),
            input,
            origin,
            created_at: Utc::now(),
            deadline,
        }
    }
}

/// The outcome of resolving (or expiring) a pending request.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The resolved request.
    pub request_id: PermissionRequestId,
    /// Its session.
    pub session_id: SessionId,
    /// Backend reply to deliver.
    pub reply: ReplyAction,
    /// Browser events to fan out (always a `permission_cancelled`; dynamic
    /// timeouts add an error tool_result so the UI shows the failure).
    pub browser_events: Vec<BrowserEvent>,
}

/// Correlates subprocess approval requests with browser decisions.
#[derive(Debug, Default)]
pub struct PermissionArbiter {
    pending: Mutex<HashMap<PermissionRequestId, PendingPermission>>,
}

impl PermissionArbiter {
    /// Create an empty arbiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request and return the `permission_request` event
    /// to fan out.
    pub fn register(&self, pending: PendingPermission) -> BrowserEvent {
        let event = BrowserEvent::PermissionRequest {
            request_id: pending.request_id.clone(),
            tool_name: pending.tool_name.clone(),
            input: pending.input.clone(),
        };
        debug!(
            session = %pending.session_id,
            request = %pending.request_id,
            tool = %pending.tool_name,
            "permission request pending"
        );
        let mut guard = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(pending.request_id.clone(), pending);
        event
    }

    /// Resolve a pending request with a browser decision.
    ///
    /// Returns `None` when the id is unknown (already resolved, timed out,
    /// or a duplicate response) — the caller drops the response silently.
    pub fn resolve(
        &self,
        request_id: &PermissionRequestId,
        decision: &Decision,
    ) -> Option<Resolution> {
        let pending = {
            let mut guard = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.remove(request_id)
        };
        let Some(pending) = pending else {
            debug!(request = %request_id, "permission response for unknown request");
            return None;
        };
        Some(Self::resolution(pending, decision))
    }

    /// Time out every pending request whose deadline has passed.
    pub fn expire(&self, now: Instant) -> Vec<Resolution> {
        let expired: Vec<PendingPermission> = {
            let mut guard = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let ids: Vec<PermissionRequestId> = guard
                .iter()
                .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| guard.remove(&id)).collect()
        };
        expired
            .into_iter()
            .map(|pending| {
                warn!(
                    session = %pending.session_id,
                    request = %pending.request_id,
                    tool = %pending.tool_name,
                    "permission request timed out"
                );
                Self::resolution(pending, &Decision::TimedOut)
            })
            .collect()
    }

    /// Drop every pending request for a session (on exit), returning the
    /// `permission_cancelled` events to fan out. No backend replies are
    /// composed: the subprocess is gone.
    pub fn cancel_session(&self, session_id: &SessionId) -> Vec<BrowserEvent> {
        let mut guard = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let ids: Vec<PermissionRequestId> = guard
            .iter()
            .filter(|(_, p)| p.session_id == *session_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.remove(&id))
            .map(|p| BrowserEvent::PermissionCancelled {
                request_id: p.request_id,
            })
            .collect()
    }

    /// Number of requests currently pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn resolution(pending: PendingPermission, decision: &Decision) -> Resolution {
        let reply = pending.origin.compose_reply(decision);
        let mut browser_events = vec![BrowserEvent::PermissionCancelled {
            request_id: pending.request_id.clone(),
        }];
        if let (Decision::TimedOut, PermissionOrigin::CodexDynamicTool { call_id, .. }) =
            (decision, &pending.origin)
        {
            browser_events.push(BrowserEvent::Assistant {
                payload: blocks::assistant_payload(
                    &format!("dynamic-{call_id}-result"),
                    vec![blocks::tool_result_block(
                        call_id,
                        Value::String("tool call timed out".to_string()),
                        true,
                    )],
                ),
            });
        }
        Resolution {
            request_id: pending.request_id,
            session_id: pending.session_id,
            reply,
            browser_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command_pending(session_id: SessionId) -> PendingPermission {
        PendingPermission::new(
            session_id,
            "Bash",
            json!({"command": "rm -rf /tmp/t"}),
            PermissionOrigin::CodexDecision { rpc_id: json!(100) },
        )
    }

    #[test]
    fn register_emits_permission_request() {
        let arbiter = PermissionArbiter::new();
        let session_id = SessionId::new();
        let event = arbiter.register(command_pending(session_id));
        match event {
            BrowserEvent::PermissionRequest {
                tool_name, input, ..
            } => {
                assert_eq!(tool_name, "Bash");
                assert_eq!(input["command"], "rm -rf /tmp/t");
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(arbiter.pending_count(), 1);
    }

    #[test]
    fn resolve_composes_reply_and_cancels() {
        let arbiter = PermissionArbiter::new();
        let pending = command_pending(SessionId::new());
        let request_id = pending.request_id.clone();
        arbiter.register(pending);

        let resolution = arbiter
            .resolve(
                &request_id,
                &Decision::Allow {
                    updated_input: None,
                    updated_permissions: None,
                },
            )
            .unwrap();
        assert_eq!(
            resolution.reply,
            ReplyAction::CodexReply {
                id: json!(100),
                result: json!({"decision": "accept"}),
            }
        );
        assert!(matches!(
            resolution.browser_events[0],
            BrowserEvent::PermissionCancelled { .. }
        ));

        // A duplicate response finds nothing.
        assert!(arbiter.resolve(&request_id, &Decision::Deny).is_none());
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[test]
    fn claude_requests_reuse_the_cli_request_id() {
        let pending = PendingPermission::new(
            SessionId::new(),
            "Bash",
            json!({}),
            PermissionOrigin::ClaudeControl {
                cli_request_id: "cr-42".to_string(),
            },
        );
        assert_eq!(pending.request_id.to_string(), "cr-42");
        assert!(pending.deadline.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_tool_requests_expire_with_error_result() {
        let arbiter = PermissionArbiter::new();
        let pending = PendingPermission::new(
            SessionId::new(),
            "dynamic:slow",
            json!({}),
            PermissionOrigin::CodexDynamicTool {
                rpc_id: json!(602),
                call_id: "k1".to_string(),
            },
        );
        assert!(pending.deadline.is_some());
        arbiter.register(pending);

        // Nothing expires before the deadline.
        assert!(arbiter.expire(Instant::now()).is_empty());

        tokio::time::advance(DYNAMIC_TOOL_TIMEOUT + Duration::from_secs(1)).await;
        let resolutions = arbiter.expire(Instant::now());
        assert_eq!(resolutions.len(), 1);

        let resolution = &resolutions[0];
        let ReplyAction::CodexReply { id, result } = &resolution.reply else {
            panic!("expected codex reply");
        };
        assert_eq!(*id, json!(602));
        assert_eq!(result["success"], false);

        // permission_cancelled plus the error tool_result.
        assert_eq!(resolution.browser_events.len(), 2);
        let BrowserEvent::Assistant { payload } = &resolution.browser_events[1] else {
            panic!("expected assistant tool_result");
        };
        let block = &payload["message"]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "k1");
        assert_eq!(block["is_error"], true);
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[test]
    fn cancel_session_drops_only_that_sessions_requests() {
        let arbiter = PermissionArbiter::new();
        let session_a = SessionId::new();
        let session_b = SessionId::new();
        arbiter.register(command_pending(session_a));
        arbiter.register(command_pending(session_b));

        let cancelled = arbiter.cancel_session(&session_a);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(arbiter.pending_count(), 1);
    }
}
