//! Where a permission request came from, and how to answer it.
//!
//! Each backend has its own reply vocabulary; the origin captures enough
//! context at registration time that composing the reply later needs no
//! further lookups.

use serde_json::{Value, json};

use switchboard_protocol::claude;
use switchboard_protocol::codex::{
    ApprovalDecision, DecisionResult, DynamicToolCallResponse, ReviewDecision,
    ReviewDecisionResult, UserInputAnswerList, UserInputAnswers, UserInputQuestion,
};

/// The originating request, kind-tagged with its reply shape.
#[derive(Debug, Clone)]
pub enum PermissionOrigin {
    /// Adapter A `control_request` / `can_use_tool`. Replied with a
    /// `control_response` on the loopback socket.
    ClaudeControl {
        /// The CLI's own request id, echoed in the reply.
        cli_request_id: String,
    },
    /// Codex item-level command or MCP-tool approval. Replied over
    /// JSON-RPC with `accept`/`decline`.
    CodexDecision {
        /// Originating JSON-RPC id.
        rpc_id: Value,
    },
    /// Codex legacy `execCommandApproval` / `applyPatchApproval`. Replied
    /// over JSON-RPC with `approved`/`denied`.
    CodexReview {
        /// Originating JSON-RPC id.
        rpc_id: Value,
    },
    /// Codex dynamic tool call (`item/tool/call`). Replied with a
    /// [`DynamicToolCallResponse`]; deny and timeout answer
    /// `{success: false}`.
    CodexDynamicTool {
        /// Originating JSON-RPC id.
        rpc_id: Value,
        /// The backend's call id; doubles as the browser tool_use id.
        call_id: String,
    },
    /// Codex `item/tool/requestUserInput`. The browser answers by question
    /// index; the reply maps back to stable question ids.
    CodexUserInput {
        /// Originating JSON-RPC id.
        rpc_id: Value,
        /// Questions in presentation order.
        questions: Vec<UserInputQuestion>,
    },
}

/// A browser decision (or the lack of one).
#[derive(Debug, Clone)]
pub enum Decision {
    /// The user allowed the action.
    Allow {
        /// Edited tool input, when the user changed it.
        updated_input: Option<Value>,
        /// Permission rule updates riding along (adapter A only).
        updated_permissions: Option<Value>,
    },
    /// The user denied the action.
    Deny,
    /// Nobody answered in time.
    TimedOut,
}

impl Decision {
    /// Whether the action may proceed.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The backend-facing side effect of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyAction {
    /// Write this message on the adapter-A loopback socket.
    ClaudeControlResponse {
        /// The full `control_response` message.
        message: Value,
    },
    /// Send this JSON-RPC reply on the Codex stdio channel.
    CodexReply {
        /// Id to echo.
        id: Value,
        /// Result body.
        result: Value,
    },
}

impl PermissionOrigin {
    /// Compose the backend reply for a decision.
    #[must_use]
    pub fn compose_reply(&self, decision: &Decision) -> ReplyAction {
        match self {
            Self::ClaudeControl { cli_request_id } => {
                let message = match decision {
                    Decision::Allow {
                        updated_input,
                        updated_permissions,
                    } => claude::control_response(
                        cli_request_id,
                        true,
                        updated_input.clone(),
                        updated_permissions.clone(),
                    ),
                    Decision::Deny | Decision::TimedOut => {
                        claude::control_response(cli_request_id, false, None, None)
                    },
                };
                ReplyAction::ClaudeControlResponse { message }
            },
            Self::CodexDecision { rpc_id } => {
                let decision = if decision.is_allow() {
                    ApprovalDecision::Accept
                } else {
                    ApprovalDecision::Decline
                };
                ReplyAction::CodexReply {
                    id: rpc_id.clone(),
                    result: serde_json::to_value(DecisionResult { decision })
                        .unwrap_or(Value::Null),
                }
            },
            Self::CodexReview { rpc_id } => {
                let decision = if decision.is_allow() {
                    ReviewDecision::Approved
                } else {
                    ReviewDecision::Denied
                };
                ReplyAction::CodexReply {
                    id: rpc_id.clone(),
                    result: serde_json::to_value(ReviewDecisionResult { decision })
                        .unwrap_or(Value::Null),
                }
            },
            Self::CodexDynamicTool { rpc_id, .. } => {
                let result = match decision {
                    Decision::Allow { updated_input, .. } => {
                        // The caller's updated_input is the response body.
                        updated_input.clone().unwrap_or_else(|| {
                            json!({"success": true, "contentItems": []})
                        })
                    },
                    Decision::Deny => serde_json::to_value(DynamicToolCallResponse::failure(
                        "denied by user",
                    ))
                    .unwrap_or(Value::Null),
                    Decision::TimedOut => serde_json::to_value(
                        DynamicToolCallResponse::failure("tool call timed out"),
                    )
                    .unwrap_or(Value::Null),
                };
                ReplyAction::CodexReply {
                    id: rpc_id.clone(),
                    result,
                }
            },
            Self::CodexUserInput { rpc_id, questions } => {
                let answers = match decision {
                    Decision::Allow { updated_input, .. } => {
                        remap_answers(questions, updated_input.as_ref())
                    },
                    Decision::Deny | Decision::TimedOut => UserInputAnswers::default(),
                };
                ReplyAction::CodexReply {
                    id: rpc_id.clone(),
                    result: serde_json::to_value(answers).unwrap_or(Value::Null),
                }
            },
        }
    }
}

/// Map browser answers `{answers: {index → label}}` back onto stable
/// question ids: `{answers: {question_id → {answers: [label]}}}`.
fn remap_answers(questions: &[UserInputQuestion], input: Option<&Value>) -> UserInputAnswers {
    let mut out = UserInputAnswers::default();
    let Some(by_index) = input
        .and_then(|v| v.get("answers"))
        .and_then(Value::as_object)
    else {
        return out;
    };
    for (index, label) in by_index {
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        let Some(question) = questions.get(index) else {
            continue;
        };
        let Some(label) = label.as_str() else {
            continue;
        };
        out.answers.insert(
            question.id.clone(),
            UserInputAnswerList {
                answers: vec![label.to_string()],
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_allow_composes_control_response() {
        let origin = PermissionOrigin::ClaudeControl {
            cli_request_id: "cr-1".to_string(),
        };
        let action = origin.compose_reply(&Decision::Allow {
            updated_input: Some(json!({"command": "ls"})),
            updated_permissions: None,
        });
        let ReplyAction::ClaudeControlResponse { message } = action else {
            panic!("expected control response");
        };
        assert_eq!(message["response"]["subtype"], "allow");
        assert_eq!(message["response"]["request_id"], "cr-1");
        assert_eq!(message["response"]["updated_input"]["command"], "ls");
    }

    #[test]
    fn codex_decision_uses_accept_decline() {
        let origin = PermissionOrigin::CodexDecision { rpc_id: json!(100) };
        let allow = origin.compose_reply(&Decision::Allow {
            updated_input: None,
            updated_permissions: None,
        });
        assert_eq!(
            allow,
            ReplyAction::CodexReply {
                id: json!(100),
                result: json!({"decision": "accept"}),
            }
        );
        let deny = origin.compose_reply(&Decision::Deny);
        assert_eq!(
            deny,
            ReplyAction::CodexReply {
                id: json!(100),
                result: json!({"decision": "decline"}),
            }
        );
    }

    #[test]
    fn codex_review_uses_approved_denied() {
        let origin = PermissionOrigin::CodexReview { rpc_id: json!(7) };
        let allow = origin.compose_reply(&Decision::Allow {
            updated_input: None,
            updated_permissions: None,
        });
        assert_eq!(
            allow,
            ReplyAction::CodexReply {
                id: json!(7),
                result: json!({"decision": "approved"}),
            }
        );
        let timed_out = origin.compose_reply(&Decision::TimedOut);
        assert_eq!(
            timed_out,
            ReplyAction::CodexReply {
                id: json!(7),
                result: json!({"decision": "denied"}),
            }
        );
    }

    #[test]
    fn dynamic_tool_deny_and_timeout_are_failures() {
        let origin = PermissionOrigin::CodexDynamicTool {
            rpc_id: json!(602),
            call_id: "k1".to_string(),
        };
        let ReplyAction::CodexReply { result, .. } = origin.compose_reply(&Decision::TimedOut)
        else {
            panic!("expected codex reply");
        };
        assert_eq!(result["success"], false);
        assert_eq!(result["contentItems"][0]["type"], "inputText");

        let ReplyAction::CodexReply { result, .. } = origin.compose_reply(&Decision::Allow {
            updated_input: Some(json!({"success": true, "contentItems": [{"type": "inputText", "text": "ok"}]})),
            updated_permissions: None,
        }) else {
            panic!("expected codex reply");
        };
        assert_eq!(result["success"], true);
        assert_eq!(result["contentItems"][0]["text"], "ok");
    }

    #[test]
    fn user_input_answers_remap_index_to_question_id() {
        let origin = PermissionOrigin::CodexUserInput {
            rpc_id: json!(9),
            questions: vec![
                UserInputQuestion {
                    id: "q-color".to_string(),
                    question: "Which color?".to_string(),
                    options: Vec::new(),
                },
                UserInputQuestion {
                    id: "q-size".to_string(),
                    question: "Which size?".to_string(),
                    options: Vec::new(),
                },
            ],
        };
        let ReplyAction::CodexReply { result, .. } = origin.compose_reply(&Decision::Allow {
            updated_input: Some(json!({"answers": {"0": "blue", "1": "large"}})),
            updated_permissions: None,
        }) else {
            panic!("expected codex reply");
        };
        assert_eq!(result["answers"]["q-color"]["answers"][0], "blue");
        assert_eq!(result["answers"]["q-size"]["answers"][0], "large");
    }

    #[test]
    fn user_input_timeout_answers_nothing() {
        let origin = PermissionOrigin::CodexUserInput {
            rpc_id: json!(9),
            questions: Vec::new(),
        };
        let ReplyAction::CodexReply { result, .. } = origin.compose_reply(&Decision::TimedOut)
        else {
            panic!("expected codex reply");
        };
        assert_eq!(result["answers"], json!({}));
    }
}
