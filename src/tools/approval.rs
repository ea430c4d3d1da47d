//! Approval gating policy for tool execution.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::scheduler::{ConfirmationDetails, ToolCallRequest};

/// Decides, once per call during validation, whether a tool requires an
/// operator decision before executing. The engine enforces the observed
/// decision only; what is gated, and whether `proceed-always` widens the
/// policy, is up to the implementation.
pub trait ApprovalPolicy: Send + Sync {
    fn requires_approval(&self, tool_name: &str) -> bool;

    /// Human-readable details shown while the call awaits a decision.
    fn confirmation_details(&self, request: &ToolCallRequest) -> ConfirmationDetails {
        ConfirmationDetails {
            description: format!("Run tool '{}'", request.name),
            command: request
                .arguments
                .get("command")
                .and_then(|value| value.as_str())
                .map(str::to_string),
            arguments: request.arguments.clone(),
        }
    }

    /// Invoked when the operator answered `proceed-always` for a tool.
    fn remember_approval(&self, _tool_name: &str) {}
}

/// Policy gating a fixed set of tool names; `proceed-always` removes the
/// tool from the gated set for the rest of the session.
#[derive(Default)]
pub struct StaticApprovalPolicy {
    gated: RwLock<HashSet<String>>,
}

impl StaticApprovalPolicy {
    pub fn gating<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            gated: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Gates nothing; every call is scheduled immediately.
    pub fn approve_all() -> Self {
        Self::default()
    }
}

impl ApprovalPolicy for StaticApprovalPolicy {
    fn requires_approval(&self, tool_name: &str) -> bool {
        self.gated
            .read()
            .expect("approval policy lock")
            .contains(tool_name)
    }

    fn remember_approval(&self, tool_name: &str) {
        self.gated
            .write()
            .expect("approval policy lock")
            .remove(tool_name);
    }
}
