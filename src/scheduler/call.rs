//! Tool-call records and the per-call state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, TillerError};

/// Immutable tool invocation request extracted from one agent response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    /// Unique within the batch.
    pub call_id: String,
    pub name: String,
    /// Opaque key/value payload; never interpreted by the scheduler.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Per-call lifecycle state.
///
/// `Validating -> { AwaitingApproval | Scheduled } -> Executing ->
/// { Success | Error | Cancelled }`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Validating,
    AwaitingApproval,
    Scheduled,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// Human-facing description of a gated call, shown while the call sits in
/// `AwaitingApproval`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationDetails {
    pub description: String,
    /// Literal command string, when the tool wraps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Operator decision on a gated call.
///
/// Wire labels are the kebab-case strum forms: `proceed-once`,
/// `proceed-always`, `cancel`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConfirmationOutcome {
    ProceedOnce,
    ProceedAlways,
    Cancel,
}

impl ConfirmationOutcome {
    /// Parse a wire label, rejecting anything outside the known set.
    pub fn parse(label: &str) -> Result<Self> {
        Self::from_str(label)
            .map_err(|_| TillerError::Validation(format!("unknown confirmation outcome '{label}'")))
    }

    pub fn allows_execution(self) -> bool {
        matches!(self, Self::ProceedOnce | Self::ProceedAlways)
    }
}

/// Terminal payload of a finished call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallResponse {
    pub call_id: String,
    /// Tool result on success, an error description otherwise.
    pub content: serde_json::Value,
    pub is_error: bool,
}

impl ToolCallResponse {
    pub fn success(call_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    pub fn cancelled(call_id: impl Into<String>) -> Self {
        Self::error(call_id, "cancelled")
    }
}

/// Mutable record for one call, owned exclusively by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ToolCallResponse>,
    /// Incremental execution output; grows monotonically.
    #[serde(default)]
    pub output_so_far: String,
    /// Set once the confirmation event for this call has gone out, so a
    /// later state-update wave cannot double-fire it.
    #[serde(skip)]
    pub(crate) confirmation_announced: bool,
}

impl ToolCall {
    pub(crate) fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            status: ToolCallStatus::Validating,
            confirmation: None,
            response: None,
            output_so_far: String::new(),
            confirmation_announced: false,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }

    pub fn succeeded(&self) -> bool {
        self.status == ToolCallStatus::Success
    }
}
