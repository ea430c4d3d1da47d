//! Error types for Tiller.

use thiserror::Error;

/// Primary error type for all Tiller operations.
#[derive(Error, Debug)]
pub enum TillerError {
    /// Malformed caller input (unknown confirmation outcome, empty batch,
    /// unreadable file reference). Rejected synchronously; the turn is
    /// unaffected.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A confirmation or query referenced a call id that is not pending.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A new batch was submitted while the previous one still holds
    /// non-terminal calls.
    #[error("A tool-call batch is already active")]
    BatchActive,

    /// The tool itself failed. Terminal for that call only.
    #[error("Tool execution error: {tool_name}: {message}")]
    Execution { tool_name: String, message: String },

    /// The agent round-trip failed. Ends the turn.
    #[error("Session error: {0}")]
    Session(String),

    /// The peer disconnected mid-stream. Further writes are no-ops.
    #[error("Transport closed")]
    TransportClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TillerError {
    /// Create an execution error for a named tool.
    pub fn execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a caller error the turn survives, as opposed
    /// to one that ends the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::BatchActive
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TillerError>;
