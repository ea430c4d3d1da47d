//! Stream event types and wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::{ConfirmationDetails, ToolCallStatus};

/// Unique turn identifier.
pub type TurnId = Uuid;

/// Concrete event payloads delivered to the client.
///
/// The event log is append-only and ordered; a client reconstructs turn
/// and tool state purely from this sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    /// Assistant text fragment. `done` marks the end of one assistant
    /// message, preserving the agent's partial/complete framing.
    Content {
        text: String,
        done: bool,
    },
    Thought {
        text: String,
    },
    /// A tool call entered the batch.
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The call is gated and waits for an operator decision.
    ToolConfirmation {
        call_id: String,
        details: ConfirmationDetails,
    },
    /// Incremental execution output chunk.
    ToolExecution {
        call_id: String,
        chunk: String,
    },
    /// The call reached a terminal status.
    ToolResult {
        call_id: String,
        status: ToolCallStatus,
        success: bool,
        #[serde(default)]
        content: serde_json::Value,
    },
    Complete,
    Error {
        message: String,
    },
}

/// Envelope for one unit of the ordered event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub turn_id: TurnId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: StreamEventPayload,
}

impl StreamEventPayload {
    /// Whether this payload ends the turn's event log.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

/// Encode one event as a newline-terminated JSON frame.
pub fn encode(event: &StreamEvent) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(event)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one frame back into an event. Counterpart of [`encode`]; mainly
/// for clients and tests.
pub fn decode(frame: &[u8]) -> Result<StreamEvent> {
    Ok(serde_json::from_slice(frame)?)
}
