//! Turn orchestration (requests, handles, the runner).

mod runner;

pub use runner::TurnRunner;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::TurnId;
use crate::session::OutboundMessage;

/// Turn lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Result of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub finished_at: DateTime<Utc>,
}

impl TurnResult {
    pub fn completed() -> Self {
        Self {
            status: TurnStatus::Completed,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: TurnStatus::Cancelled,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TurnStatus::Failed,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Request payload to start a turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn_id: TurnId,
    pub message: OutboundMessage,
    pub workspace: PathBuf,
}

impl TurnRequest {
    pub fn new(message: OutboundMessage, workspace: impl Into<PathBuf>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            message,
            workspace: workspace.into(),
        }
    }

    pub fn with_turn_id(mut self, turn_id: TurnId) -> Self {
        self.turn_id = turn_id;
        self
    }
}

/// Handle for an in-flight turn.
#[derive(Debug)]
pub struct TurnHandle {
    turn_id: TurnId,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<TurnResult>,
}

impl TurnHandle {
    /// Create a handle and expose the result channel to the runner.
    pub(crate) fn new(
        turn_id: TurnId,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Sender<TurnResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                turn_id,
                cancel,
                result_rx,
            },
            result_tx,
        )
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Request cancellation. Returns `false` when the turn was already
    /// cancelled.
    pub fn abort(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub async fn wait(self) -> TurnResult {
        self.result_rx
            .await
            .unwrap_or_else(|_| TurnResult::cancelled())
    }
}
