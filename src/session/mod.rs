//! Agent session collaborator contracts.
//!
//! The engine never manages agent lifecycles; it consumes a ready-to-use
//! [`Session`] bound to a working directory through these traits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TillerError};
use crate::scheduler::{ToolCallRequest, ToolCallResponse};

/// One unit of the agent's streamed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFragment {
    /// Assistant text. `done` closes the current assistant message.
    Text { text: String, done: bool },
    Thought { text: String },
    /// Tool invocation request; buffered by the orchestrator until the
    /// round-trip drains.
    ToolCall(ToolCallRequest),
    /// End of this round-trip.
    TurnEnd,
}

/// Lazy fragment sequence for one round-trip.
pub type FragmentStream = BoxStream<'static, Result<ResponseFragment>>;

/// Message sent into the agent to open a round-trip: operator text on the
/// first round-trip, completed tool results on the following ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    pub tool_results: Vec<ToolCallResponse>,
}

impl OutboundMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_results: Vec::new(),
        }
    }

    pub fn tool_results(results: Vec<ToolCallResponse>) -> Self {
        Self {
            text: String::new(),
            tool_results: results,
        }
    }
}

/// Operator-supplied reference to a workspace file whose contents travel
/// with the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileReference {
    pub path: PathBuf,
}

impl FileReference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Resolve file references against the workspace into a context block to
/// append to the operator text. An unreadable reference is a caller error,
/// rejected before the round-trip opens.
pub async fn resolve_file_references(
    workspace: &Path,
    refs: &[FileReference],
) -> Result<String> {
    let mut context = String::new();
    for file_ref in refs {
        let path = workspace.join(&file_ref.path);
        let contents = tokio::fs::read_to_string(&path).await.map_err(|err| {
            TillerError::Validation(format!(
                "unreadable file reference {}: {err}",
                file_ref.path.display()
            ))
        })?;
        context.push_str(&format!(
            "\n\n--- {} ---\n{contents}",
            file_ref.path.display()
        ));
    }
    Ok(context)
}

/// A live agent session bound to one working directory.
#[async_trait]
pub trait Session: Send + Sync {
    /// Open one round-trip. Safe to call repeatedly on the same session.
    /// The stream must observe `cancel` and end promptly once it fires.
    async fn send_message(
        &self,
        message: OutboundMessage,
        cancel: CancellationToken,
    ) -> Result<FragmentStream>;
}

/// Supplies one session per workspace.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self, workspace: &Path) -> Result<Arc<dyn Session>>;
}
