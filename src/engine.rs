//! Per-session turn engine: the interface the transport layer talks to.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, TillerError};
use crate::events::TurnId;
use crate::scheduler::{ConfirmationOutcome, ToolScheduler};
use crate::session::{resolve_file_references, FileReference, OutboundMessage, SessionProvider};
use crate::tools::{ApprovalPolicy, ToolExecutor};
use crate::transport::{EventChannel, EventTransport};
use crate::turn::{TurnHandle, TurnRequest, TurnResult, TurnRunner};

struct ActiveTurn {
    stream: Arc<EventChannel>,
    cancel: CancellationToken,
    handle: Option<TurnHandle>,
}

/// One engine per operator session. Owns the scheduler, the runner, and
/// the current response stream; there is no process-wide state.
pub struct TurnEngine {
    runner: TurnRunner,
    scheduler: ToolScheduler,
    active: Mutex<Option<ActiveTurn>>,
}

impl TurnEngine {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        executor: Arc<dyn ToolExecutor>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        Self::with_config(provider, executor, policy, EngineConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn SessionProvider>,
        executor: Arc<dyn ToolExecutor>,
        policy: Arc<dyn ApprovalPolicy>,
        config: EngineConfig,
    ) -> Self {
        let scheduler = ToolScheduler::new(executor, policy);
        let runner = TurnRunner::new(provider, scheduler.clone(), config);
        Self {
            runner,
            scheduler,
            active: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &ToolScheduler {
        &self.scheduler
    }

    /// Start a turn for an operator message. Rejected while a previous
    /// turn's stream is still open; file references are resolved before
    /// the round-trip opens, so a bad reference never starts a turn.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        file_refs: Vec<FileReference>,
        workspace: impl Into<PathBuf>,
        transport: Box<dyn EventTransport>,
    ) -> Result<TurnId> {
        let mut active = self.active.lock().await;
        if let Some(turn) = active.as_ref() {
            if !turn.stream.is_closed() {
                return Err(TillerError::Validation(
                    "a turn is already in progress".into(),
                ));
            }
        }

        let workspace = workspace.into();
        let mut text = text.into();
        let context = resolve_file_references(&workspace, &file_refs).await?;
        text.push_str(&context);

        let turn_id = Uuid::new_v4();
        let stream = Arc::new(EventChannel::new(turn_id, transport));
        let cancel = CancellationToken::new();
        let request =
            TurnRequest::new(OutboundMessage::user(text), workspace).with_turn_id(turn_id);
        let handle = self.runner.start(request, stream.clone(), cancel.clone());
        *active = Some(ActiveTurn {
            stream,
            cancel,
            handle: Some(handle),
        });
        tracing::debug!(turn_id = %turn_id, "turn accepted");
        Ok(turn_id)
    }

    /// Apply an operator decision, validating the wire label against the
    /// known outcome set first.
    pub async fn resolve_confirmation(&self, call_id: &str, outcome: &str) -> Result<()> {
        let outcome = ConfirmationOutcome::parse(outcome)?;
        let cancel = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|turn| turn.cancel.clone())
            .unwrap_or_default();
        self.scheduler.resolve_confirmation(call_id, outcome, cancel)
    }

    /// Cancel the in-flight turn. Returns `false` when no turn is active
    /// or it was already cancelled.
    pub async fn cancel_turn(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(turn) if !turn.stream.is_closed() => {
                if turn.cancel.is_cancelled() {
                    false
                } else {
                    turn.cancel.cancel();
                    true
                }
            }
            _ => false,
        }
    }

    /// Await the current turn's result. `None` when no turn was started
    /// or its result was already consumed.
    pub async fn wait_for_turn(&self) -> Option<TurnResult> {
        let handle = self.active.lock().await.as_mut()?.handle.take()?;
        Some(handle.wait().await)
    }
}
