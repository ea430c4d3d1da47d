//! Tool call scheduling: batch lifecycle, approval gating, execution.
//!
//! The scheduler owns the authoritative state of every call in the current
//! batch. Mutation happens only here; the orchestrator reads snapshots and
//! issues confirmation/cancel commands.

mod call;

pub use call::{
    ConfirmationDetails, ConfirmationOutcome, ToolCall, ToolCallRequest, ToolCallResponse,
    ToolCallStatus,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TillerError};
use crate::events::StreamEventPayload;
use crate::tools::{ApprovalPolicy, OutputSink, ToolExecutor};
use crate::transport::EventChannel;

/// Snapshot listener fired on every state change of any call in the batch.
pub type CallsUpdateSink = Arc<dyn Fn(Vec<ToolCall>) + Send + Sync>;

/// Exactly-once batch completion notification carrying the completed calls
/// in submission order.
pub type BatchReceiver = oneshot::Receiver<Vec<ToolCall>>;

struct Batch {
    order: Vec<String>,
    calls: HashMap<String, ToolCall>,
    stream: Arc<EventChannel>,
    done_tx: Option<oneshot::Sender<Vec<ToolCall>>>,
    cancel: CancellationToken,
}

impl Batch {
    fn snapshot(&self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.get(id))
            .cloned()
            .collect()
    }

    fn all_terminal(&self) -> bool {
        self.calls.values().all(|call| call.status.is_terminal())
    }
}

#[derive(Default)]
struct Inner {
    batch: Option<Batch>,
    update_sink: Option<CallsUpdateSink>,
}

/// Scheduler for the current turn's tool-call batch.
///
/// Holds at most one active batch; a new submission is rejected until every
/// call of the previous batch is terminal. Cheap to clone and share.
#[derive(Clone)]
pub struct ToolScheduler {
    executor: Arc<dyn ToolExecutor>,
    policy: Arc<dyn ApprovalPolicy>,
    inner: Arc<Mutex<Inner>>,
}

impl ToolScheduler {
    pub fn new(executor: Arc<dyn ToolExecutor>, policy: Arc<dyn ApprovalPolicy>) -> Self {
        Self {
            executor,
            policy,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Register the snapshot listener. Replaces any previous listener.
    pub fn on_calls_update(&self, sink: CallsUpdateSink) {
        self.lock().update_sink = Some(sink);
    }

    /// Snapshot of the active batch, in submission order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.lock()
            .batch
            .as_ref()
            .map(Batch::snapshot)
            .unwrap_or_default()
    }

    pub fn has_active_batch(&self) -> bool {
        self.lock().batch.is_some()
    }

    /// Accept one batch of requests, gate each call per the approval
    /// policy, and start execution of ungated calls.
    ///
    /// Events are appended to `stream` in state-machine order per call;
    /// `cancel` bounds every execution started for this batch. The returned
    /// receiver resolves exactly once, after every call is terminal.
    pub fn submit(
        &self,
        requests: Vec<ToolCallRequest>,
        stream: Arc<EventChannel>,
        cancel: CancellationToken,
    ) -> Result<BatchReceiver> {
        if requests.is_empty() {
            return Err(TillerError::Validation("empty tool-call batch".into()));
        }
        let mut ids = std::collections::HashSet::with_capacity(requests.len());
        for request in &requests {
            if !ids.insert(request.call_id.clone()) {
                return Err(TillerError::Validation(format!(
                    "duplicate call id '{}' in batch",
                    request.call_id
                )));
            }
        }
        let (done_tx, done_rx) = oneshot::channel();
        let (snapshot, scheduled) = {
            let mut inner = self.lock();
            if inner.batch.is_some() {
                return Err(TillerError::BatchActive);
            }

            let mut batch = Batch {
                order: Vec::with_capacity(requests.len()),
                calls: HashMap::with_capacity(requests.len()),
                stream,
                done_tx: Some(done_tx),
                cancel,
            };
            let mut scheduled = Vec::new();
            for request in requests {
                batch.stream.emit(StreamEventPayload::ToolCall {
                    call_id: request.call_id.clone(),
                    name: request.name.clone(),
                    arguments: request.arguments.clone(),
                });

                let mut call = ToolCall::new(request);
                if self.policy.requires_approval(&call.request.name) {
                    let details = self.policy.confirmation_details(&call.request);
                    call.status = ToolCallStatus::AwaitingApproval;
                    call.confirmation = Some(details.clone());
                    // The confirmation event goes out at most once per
                    // call, however many update waves follow.
                    if !call.confirmation_announced {
                        call.confirmation_announced = true;
                        batch.stream.emit(StreamEventPayload::ToolConfirmation {
                            call_id: call.request.call_id.clone(),
                            details,
                        });
                    }
                } else {
                    call.status = ToolCallStatus::Scheduled;
                    scheduled.push(call.request.call_id.clone());
                }
                tracing::debug!(
                    call_id = %call.request.call_id,
                    tool = %call.request.name,
                    status = ?call.status,
                    "tool call submitted"
                );
                batch.order.push(call.request.call_id.clone());
                batch.calls.insert(call.request.call_id.clone(), call);
            }
            let snapshot = batch.snapshot();
            let batch_cancel = batch.cancel.clone();
            inner.batch = Some(batch);
            (snapshot, (scheduled, batch_cancel))
        };
        self.notify_update(snapshot);
        let (scheduled, batch_cancel) = scheduled;
        for call_id in scheduled {
            self.spawn_execution(call_id, batch_cancel.clone());
        }
        Ok(done_rx)
    }

    /// Apply an operator decision to a call in `AwaitingApproval`.
    ///
    /// A call id that is not pending, including after a cancellation
    /// already reset batch state, fails with `NotFound` and changes
    /// nothing.
    pub fn resolve_confirmation(
        &self,
        call_id: &str,
        outcome: ConfirmationOutcome,
        cancel: CancellationToken,
    ) -> Result<()> {
        let released = {
            let mut inner = self.lock();
            let Some(batch) = inner.batch.as_mut() else {
                return Err(TillerError::NotFound(format!(
                    "no pending confirmation for call '{call_id}'"
                )));
            };
            let Some(call) = batch.calls.get_mut(call_id) else {
                return Err(TillerError::NotFound(format!(
                    "no pending confirmation for call '{call_id}'"
                )));
            };
            if call.status != ToolCallStatus::AwaitingApproval {
                return Err(TillerError::NotFound(format!(
                    "call '{call_id}' is not awaiting approval"
                )));
            }
            tracing::debug!(call_id = %call_id, %outcome, "confirmation resolved");
            if outcome.allows_execution() {
                call.status = ToolCallStatus::Scheduled;
                Some((outcome == ConfirmationOutcome::ProceedAlways)
                    .then(|| call.request.name.clone()))
            } else {
                None
            }
        };
        match released {
            None => {
                // Reject decision: terminal without execution.
                self.complete_call(
                    call_id,
                    ToolCallStatus::Cancelled,
                    ToolCallResponse::cancelled(call_id),
                );
            }
            Some(remember) => {
                if let Some(name) = remember {
                    self.policy.remember_approval(&name);
                }
                self.notify_update(self.calls());
                self.spawn_execution(call_id.to_string(), cancel);
            }
        }
        Ok(())
    }

    /// Cancel every non-terminal call and clear batch state so a new batch
    /// can be submitted. A no-op without an active batch.
    pub fn cancel_all(&self) {
        let finished = {
            let mut inner = self.lock();
            let Some(batch) = inner.batch.as_mut() else {
                return;
            };
            batch.cancel.cancel();
            for call_id in batch.order.clone() {
                let call = batch
                    .calls
                    .get_mut(&call_id)
                    .expect("batch call for ordered id");
                if call.status.is_terminal() {
                    continue;
                }
                let response = ToolCallResponse::cancelled(&call_id);
                call.status = ToolCallStatus::Cancelled;
                call.response = Some(response.clone());
                batch.stream.emit(StreamEventPayload::ToolResult {
                    call_id: call_id.clone(),
                    status: ToolCallStatus::Cancelled,
                    success: false,
                    content: response.content,
                });
            }
            let ordered = batch.snapshot();
            let done_tx = batch.done_tx.take();
            inner.batch = None;
            (done_tx, ordered)
        };
        tracing::debug!("tool-call batch cancelled");
        let (done_tx, ordered) = finished;
        self.notify_update(ordered.clone());
        if let Some(tx) = done_tx {
            let _ = tx.send(ordered);
        }
    }

    fn spawn_execution(&self, call_id: String, caller_cancel: CancellationToken) {
        let started = {
            let mut inner = self.lock();
            let Some(batch) = inner.batch.as_mut() else {
                return;
            };
            let Some(call) = batch.calls.get_mut(&call_id) else {
                return;
            };
            if call.status != ToolCallStatus::Scheduled {
                return;
            }
            call.status = ToolCallStatus::Executing;
            Some((call.request.clone(), batch.cancel.clone()))
        };
        let Some((request, batch_cancel)) = started else {
            return;
        };
        self.notify_update(self.calls());

        let scheduler = self.clone();
        let executor = self.executor.clone();
        // Execution observes both the batch token and the token supplied
        // with the confirmation that released it.
        let linked = batch_cancel.child_token();
        tokio::spawn(async move {
            let sink_scheduler = scheduler.clone();
            let sink_id = call_id.clone();
            let output: OutputSink =
                Arc::new(move |chunk: String| sink_scheduler.record_output(&sink_id, chunk));

            let exec_cancel = linked.child_token();
            let outcome = tokio::select! {
                biased;
                _ = linked.cancelled() => None,
                _ = caller_cancel.cancelled() => {
                    linked.cancel();
                    None
                }
                result = executor.execute(&request, output, exec_cancel) => Some(result),
            };
            match outcome {
                None => scheduler.complete_call(
                    &call_id,
                    ToolCallStatus::Cancelled,
                    ToolCallResponse::cancelled(&call_id),
                ),
                Some(Ok(value)) => scheduler.complete_call(
                    &call_id,
                    ToolCallStatus::Success,
                    ToolCallResponse::success(&call_id, value),
                ),
                Some(Err(err)) => {
                    tracing::debug!(call_id = %call_id, error = %err, "tool execution failed");
                    scheduler.complete_call(
                        &call_id,
                        ToolCallStatus::Error,
                        ToolCallResponse::error(&call_id, err.to_string()),
                    );
                }
            }
        });
    }

    fn record_output(&self, call_id: &str, chunk: String) {
        let snapshot = {
            let mut inner = self.lock();
            let Some(batch) = inner.batch.as_mut() else {
                return;
            };
            let Some(call) = batch.calls.get_mut(call_id) else {
                return;
            };
            if call.status != ToolCallStatus::Executing {
                return;
            }
            call.output_so_far.push_str(&chunk);
            batch.stream.emit(StreamEventPayload::ToolExecution {
                call_id: call_id.to_string(),
                chunk,
            });
            batch.snapshot()
        };
        self.notify_update(snapshot);
    }

    /// Terminal transition for one call; at most one per call. Fires the
    /// batch completion exactly once, after the last call goes terminal.
    fn complete_call(&self, call_id: &str, status: ToolCallStatus, response: ToolCallResponse) {
        debug_assert!(status.is_terminal());
        let (snapshot, finished) = {
            let mut inner = self.lock();
            let Some(batch) = inner.batch.as_mut() else {
                return;
            };
            let Some(call) = batch.calls.get_mut(call_id) else {
                return;
            };
            if call.status.is_terminal() {
                return;
            }
            call.status = status;
            call.response = Some(response.clone());
            batch.stream.emit(StreamEventPayload::ToolResult {
                call_id: call_id.to_string(),
                status,
                success: status == ToolCallStatus::Success,
                content: response.content,
            });
            tracing::debug!(call_id = %call_id, status = ?status, "tool call completed");
            if batch.all_terminal() {
                let ordered = batch.snapshot();
                let done_tx = batch.done_tx.take();
                inner.batch = None;
                (ordered.clone(), Some((done_tx, ordered)))
            } else {
                (batch.snapshot(), None)
            }
        };
        self.notify_update(snapshot);
        if let Some((Some(tx), ordered)) = finished {
            let _ = tx.send(ordered);
        }
    }

    fn notify_update(&self, snapshot: Vec<ToolCall>) {
        let sink = self.lock().update_sink.clone();
        if let Some(sink) = sink {
            sink(snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("scheduler lock")
    }
}
