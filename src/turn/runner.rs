//! The turn runner: one spawned task per turn, driving agent round-trips
//! and tool batches until the agent stops asking for tools.

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::events::StreamEventPayload;
use crate::scheduler::{ToolCallResponse, ToolScheduler};
use crate::session::{OutboundMessage, ResponseFragment, SessionProvider};
use crate::transport::EventChannel;

use super::{TurnHandle, TurnRequest, TurnResult};

/// Drives single turns against an agent session.
pub struct TurnRunner {
    provider: Arc<dyn SessionProvider>,
    scheduler: ToolScheduler,
    config: EngineConfig,
}

impl TurnRunner {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        scheduler: ToolScheduler,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            scheduler,
            config,
        }
    }

    pub fn scheduler(&self) -> &ToolScheduler {
        &self.scheduler
    }

    /// Spawn the turn task. `cancel` is the turn-scoped token shared with
    /// every suspending operation; cancelling it unwinds the round-trip,
    /// the batch, and the stream, leaving the runner ready for the next
    /// turn. The handle resolves once the terminal event is written.
    pub fn start(
        &self,
        request: TurnRequest,
        stream: Arc<EventChannel>,
        cancel: CancellationToken,
    ) -> TurnHandle {
        let (handle, result_tx) = TurnHandle::new(request.turn_id, cancel.clone());
        let provider = self.provider.clone();
        let scheduler = self.scheduler.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let turn_id = request.turn_id;
            tracing::debug!(
                turn_id = %turn_id,
                workspace = %request.workspace.display(),
                "turn started"
            );

            let session = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = result_tx.send(finish_cancelled(&scheduler, &stream));
                    return;
                }
                session = provider.get_session(&request.workspace) => match session {
                    Ok(session) => session,
                    Err(err) => {
                        let _ = result_tx.send(finish_failed(
                            &scheduler, &stream, &cancel, err.to_string(),
                        ));
                        return;
                    }
                },
            };

            let mut outbound = request.message;
            let mut round_trip = 0usize;
            loop {
                round_trip += 1;
                if round_trip > config.max_round_trips {
                    let reason = format!(
                        "agent loop exceeded max round trips (max_round_trips={})",
                        config.max_round_trips
                    );
                    let _ = result_tx.send(finish_failed(&scheduler, &stream, &cancel, reason));
                    return;
                }

                let message = std::mem::take(&mut outbound);
                let mut fragments = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = result_tx.send(finish_cancelled(&scheduler, &stream));
                        return;
                    }
                    opened = session.send_message(message, cancel.child_token()) => match opened {
                        Ok(fragments) => fragments,
                        Err(err) => {
                            let _ = result_tx.send(finish_failed(
                                &scheduler, &stream, &cancel, err.to_string(),
                            ));
                            return;
                        }
                    },
                };

                // Tool-call requests are buffered until the round-trip is
                // fully drained; the batch goes to the scheduler whole.
                let mut pending = Vec::new();
                let idle_timeout_ms = config.stream_idle_timeout_ms;
                let mut idle_sleep = (idle_timeout_ms > 0)
                    .then(|| Box::pin(time::sleep(Duration::from_millis(idle_timeout_ms))));
                loop {
                    let fragment = if let Some(sleep) = idle_sleep.as_mut() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                let _ = result_tx.send(finish_cancelled(&scheduler, &stream));
                                return;
                            }
                            _ = sleep.as_mut() => {
                                let _ = result_tx.send(finish_failed(
                                    &scheduler, &stream, &cancel,
                                    "agent stream idle timeout".to_string(),
                                ));
                                return;
                            }
                            fragment = fragments.next() => fragment,
                        }
                    } else {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                let _ = result_tx.send(finish_cancelled(&scheduler, &stream));
                                return;
                            }
                            fragment = fragments.next() => fragment,
                        }
                    };
                    let Some(fragment) = fragment else { break };
                    match fragment {
                        Ok(ResponseFragment::Text { text, done }) => {
                            stream.emit(StreamEventPayload::Content { text, done });
                        }
                        Ok(ResponseFragment::Thought { text }) => {
                            stream.emit(StreamEventPayload::Thought { text });
                        }
                        Ok(ResponseFragment::ToolCall(request)) => pending.push(request),
                        Ok(ResponseFragment::TurnEnd) => break,
                        Err(err) => {
                            let _ = result_tx.send(finish_failed(
                                &scheduler, &stream, &cancel, err.to_string(),
                            ));
                            return;
                        }
                    }
                    if let Some(sleep) = idle_sleep.as_mut() {
                        sleep
                            .as_mut()
                            .reset(Instant::now() + Duration::from_millis(idle_timeout_ms));
                    }
                }

                if pending.is_empty() {
                    stream.finish(StreamEventPayload::Complete);
                    tracing::debug!(turn_id = %turn_id, round_trip, "turn completed");
                    let _ = result_tx.send(TurnResult::completed());
                    return;
                }

                tracing::debug!(
                    turn_id = %turn_id,
                    round_trip,
                    calls = pending.len(),
                    "dispatching tool batch"
                );
                let done_rx =
                    match scheduler.submit(pending, stream.clone(), cancel.child_token()) {
                        Ok(done_rx) => done_rx,
                        Err(err) => {
                            tracing::warn!(
                                turn_id = %turn_id,
                                error = %err,
                                "scheduler rejected batch"
                            );
                            let _ = result_tx.send(finish_failed(
                                &scheduler, &stream, &cancel, err.to_string(),
                            ));
                            return;
                        }
                    };
                let completed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = result_tx.send(finish_cancelled(&scheduler, &stream));
                        return;
                    }
                    completed = done_rx => match completed {
                        Ok(calls) => calls,
                        Err(_) => {
                            let _ = result_tx.send(finish_failed(
                                &scheduler, &stream, &cancel,
                                "tool batch dropped before completion".to_string(),
                            ));
                            return;
                        }
                    },
                };

                let results = completed
                    .iter()
                    .map(|call| {
                        call.response.clone().unwrap_or_else(|| {
                            ToolCallResponse::error(call.call_id(), "missing tool response")
                        })
                    })
                    .collect();
                outbound = OutboundMessage::tool_results(results);
            }
        });

        handle
    }
}

fn finish_cancelled(scheduler: &ToolScheduler, stream: &EventChannel) -> TurnResult {
    scheduler.cancel_all();
    stream.finish(StreamEventPayload::Error {
        message: "turn cancelled".to_string(),
    });
    tracing::debug!(turn_id = %stream.turn_id(), "turn cancelled");
    TurnResult::cancelled()
}

fn finish_failed(
    scheduler: &ToolScheduler,
    stream: &EventChannel,
    cancel: &CancellationToken,
    reason: String,
) -> TurnResult {
    scheduler.cancel_all();
    cancel.cancel();
    stream.finish(StreamEventPayload::Error {
        message: reason.clone(),
    });
    tracing::debug!(turn_id = %stream.turn_id(), error = %reason, "turn failed");
    TurnResult::failed(reason)
}

#[cfg(test)]
#[path = "tests/mod.rs"]
mod tests;
