//! The outbound response stream: close-once framing over a pluggable
//! ordered transport.

use std::sync::Mutex;

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Result, TillerError};
use crate::events::{self, StreamEvent, StreamEventPayload, TurnId};

/// One ordered, cancellable delivery channel to the client. Implementations
/// report [`TillerError::TransportClosed`] once the peer is gone.
pub trait EventTransport: Send {
    fn send(&mut self, frame: Vec<u8>) -> Result<()>;
}

impl EventTransport for mpsc::UnboundedSender<Vec<u8>> {
    fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| TillerError::TransportClosed)
    }
}

struct ChannelState {
    transport: Option<Box<dyn EventTransport>>,
    seq: u64,
}

/// The current response stream for one turn.
///
/// Owned by the orchestrator for the duration of the turn and handed to the
/// scheduler by `Arc`. Writes after the peer disconnected or after
/// [`finish`](EventChannel::finish) are no-ops; the underlying transport is
/// released exactly once.
pub struct EventChannel {
    turn_id: TurnId,
    state: Mutex<ChannelState>,
}

impl EventChannel {
    pub fn new(turn_id: TurnId, transport: Box<dyn EventTransport>) -> Self {
        Self {
            turn_id,
            state: Mutex::new(ChannelState {
                transport: Some(transport),
                seq: 0,
            }),
        }
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Append one event to the log. Never fails: encoding trouble and
    /// closed peers downgrade to a trace, not to an error the domain
    /// layer has to handle.
    pub fn emit(&self, payload: StreamEventPayload) {
        let mut state = self.state.lock().expect("event channel lock");
        self.write_locked(&mut state, payload);
    }

    /// Write a terminal event, then release the transport. Returns `true`
    /// when this call performed the close, `false` when the channel was
    /// already closed (cancellation racing natural completion).
    pub fn finish(&self, payload: StreamEventPayload) -> bool {
        let mut state = self.state.lock().expect("event channel lock");
        if state.transport.is_none() {
            return false;
        }
        self.write_locked(&mut state, payload);
        state.transport = None;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("event channel lock")
            .transport
            .is_none()
    }

    fn write_locked(&self, state: &mut ChannelState, payload: StreamEventPayload) {
        let Some(transport) = state.transport.as_mut() else {
            tracing::trace!(turn_id = %self.turn_id, "event dropped after close");
            return;
        };
        state.seq += 1;
        let event = StreamEvent {
            turn_id: self.turn_id,
            seq: state.seq,
            timestamp: chrono::Utc::now(),
            payload,
        };
        let frame = match events::encode(&event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(turn_id = %self.turn_id, error = %err, "event encoding failed");
                return;
            }
        };
        if let Err(TillerError::TransportClosed) = transport.send(frame) {
            tracing::debug!(turn_id = %self.turn_id, "peer disconnected, discarding further events");
            state.transport = None;
        }
    }
}

/// In-process transport pair: the sender side plugs into an
/// [`EventChannel`], the receiver side feeds the client connection.
pub fn channel_transport() -> (Box<dyn EventTransport>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Box::new(tx), rx)
}

/// Adapt a frame receiver into a byte stream suitable for a chunked HTTP
/// response body. Ends when the producing channel closes.
pub fn ndjson_stream(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> impl Stream<Item = Vec<u8>> + Send {
    async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield frame;
        }
    }
}
