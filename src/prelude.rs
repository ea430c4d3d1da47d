//! Convenience re-exports for common use.

pub use crate::config::EngineConfig;
pub use crate::engine::TurnEngine;
pub use crate::error::{Result, TillerError};
pub use crate::events::{StreamEvent, StreamEventPayload, TurnId};
pub use crate::scheduler::{
    ConfirmationDetails, ConfirmationOutcome, ToolCall, ToolCallRequest, ToolCallResponse,
    ToolCallStatus, ToolScheduler,
};
pub use crate::session::{
    FileReference, FragmentStream, OutboundMessage, ResponseFragment, Session, SessionProvider,
};
pub use crate::tools::{
    ApprovalPolicy, FnTool, OutputSink, StaticApprovalPolicy, Tool, ToolExecutor, ToolSet,
};
pub use crate::transport::{channel_transport, ndjson_stream, EventChannel, EventTransport};
pub use crate::turn::{TurnHandle, TurnRequest, TurnResult, TurnRunner, TurnStatus};
