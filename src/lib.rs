//! Tiller -- streaming turn engine for tool-using agents
//!
//! Tiller drives one conversational turn between an agent session and a
//! human operator: it batches the agent's tool-call requests, gates risky
//! calls behind an explicit approval step, executes approved calls, and
//! streams every state transition to the client as an ordered event log.
//! Cancellation is safe at any point and leaves the engine ready for the
//! next turn.
//!
//! The agent session, the tool implementations, and the approval policy
//! are collaborators injected through the traits in [`session`] and
//! [`tools`]; the transport is anything ordered and cancellable behind
//! [`transport::EventTransport`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod prelude;
pub mod scheduler;
pub mod session;
pub mod tools;
pub mod transport;
pub mod turn;

pub use engine::TurnEngine;
pub use error::{Result, TillerError};
