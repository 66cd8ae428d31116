//! Shared wire types for the deskhand worker agent.
//!
//! This crate provides the types exchanged with the hub and passed between the
//! agent's components: the [`Envelope`] that frames every message, the
//! [`Credentials`] presented during the handshake, the [`Task`] a hub dispatches,
//! the [`Decision`] a reasoning service returns, the [`Action`] vocabulary and
//! the [`TaskResult`] reported back.
//!
//! No other deskhand crate defines wire formats. Keeping them here lets the
//! host, reasoning and agent crates depend on one another only through these
//! types.

mod action;
mod envelope;
mod task;

pub use action::{screen_coordinate, Action, ActionOutcome, ActionSpec, VOCABULARY};
pub use envelope::{Credentials, Envelope};
pub use task::{Decision, SessionId, Task, TaskResult};

use thiserror::Error;

/// Envelope `type` tags understood by the agent.
pub mod message_type {
    /// Outbound handshake request carrying [`Credentials`](crate::Credentials).
    pub const AUTH: &str = "auth";
    /// Inbound handshake acceptance.
    pub const AUTHENTICATED: &str = "authenticated";
    /// Inbound liveness probe.
    pub const PING: &str = "ping";
    /// Outbound liveness reply.
    pub const PONG: &str = "pong";
    /// Inbound task dispatch.
    pub const CHAT_CONTINUE: &str = "agent.chat.continue";
    /// Outbound task result.
    pub const CHAT_CONTINUE_RESULT: &str = "agent.chat.continue.result";
}

/// Errors raised while decoding or encoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope payload does not describe a task.
    #[error("invalid task payload: {0}")]
    InvalidTask(#[source] serde_json::Error),

    /// A value could not be encoded for sending.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}
