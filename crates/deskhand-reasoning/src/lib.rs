//! Decision capability for the deskhand agent.
//!
//! A [`Decide`] implementation receives the system prompt assembled by the
//! task executor, the captured snapshot and a [`CapabilityDescription`], and
//! answers with a [`Decision`](deskhand_types::Decision): narrative text plus
//! an ordered action list.
//!
//! [`AnthropicDecider`] talks to the Anthropic Messages API using the
//! `computer` tool and maps its tool calls onto the agent's action vocabulary.

pub mod anthropic;
pub mod decide;
pub mod error;

pub use anthropic::AnthropicDecider;
pub use decide::{CapabilityDescription, Decide, DecisionRequest};
pub use error::DecisionError;
