//! The decision port.

use crate::error::DecisionError;
use async_trait::async_trait;
use deskhand_types::{ActionSpec, Decision, VOCABULARY};
use serde::Serialize;
use std::fmt;

/// Obtains a decision for one task.
#[async_trait]
pub trait Decide: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError>;
}

/// Everything a decision service is given for one task.
#[derive(Clone)]
pub struct DecisionRequest {
    /// Instructions plus the serialized conversation window.
    pub system_prompt: String,
    /// PNG snapshot of the environment.
    pub snapshot: Vec<u8>,
    pub capabilities: CapabilityDescription,
    /// Upper bound on the size of the generated answer, in tokens.
    pub max_output_tokens: u32,
}

impl fmt::Debug for DecisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionRequest")
            .field("system_prompt", &self.system_prompt)
            .field("snapshot_bytes", &self.snapshot.len())
            .field("capabilities", &self.capabilities)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

/// What the agent can do in the target environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDescription {
    pub display_width_px: u32,
    pub display_height_px: u32,
    pub display_number: u32,
    pub actions: &'static [ActionSpec],
}

impl CapabilityDescription {
    /// A desktop of the given geometry driven through the full action vocabulary.
    pub fn desktop(display_width_px: u32, display_height_px: u32, display_number: u32) -> Self {
        Self {
            display_width_px,
            display_height_px,
            display_number,
            actions: VOCABULARY,
        }
    }
}

impl Default for CapabilityDescription {
    fn default() -> Self {
        Self::desktop(1920, 1080, 1)
    }
}
