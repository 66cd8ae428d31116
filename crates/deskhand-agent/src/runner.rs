//! Performs single actions under a time bound.

use deskhand_host::{Actuate, ActuationError};
use deskhand_types::{Action, ActionOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Time budgets for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Budget for pointer moves, clicks and key presses.
    pub discrete_timeout: Duration,
    /// Base budget for typing, before the per-character allowance.
    pub text_base_timeout: Duration,
    pub per_character: Duration,
    /// Typing never gets more than this.
    pub text_timeout_cap: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            discrete_timeout: Duration::from_secs(2),
            text_base_timeout: Duration::from_secs(2),
            per_character: Duration::from_millis(20),
            text_timeout_cap: Duration::from_secs(10),
        }
    }
}

impl RunnerSettings {
    pub fn timeout_for(&self, action: &Action) -> Duration {
        match action {
            Action::Type { text } => {
                let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
                self.per_character
                    .checked_mul(chars)
                    .and_then(|extra| self.text_base_timeout.checked_add(extra))
                    .map_or(self.text_timeout_cap, |t| t.min(self.text_timeout_cap))
            }
            _ => self.discrete_timeout,
        }
    }
}

/// Turns actions into outcomes. Never fails; every problem becomes
/// `succeeded: false`.
#[derive(Clone)]
pub struct ActionRunner {
    actuator: Arc<dyn Actuate>,
    settings: RunnerSettings,
}

impl ActionRunner {
    pub fn new(actuator: Arc<dyn Actuate>, settings: RunnerSettings) -> Self {
        Self { actuator, settings }
    }

    pub async fn run(&self, action: &Action) -> ActionOutcome {
        if !action.is_supported() {
            warn!(kind = action.kind(), "unsupported action, skipping");
            return ActionOutcome::new(action.clone(), false);
        }

        let budget = self.settings.timeout_for(action);
        let result = match tokio::time::timeout(budget, self.actuator.actuate(action)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(kind = action.kind(), ?budget, "action timed out");
                return ActionOutcome::new(action.clone(), false);
            }
        };

        match result {
            Ok(()) => {
                debug!(kind = action.kind(), "action performed");
                ActionOutcome::new(action.clone(), true)
            }
            Err(ActuationError::Unsupported(kind)) => {
                warn!(kind = %kind, "actuator cannot perform action");
                ActionOutcome::new(action.clone(), false)
            }
            Err(e) => {
                warn!(kind = action.kind(), error = %e, "action failed");
                ActionOutcome::new(action.clone(), false)
            }
        }
    }
}
