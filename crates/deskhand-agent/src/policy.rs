//! Reconnect delay policy.
//!
//! Two causes lead the supervisor back to `Disconnected`: a connection or
//! handshake that never succeeded, and an established connection that
//! dropped. Each has its own delay. The failure delay may grow across
//! consecutive failures:
//!
//! ```text
//! delay(n) = min(after_failure * factor^(n-1), max)    n >= 1
//! ```
//!
//! With the default `factor = 1.0` the delay is fixed.

use std::time::Duration;
use thiserror::Error;

/// Why the supervisor is about to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// `consecutive` attempts in a row have failed to reach `Connected`.
    Failure { consecutive: u32 },
    /// A connection that reached `Connected` has dropped.
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconnectPolicyError {
    #[error("{0} delay must be greater than zero")]
    ZeroDelay(&'static str),

    #[error("backoff factor must be finite and at least 1.0, got {0}")]
    InvalidFactor(f64),

    #[error("maximum delay {max:?} is shorter than the failure delay {first:?}")]
    MaxBelowFirst { first: Duration, max: Duration },
}

/// Delays between reconnect attempts. Every delay is strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    after_failure: Duration,
    after_disconnect: Duration,
    factor: f64,
    max: Duration,
}

impl ReconnectPolicy {
    pub fn new(
        after_failure: Duration,
        after_disconnect: Duration,
        factor: f64,
        max: Duration,
    ) -> Result<Self, ReconnectPolicyError> {
        if after_failure.is_zero() {
            return Err(ReconnectPolicyError::ZeroDelay("failure"));
        }
        if after_disconnect.is_zero() {
            return Err(ReconnectPolicyError::ZeroDelay("disconnect"));
        }
        if !factor.is_finite() || factor < 1.0 {
            return Err(ReconnectPolicyError::InvalidFactor(factor));
        }
        if max < after_failure {
            return Err(ReconnectPolicyError::MaxBelowFirst {
                first: after_failure,
                max,
            });
        }
        Ok(Self {
            after_failure,
            after_disconnect,
            factor,
            max,
        })
    }

    /// Fixed delays, no growth.
    pub fn fixed(
        after_failure: Duration,
        after_disconnect: Duration,
    ) -> Result<Self, ReconnectPolicyError> {
        Self::new(after_failure, after_disconnect, 1.0, after_failure)
    }

    pub fn delay(&self, cause: RetryCause) -> Duration {
        match cause {
            RetryCause::Disconnect => self.after_disconnect,
            RetryCause::Failure { consecutive } => self.failure_delay(consecutive),
        }
    }

    fn failure_delay(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.after_failure.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled).max(self.after_failure)
    }
}

impl Default for ReconnectPolicy {
    /// 5s after a failure, 2s after a disconnect, no growth.
    fn default() -> Self {
        Self {
            after_failure: Duration::from_secs(5),
            after_disconnect: Duration::from_secs(2),
            factor: 1.0,
            max: Duration::from_secs(60),
        }
    }
}
