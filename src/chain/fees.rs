// Priority fee feedback loop and consecutive-failure circuit breaker.
//
// Both controllers are stateless apart from their bounds; the mutable counters
// live in `FeeState`, which the orchestrator owns and lends out per call.

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{FeeConfig, RiskConfig};

/// Process-lifetime fee and failure bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct FeeState {
    /// Compute unit price bid, micro-lamports
    pub priority_fee: u64,
    pub sent: u64,
    pub confirmed: u64,
    pub consecutive_failures: u32,
}

impl FeeState {
    pub fn new(priority_fee: u64) -> Self {
        Self {
            priority_fee,
            sent: 0,
            confirmed: 0,
            consecutive_failures: 0,
        }
    }

    /// `confirmed / sent`, or 0 before anything was sent
    pub fn inclusion_ratio(&self) -> f64 {
        if self.sent > 0 {
            self.confirmed as f64 / self.sent as f64
        } else {
            0.0
        }
    }
}

/// Proportional-step controller on the inclusion ratio
#[derive(Debug, Clone)]
pub struct FeeController {
    pub min: u64,
    pub max: u64,
    pub step: u64,
    pub target_ratio: f64,
}

impl FeeController {
    pub fn new(min: u64, max: u64, step: u64, target_ratio: f64) -> Self {
        Self {
            min,
            max,
            step,
            target_ratio,
        }
    }

    pub fn from_config(config: &FeeConfig) -> Self {
        Self::new(config.min, config.max, config.step, config.target_inclusion_ratio)
    }

    /// Nudge the bid one step toward the target inclusion ratio, then clamp.
    pub fn tune(&self, state: &mut FeeState) {
        let ratio = state.inclusion_ratio();
        let before = state.priority_fee;
        let mut fee = state.priority_fee;

        if ratio < self.target_ratio && fee < self.max {
            fee = fee.saturating_add(self.step);
        } else if ratio > self.target_ratio && fee > self.min {
            fee = fee.saturating_sub(self.step);
        }
        state.priority_fee = fee.clamp(self.min, self.max.max(self.min));

        if state.priority_fee != before {
            debug!(
                "priority fee {} -> {} (inclusion {:.2} vs target {:.2})",
                before, state.priority_fee, ratio, self.target_ratio
            );
        }
    }
}

/// Forces a pause after too many failures in a row
#[derive(Debug, Clone)]
pub struct RiskGovernor {
    pub max_consecutive_failures: u32,
    pub cooldown: Duration,
}

impl RiskGovernor {
    pub fn new(max_consecutive_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.max_consecutive_failures, config.cooldown())
    }

    /// Record a failure. Returns the cooldown to sleep when the threshold is reached;
    /// the counter is reset in that case.
    pub fn on_failure(&self, state: &mut FeeState) -> Option<Duration> {
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                "🧯 {} consecutive failures, cooling down for {:?}",
                state.consecutive_failures, self.cooldown
            );
            state.consecutive_failures = 0;
            Some(self.cooldown)
        } else {
            None
        }
    }

    pub fn on_success(&self, state: &mut FeeState) {
        state.consecutive_failures = 0;
    }
}
