//! Traffic shaping primitives.
//!
//! A traffic shaping controller is split in two halves:
//! - [`TrafficShapingCalculator`]: how many admissions are available right now.
//! - [`TrafficShapingChecker`]: what to do with a call given that allowance.
//!
//! The rule manager only builds and stores controllers; the per-request hot path
//! owns the statistics and hands them in as a [`StatSnapshot`].

use std::time::Duration;

pub mod calculator;
pub mod checker;
pub use calculator::{DirectCalculator, WarmUpCalculator, DEFAULT_WARM_UP_COLD_FACTOR};
pub use checker::{RejectChecker, ThrottlingChecker};

/// Outcome of a shaping check.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenResult {
    /// The call may proceed now.
    Pass,
    /// The call is refused.
    Blocked {
        /// Short machine-readable cause (e.g. "flow_threshold_exceeded").
        reason: &'static str,
    },
    /// The call may proceed after waiting.
    ShouldWait {
        /// How long the caller must wait before proceeding.
        wait: Duration,
    },
}

impl TokenResult {
    /// Helper to check for [`TokenResult::Pass`].
    pub fn is_pass(&self) -> bool {
        matches!(self, TokenResult::Pass)
    }

    /// Helper to check for [`TokenResult::Blocked`].
    pub fn is_blocked(&self) -> bool {
        matches!(self, TokenResult::Blocked { .. })
    }

    /// Wait duration for [`TokenResult::ShouldWait`].
    pub fn wait(&self) -> Option<Duration> {
        match self {
            TokenResult::ShouldWait { wait } => Some(*wait),
            _ => None,
        }
    }
}

/// Statistics the hot path reads for the rule's measured resource.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSnapshot {
    /// Current value of the rule's metric (QPS in the current window, or concurrency).
    pub current: f64,
    /// Passed QPS of the previous one-second window.
    pub previous_pass_qps: f64,
}

/// Computes the number of admissions currently available.
pub trait TrafficShapingCalculator: Send + Sync + std::fmt::Debug {
    /// Allowed tokens for a call acquiring `batch_count` permits.
    fn calculate_allowed_tokens(&self, batch_count: u32, stat: &StatSnapshot) -> f64;
}

/// Decides admission given the calculator's allowance.
pub trait TrafficShapingChecker: Send + Sync + std::fmt::Debug {
    /// Check a call acquiring `batch_count` permits against `threshold`.
    fn do_check(&self, batch_count: u32, threshold: f64, stat: &StatSnapshot) -> TokenResult;
}
