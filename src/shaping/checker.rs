//! Admission checkers: what happens to a call given the calculator's allowance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::shaping::{StatSnapshot, TokenResult, TrafficShapingChecker};

const NEVER_PASSED: u64 = u64::MAX;

/// Refuses calls once the current metric plus the batch exceeds the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectChecker;

impl TrafficShapingChecker for RejectChecker {
    fn do_check(&self, batch_count: u32, threshold: f64, stat: &StatSnapshot) -> TokenResult {
        if stat.current + f64::from(batch_count) > threshold {
            TokenResult::Blocked { reason: "flow_threshold_exceeded" }
        } else {
            TokenResult::Pass
        }
    }
}

/// Paces calls uniformly at `threshold` per second.
///
/// A call that arrives before its slot reserves the next free slot and is told to
/// wait, unless the wait would exceed the queueing bound, in which case it is blocked.
#[derive(Debug)]
pub struct ThrottlingChecker {
    max_queueing_time_ns: u64,
    last_passed_nanos: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ThrottlingChecker {
    /// Checker queueing calls for at most `max_queueing_time_ms`.
    pub fn new(max_queueing_time_ms: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_queueing_time_ns: u64::from(max_queueing_time_ms) * 1_000_000,
            last_passed_nanos: AtomicU64::new(NEVER_PASSED),
            clock,
        }
    }

    fn queueing_timeout() -> TokenResult {
        TokenResult::Blocked { reason: "queueing_timeout" }
    }
}

impl TrafficShapingChecker for ThrottlingChecker {
    fn do_check(&self, batch_count: u32, threshold: f64, _stat: &StatSnapshot) -> TokenResult {
        if batch_count == 0 {
            return TokenResult::Pass;
        }
        if threshold <= 0.0 {
            return TokenResult::Blocked { reason: "flow_threshold_exceeded" };
        }
        let interval_ns = (f64::from(batch_count) * 1e9 / threshold).ceil() as u64;

        let now = self.clock.now_nanos();
        let last = self.last_passed_nanos.load(Ordering::SeqCst);
        let due = last == NEVER_PASSED || last.saturating_add(interval_ns) <= now;
        if due
            && self
                .last_passed_nanos
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return TokenResult::Pass;
        }

        // Lost the race or not yet due; the slot is taken from here on.
        let estimated = self
            .last_passed_nanos
            .load(Ordering::SeqCst)
            .saturating_add(interval_ns)
            .saturating_sub(now);
        if estimated > self.max_queueing_time_ns {
            return Self::queueing_timeout();
        }

        let reserved = self.last_passed_nanos.fetch_add(interval_ns, Ordering::SeqCst) + interval_ns;
        let wait = reserved.saturating_sub(self.clock.now_nanos());
        if wait > self.max_queueing_time_ns {
            self.last_passed_nanos.fetch_sub(interval_ns, Ordering::SeqCst);
            return Self::queueing_timeout();
        }
        TokenResult::ShouldWait { wait: Duration::from_nanos(wait) }
    }
}
