//! Token calculators: how many admissions a rule allows right now.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::rule::Rule;
use crate::shaping::{StatSnapshot, TrafficShapingCalculator};

/// Cold factor used when a rule carries one that cannot shape a curve (`<= 1`).
pub const DEFAULT_WARM_UP_COLD_FACTOR: u32 = 3;

/// Fixed-rate allowance: the rule threshold itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectCalculator {
    threshold: f64,
}

impl DirectCalculator {
    /// Calculator that always allows `threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl TrafficShapingCalculator for DirectCalculator {
    fn calculate_allowed_tokens(&self, _batch_count: u32, _stat: &StatSnapshot) -> f64 {
        self.threshold
    }
}

/// Cold-start ramp: a long-idle resource starts at `threshold / cold_factor` and
/// climbs to `threshold` over the warm-up period as traffic consumes stored tokens.
///
/// Tokens are synced at most once per clock second. Above `warning_token` the
/// allowance follows the line `1 / (above * slope + 1 / threshold)`.
#[derive(Debug)]
pub struct WarmUpCalculator {
    threshold: f64,
    cold_factor: u32,
    warning_token: u64,
    max_token: u64,
    slope: f64,
    stored_tokens: AtomicI64,
    last_filled_millis: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl WarmUpCalculator {
    /// Build the curve from a warm-up rule.
    pub fn new(rule: &Rule, clock: Arc<dyn Clock>) -> Self {
        let mut cold_factor = rule.warm_up_cold_factor;
        if cold_factor <= 1 {
            warn!(
                target: "flowguard::shaping",
                resource = %rule.resource,
                cold_factor,
                "invalid warm-up cold factor; using default {}",
                DEFAULT_WARM_UP_COLD_FACTOR
            );
            cold_factor = DEFAULT_WARM_UP_COLD_FACTOR;
        }
        let threshold = rule.count;
        let period = f64::from(rule.warm_up_period_sec);
        let factor = f64::from(cold_factor);

        // Float to int casts saturate; huge thresholds pin the curve at u64::MAX.
        let warning_token = (period * threshold / (factor - 1.0)) as u64;
        let max_token =
            warning_token.saturating_add((2.0 * period * threshold / (1.0 + factor)) as u64);
        let span = max_token.saturating_sub(warning_token).max(1);
        let slope = (factor - 1.0) / threshold / span as f64;

        let now = clock.now_millis();
        Self {
            threshold,
            cold_factor,
            warning_token,
            max_token,
            slope,
            // Starts cold.
            stored_tokens: AtomicI64::new(i64::try_from(max_token).unwrap_or(i64::MAX)),
            last_filled_millis: AtomicU64::new(now - now % 1000),
            clock,
        }
    }

    /// Token level below which the full threshold is allowed.
    pub fn warning_token(&self) -> u64 {
        self.warning_token
    }

    /// Token level of a fully cold resource.
    pub fn max_token(&self) -> u64 {
        self.max_token
    }

    /// Tokens currently stored.
    pub fn stored_tokens(&self) -> i64 {
        self.stored_tokens.load(Ordering::SeqCst)
    }

    fn sync_tokens(&self, pass_qps: f64) {
        let now = self.clock.now_millis();
        let now = now - now % 1000;
        let last = self.last_filled_millis.load(Ordering::SeqCst);
        if now <= last {
            return;
        }

        let old = self.stored_tokens.load(Ordering::SeqCst);
        let refilled = self.cool_down_tokens(old, now - last, pass_qps);
        if self
            .stored_tokens
            .compare_exchange(old, refilled, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let consumed = pass_qps as i64;
            let before = self.stored_tokens.fetch_sub(consumed, Ordering::SeqCst);
            if before.saturating_sub(consumed) < 0 {
                self.stored_tokens.store(0, Ordering::SeqCst);
            }
            self.last_filled_millis.store(now, Ordering::SeqCst);
        }
    }

    fn cool_down_tokens(&self, old: i64, elapsed_millis: u64, pass_qps: f64) -> i64 {
        let warning = i64::try_from(self.warning_token).unwrap_or(i64::MAX);
        let refill = (elapsed_millis as f64 * self.threshold / 1000.0) as i64;
        // Refill while well below the warning line, or while traffic is lighter than
        // the cold rate.
        let refilled = if old < warning
            || (old > warning && pass_qps < self.threshold / f64::from(self.cold_factor))
        {
            old.saturating_add(refill)
        } else {
            old
        };
        refilled.min(i64::try_from(self.max_token).unwrap_or(i64::MAX))
    }
}

impl TrafficShapingCalculator for WarmUpCalculator {
    fn calculate_allowed_tokens(&self, _batch_count: u32, stat: &StatSnapshot) -> f64 {
        if self.threshold <= 0.0 {
            return 0.0;
        }
        self.sync_tokens(stat.previous_pass_qps);

        let rest = u64::try_from(self.stored_tokens.load(Ordering::SeqCst)).unwrap_or(0);
        if rest >= self.warning_token {
            let above = (rest - self.warning_token) as f64;
            1.0 / (above * self.slope + 1.0 / self.threshold)
        } else {
            self.threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rule::{ControlBehavior, TokenCalculateStrategy};
    use std::time::Duration;

    fn warm_up_rule(count: f64, period: u32, cold_factor: u32) -> Rule {
        Rule::new("warm", count)
            .with_shaping(TokenCalculateStrategy::WarmUp, ControlBehavior::Reject)
            .with_warm_up(period, cold_factor)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn direct_returns_threshold() {
        let calc = DirectCalculator::new(42.0);
        assert_eq!(calc.calculate_allowed_tokens(1, &StatSnapshot::default()), 42.0);
    }

    #[test]
    fn warm_up_curve_constants() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(10.0, 10, 3), Arc::new(clock));
        assert_eq!(calc.warning_token(), 50);
        assert_eq!(calc.max_token(), 100);
        assert_eq!(calc.stored_tokens(), 100);
    }

    #[test]
    fn cold_resource_starts_at_threshold_over_cold_factor() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(10.0, 10, 3), Arc::new(clock));
        let allowed = calc.calculate_allowed_tokens(1, &StatSnapshot::default());
        assert!(approx(allowed, 10.0 / 3.0), "got {allowed}");
    }

    #[test]
    fn sustained_traffic_warms_up_to_threshold() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(10.0, 10, 3), Arc::new(clock.clone()));
        let busy = StatSnapshot { current: 0.0, previous_pass_qps: 10.0 };

        let mut last = calc.calculate_allowed_tokens(1, &busy);
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            let next = calc.calculate_allowed_tokens(1, &busy);
            assert!(next >= last, "allowance should not drop while warming ({next} < {last})");
            last = next;
        }
        assert_eq!(calc.stored_tokens(), 50);
        assert!(approx(last, 10.0), "got {last}");
    }

    #[test]
    fn idle_resource_cools_down_again() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(10.0, 10, 3), Arc::new(clock.clone()));
        let busy = StatSnapshot { current: 0.0, previous_pass_qps: 10.0 };
        for _ in 0..8 {
            clock.advance(Duration::from_secs(1));
            calc.calculate_allowed_tokens(1, &busy);
        }
        assert!(calc.stored_tokens() < 50);

        clock.advance(Duration::from_secs(30));
        let allowed = calc.calculate_allowed_tokens(1, &StatSnapshot::default());
        assert_eq!(calc.stored_tokens(), 100);
        assert!(approx(allowed, 10.0 / 3.0), "got {allowed}");
    }

    #[test]
    fn unit_cold_factor_falls_back_to_default() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(10.0, 10, 1), Arc::new(clock));
        assert_eq!(calc.warning_token(), 50);
    }

    #[test]
    fn huge_threshold_saturates_the_curve() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(1e20, 10, 3), Arc::new(clock.clone()));
        assert_eq!(calc.max_token(), u64::MAX);
        assert!(calc.warning_token() <= calc.max_token());

        let busy = StatSnapshot { current: 0.0, previous_pass_qps: 1e20 };
        let allowed = calc.calculate_allowed_tokens(1, &busy);
        assert!(allowed.is_finite() && allowed > 0.0, "got {allowed}");
        clock.advance(Duration::from_secs(1));
        let allowed = calc.calculate_allowed_tokens(1, &busy);
        assert!(allowed.is_finite() && allowed > 0.0, "got {allowed}");
    }

    #[test]
    fn zero_threshold_allows_nothing() {
        let clock = ManualClock::new();
        let calc = WarmUpCalculator::new(&warm_up_rule(0.0, 10, 3), Arc::new(clock));
        assert_eq!(calc.calculate_allowed_tokens(1, &StatSnapshot::default()), 0.0);
    }
}
