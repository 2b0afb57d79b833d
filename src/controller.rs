//! Runtime pairing of a rule with its calculator and checker.

use std::fmt;
use std::sync::Arc;

use crate::rule::Rule;
use crate::shaping::{StatSnapshot, TokenResult, TrafficShapingCalculator, TrafficShapingChecker};

/// Traffic shaping controller for one rule.
///
/// Never mutated after construction. A rule reload replaces controllers wholesale.
pub struct TrafficShapingController {
    rule: Arc<Rule>,
    calculator: Arc<dyn TrafficShapingCalculator>,
    checker: Arc<dyn TrafficShapingChecker>,
}

impl TrafficShapingController {
    /// Pair `rule` with a calculator and a checker.
    pub fn new(
        calculator: Arc<dyn TrafficShapingCalculator>,
        checker: Arc<dyn TrafficShapingChecker>,
        rule: Arc<Rule>,
    ) -> Self {
        Self { rule, calculator, checker }
    }

    /// The rule this controller was built from.
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// Token calculator half.
    pub fn calculator(&self) -> &Arc<dyn TrafficShapingCalculator> {
        &self.calculator
    }

    /// Admission checker half.
    pub fn checker(&self) -> &Arc<dyn TrafficShapingChecker> {
        &self.checker
    }

    /// Run the calculator, then the checker, for a call acquiring `batch_count` permits.
    pub fn perform_checking(&self, batch_count: u32, stat: &StatSnapshot) -> TokenResult {
        let allowed = self.calculator.calculate_allowed_tokens(batch_count, stat);
        self.checker.do_check(batch_count, allowed, stat)
    }
}

impl fmt::Debug for TrafficShapingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficShapingController")
            .field("rule", &self.rule)
            .field("calculator", &self.calculator)
            .field("checker", &self.checker)
            .finish()
    }
}
