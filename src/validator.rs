//! Rule validation.
//!
//! Checks run in a fixed order and stop at the first violation:
//! resource, threshold, custom strategy/behavior sign, relation, warm-up parameters.
//! Unknown metric types and relation strategies cannot reach this point; they are
//! rejected when a rule is decoded.

use crate::error::RuleError;
use crate::rule::{ControlBehavior, RelationStrategy, Rule, TokenCalculateStrategy};

/// Check whether `rule` may be turned into a traffic shaping controller.
pub fn is_valid_rule(rule: &Rule) -> Result<(), RuleError> {
    if rule.resource.is_empty() {
        return Err(RuleError::EmptyResource);
    }
    if !rule.count.is_finite() || rule.count < 0.0 {
        return Err(RuleError::InvalidThreshold(rule.count));
    }
    if let TokenCalculateStrategy::Custom(n) = rule.token_calculate_strategy {
        if n < 0 {
            return Err(RuleError::NegativeTokenCalculateStrategy(n));
        }
    }
    if let ControlBehavior::Custom(n) = rule.control_behavior {
        if n < 0 {
            return Err(RuleError::NegativeControlBehavior(n));
        }
    }
    if rule.relation_strategy == RelationStrategy::AssociatedResource && rule.ref_resource.is_empty()
    {
        return Err(RuleError::MissingRefResource);
    }
    if rule.token_calculate_strategy == TokenCalculateStrategy::WarmUp {
        if rule.warm_up_period_sec == 0 {
            return Err(RuleError::InvalidWarmUpPeriod);
        }
        if rule.warm_up_cold_factor == 1 {
            return Err(RuleError::InvalidWarmUpColdFactor);
        }
    }
    Ok(())
}

impl Rule {
    /// See [`is_valid_rule`].
    pub fn validate(&self) -> Result<(), RuleError> {
        is_valid_rule(self)
    }
}
