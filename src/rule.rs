//! Flow-control rule model.
//!
//! A [`Rule`] is a plain value. Two rules are *equivalent* when every field is equal;
//! equivalence (not identity) drives deduplication and change detection in the
//! rule manager.
//!
//! Wire format (serde): camelCase field names, enums encoded as integers so rule
//! documents stay compatible with existing flow-control consoles. Missing fields take
//! the zero value of the wire encoding (`metricType` 0 is concurrency).
//!
//! ```rust
//! use flowguard::rule::{ControlBehavior, Rule, TokenCalculateStrategy};
//!
//! let rule: Rule = serde_json::from_str(
//!     r#"{"resource":"GET:/orders","count":100,"tokenCalculateStrategy":1,
//!         "controlBehavior":0,"warmUpPeriodSec":10,"warmUpColdFactor":3}"#,
//! ).unwrap();
//! assert_eq!(rule.token_calculate_strategy, TokenCalculateStrategy::WarmUp);
//! assert_eq!(rule.control_behavior, ControlBehavior::Reject);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// What a rule measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MetricType {
    /// In-flight call count. Wire value 0, so documents without `metricType` get it.
    #[default]
    Concurrency,
    /// Calls per second.
    Qps,
}

impl TryFrom<i32> for MetricType {
    type Error = RuleError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MetricType::Concurrency),
            1 => Ok(MetricType::Qps),
            other => Err(RuleError::UnknownMetricType(other)),
        }
    }
}

impl From<MetricType> for i32 {
    fn from(value: MetricType) -> Self {
        match value {
            MetricType::Concurrency => 0,
            MetricType::Qps => 1,
        }
    }
}

/// Whether the rule measures its own resource or a reference resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RelationStrategy {
    /// Statistics of the governed resource itself.
    #[default]
    CurrentResource,
    /// Statistics of [`Rule::ref_resource`].
    AssociatedResource,
}

impl TryFrom<i32> for RelationStrategy {
    type Error = RuleError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RelationStrategy::CurrentResource),
            1 => Ok(RelationStrategy::AssociatedResource),
            other => Err(RuleError::UnknownRelationStrategy(other)),
        }
    }
}

impl From<RelationStrategy> for i32 {
    fn from(value: RelationStrategy) -> Self {
        match value {
            RelationStrategy::CurrentResource => 0,
            RelationStrategy::AssociatedResource => 1,
        }
    }
}

/// How many admissions are currently available.
///
/// `Custom` values select generators registered at runtime. On the wire `0` and `1`
/// always decode to the built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum TokenCalculateStrategy {
    /// Fixed rate: the threshold itself.
    #[default]
    Direct,
    /// Cold-start ramp towards the threshold.
    WarmUp,
    /// Strategy provided by a registered generator.
    Custom(i32),
}

impl TokenCalculateStrategy {
    /// Built-in strategies; generators keyed on these cannot be replaced or removed.
    pub const BUILTIN: [TokenCalculateStrategy; 2] =
        [TokenCalculateStrategy::Direct, TokenCalculateStrategy::WarmUp];

    /// True for [`Self::BUILTIN`] members.
    pub fn is_builtin(self) -> bool {
        Self::BUILTIN.contains(&self)
    }
}

impl From<i32> for TokenCalculateStrategy {
    fn from(value: i32) -> Self {
        match value {
            0 => TokenCalculateStrategy::Direct,
            1 => TokenCalculateStrategy::WarmUp,
            other => TokenCalculateStrategy::Custom(other),
        }
    }
}

impl From<TokenCalculateStrategy> for i32 {
    fn from(value: TokenCalculateStrategy) -> Self {
        match value {
            TokenCalculateStrategy::Direct => 0,
            TokenCalculateStrategy::WarmUp => 1,
            TokenCalculateStrategy::Custom(n) => n,
        }
    }
}

/// What happens once admissions are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ControlBehavior {
    /// Refuse immediately.
    #[default]
    Reject,
    /// Queue and pace calls, up to `max_queueing_time_ms`.
    Throttling,
    /// Behavior provided by a registered generator.
    Custom(i32),
}

impl ControlBehavior {
    /// Built-in behaviors; generators keyed on these cannot be replaced or removed.
    pub const BUILTIN: [ControlBehavior; 2] = [ControlBehavior::Reject, ControlBehavior::Throttling];

    /// True for [`Self::BUILTIN`] members.
    pub fn is_builtin(self) -> bool {
        Self::BUILTIN.contains(&self)
    }
}

impl From<i32> for ControlBehavior {
    fn from(value: i32) -> Self {
        match value {
            0 => ControlBehavior::Reject,
            1 => ControlBehavior::Throttling,
            other => ControlBehavior::Custom(other),
        }
    }
}

impl From<ControlBehavior> for i32 {
    fn from(value: ControlBehavior) -> Self {
        match value {
            ControlBehavior::Reject => 0,
            ControlBehavior::Throttling => 1,
            ControlBehavior::Custom(n) => n,
        }
    }
}

/// Flow-control policy for one resource.
///
/// Several rules may target the same resource (for example one QPS rule and one
/// concurrency rule). Derived equality is the equivalence relation used everywhere.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    /// Resource name this rule governs. Must be non-empty.
    pub resource: String,
    /// What is measured.
    pub metric_type: MetricType,
    /// Threshold; must be `>= 0`.
    pub count: f64,
    /// Whether `ref_resource` is consulted.
    pub relation_strategy: RelationStrategy,
    /// Reference resource, required for [`RelationStrategy::AssociatedResource`].
    pub ref_resource: String,
    /// Token calculation strategy.
    pub token_calculate_strategy: TokenCalculateStrategy,
    /// Behavior once tokens run out.
    pub control_behavior: ControlBehavior,
    /// Warm-up duration; required for [`TokenCalculateStrategy::WarmUp`].
    pub warm_up_period_sec: u32,
    /// Cold factor of the warm-up curve; must not be 1 for [`TokenCalculateStrategy::WarmUp`].
    pub warm_up_cold_factor: u32,
    /// Longest wait a throttled call may be queued for.
    pub max_queueing_time_ms: u32,
}

impl Rule {
    /// Rule for `resource` with threshold `count`, built-in Direct/Reject shaping.
    ///
    /// The metric type is the wire default, [`MetricType::Concurrency`]; use
    /// [`with_metric_type`](Self::with_metric_type) for QPS rules.
    pub fn new(resource: impl Into<String>, count: f64) -> Self {
        Self { resource: resource.into(), count, ..Self::default() }
    }

    /// Set the metric type.
    pub fn with_metric_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    /// Measure `ref_resource` instead of the governed resource.
    pub fn associated_with(mut self, ref_resource: impl Into<String>) -> Self {
        self.relation_strategy = RelationStrategy::AssociatedResource;
        self.ref_resource = ref_resource.into();
        self
    }

    /// Select the (strategy, behavior) pair that resolves this rule's generator.
    pub fn with_shaping(
        mut self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
    ) -> Self {
        self.token_calculate_strategy = strategy;
        self.control_behavior = behavior;
        self
    }

    /// Configure the warm-up curve.
    pub fn with_warm_up(mut self, period_sec: u32, cold_factor: u32) -> Self {
        self.warm_up_period_sec = period_sec;
        self.warm_up_cold_factor = cold_factor;
        self
    }

    /// Configure the throttling queue bound.
    pub fn with_max_queueing_time_ms(mut self, max_queueing_time_ms: u32) -> Self {
        self.max_queueing_time_ms = max_queueing_time_ms;
        self
    }

    /// Value equivalence; two rules with identical fields are interchangeable.
    pub fn is_equivalent(&self, other: &Rule) -> bool {
        self == other
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warm_up_rule(period: u32) -> Rule {
        Rule::new("test", 10.0)
            .with_shaping(TokenCalculateStrategy::WarmUp, ControlBehavior::Throttling)
            .with_warm_up(period, 2)
    }

    #[test]
    fn different_resources_are_not_equivalent() {
        let r1 = Rule::new("abc1", 0.0);
        let r2 = Rule::new("abc2", 0.0);
        assert!(!r1.is_equivalent(&r2));
    }

    #[test]
    fn different_warm_up_period_is_not_equivalent() {
        assert!(!warm_up_rule(10).is_equivalent(&warm_up_rule(8)));
    }

    #[test]
    fn distinct_instances_with_equal_fields_are_equivalent() {
        let a = warm_up_rule(10).with_metric_type(MetricType::Qps);
        let b = a.clone();
        assert!(a.is_equivalent(&a));
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn builtin_membership_ignores_custom_values_in_legacy_range() {
        assert!(TokenCalculateStrategy::Direct.is_builtin());
        assert!(TokenCalculateStrategy::WarmUp.is_builtin());
        assert!(!TokenCalculateStrategy::Custom(0).is_builtin());
        assert!(ControlBehavior::Throttling.is_builtin());
        assert!(!ControlBehavior::Custom(1).is_builtin());
    }

    #[test]
    fn decodes_camel_case_with_defaults() {
        let rule: Rule = serde_json::from_str(
            r#"{"resource":"r","count":5,"relationStrategy":1,"refResource":"other",
                "tokenCalculateStrategy":111,"controlBehavior":112}"#,
        )
        .unwrap();
        assert_eq!(rule.metric_type, MetricType::Concurrency);
        assert_eq!(rule.relation_strategy, RelationStrategy::AssociatedResource);
        assert_eq!(rule.ref_resource, "other");
        assert_eq!(rule.token_calculate_strategy, TokenCalculateStrategy::Custom(111));
        assert_eq!(rule.control_behavior, ControlBehavior::Custom(112));
        assert_eq!(rule.max_queueing_time_ms, 0);
    }

    #[test]
    fn missing_metric_type_decodes_as_wire_zero() {
        let rule: Rule = serde_json::from_str(r#"{"resource":"r","count":5}"#).unwrap();
        assert_eq!(rule.metric_type, MetricType::Concurrency);
        assert_eq!(i32::from(rule.metric_type), 0);
        assert_eq!(rule, Rule::new("r", 5.0));

        let rule: Rule = serde_json::from_str(r#"{"resource":"r","count":5,"metricType":1}"#).unwrap();
        assert_eq!(rule.metric_type, MetricType::Qps);
    }

    #[test]
    fn decoding_rejects_unknown_metric_type() {
        let err = serde_json::from_str::<Rule>(r#"{"resource":"r","metricType":7}"#).unwrap_err();
        assert!(err.to_string().contains("unknown metric type"), "got {err}");
        let err =
            serde_json::from_str::<Rule>(r#"{"resource":"r","relationStrategy":-1}"#).unwrap_err();
        assert!(err.to_string().contains("unknown relation strategy"), "got {err}");
    }

    #[test]
    fn display_renders_json() {
        let rule = Rule::new("orders", 3.0);
        let shown = rule.to_string();
        assert!(shown.contains("\"resource\":\"orders\""));
        let back: Rule = serde_json::from_str(&shown).unwrap();
        assert_eq!(back, rule);
    }
}
