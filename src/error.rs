//! Error types for rule validation, generator registration and rule loading.
use crate::rule::{ControlBehavior, Rule, TokenCalculateStrategy};

/// Why a single rule is structurally or semantically invalid.
///
/// Validation stops at the first violation, so a rule reports exactly one of these.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// `resource` is empty.
    #[error("empty resource name")]
    EmptyResource,
    /// `count` is negative or not finite.
    #[error("threshold must be finite and >= 0 (got {0})")]
    InvalidThreshold(f64),
    /// Custom token calculate strategy with a negative value.
    #[error("invalid token calculate strategy: {0}")]
    NegativeTokenCalculateStrategy(i32),
    /// Custom control behavior with a negative value.
    #[error("invalid control behavior: {0}")]
    NegativeControlBehavior(i32),
    /// Associated-resource relation without a reference resource.
    #[error("associated resource relation requires a non-empty ref resource")]
    MissingRefResource,
    /// Warm-up strategy with a zero warm-up period.
    #[error("warm-up period must be > 0 seconds")]
    InvalidWarmUpPeriod,
    /// Warm-up strategy with cold factor 1, which yields a flat (undefined) curve.
    #[error("warm-up cold factor must not be 1")]
    InvalidWarmUpColdFactor,
    /// Wire value outside the known metric types.
    #[error("unknown metric type: {0}")]
    UnknownMetricType(i32),
    /// Wire value outside the known relation strategies.
    #[error("unknown relation strategy: {0}")]
    UnknownRelationStrategy(i32),
}

/// Errors raised by the rule manager and its generator registry.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// The rule failed validation.
    #[error("invalid flow rule: {0}")]
    InvalidRule(#[from] RuleError),
    /// No generator is registered for the rule's (strategy, behavior) pair.
    #[error("no traffic shaping generator for ({strategy:?}, {behavior:?})")]
    UnsupportedStrategy {
        /// Token calculate strategy of the rule.
        strategy: TokenCalculateStrategy,
        /// Control behavior of the rule.
        behavior: ControlBehavior,
    },
    /// The registered generator declined to build a controller.
    #[error("generator for ({strategy:?}, {behavior:?}) produced no controller")]
    GeneratorFailure {
        /// Token calculate strategy of the rule.
        strategy: TokenCalculateStrategy,
        /// Control behavior of the rule.
        behavior: ControlBehavior,
    },
    /// Attempt to replace or remove a built-in generator.
    #[error("not allowed to replace the generator for built-in pair ({strategy:?}, {behavior:?})")]
    ProtectedStrategy {
        /// Requested token calculate strategy.
        strategy: TokenCalculateStrategy,
        /// Requested control behavior.
        behavior: ControlBehavior,
    },
    /// A panic escaped rule building, change detection or the swap.
    #[error("rule update panicked: {message}")]
    PanicRecovered {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl FlowError {
    /// True if this is a per-rule validation failure.
    pub fn is_invalid_rule(&self) -> bool {
        matches!(self, Self::InvalidRule(_))
    }

    /// True if the rule's (strategy, behavior) pair had no generator.
    pub fn is_unsupported_strategy(&self) -> bool {
        matches!(self, Self::UnsupportedStrategy { .. })
    }

    /// True if a built-in generator was targeted.
    pub fn is_protected_strategy(&self) -> bool {
        matches!(self, Self::ProtectedStrategy { .. })
    }

    /// Borrow the validation failure, if this is one.
    pub fn as_rule_error(&self) -> Option<&RuleError> {
        match self {
            Self::InvalidRule(e) => Some(e),
            _ => None,
        }
    }
}

/// A rule load that was aborted; the effective rule set is unchanged.
#[derive(thiserror::Error, Debug, Clone)]
#[error("failed to load flow rules: {source}")]
pub struct LoadError {
    /// What went wrong.
    #[source]
    pub source: FlowError,
    /// Every rule passed to the aborted load.
    pub failed_rules: Vec<Rule>,
}
