//! Convenient re-exports for common flowguard types.
pub use crate::{
    clock::{Clock, ManualClock, MonotonicClock},
    controller::TrafficShapingController,
    error::{FlowError, LoadError, RuleError},
    manager::{FlowRuleManager, FlowRuleManagerBuilder, LoadOutcome},
    rule::{ControlBehavior, MetricType, RelationStrategy, Rule, TokenCalculateStrategy},
    shaping::{
        DirectCalculator, RejectChecker, StatSnapshot, ThrottlingChecker, TokenResult,
        TrafficShapingCalculator, TrafficShapingChecker, WarmUpCalculator,
    },
};
