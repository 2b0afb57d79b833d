#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flowguard
//!
//! Flow-control rule management for Rust services: validate flow rules, turn them
//! into per-resource traffic shaping controllers, and swap whole rule sets in
//! atomically while request paths keep reading.
//!
//! ## Features
//!
//! - **Whole-set rule loading** with per-rule rejection reasons and change detection
//! - **Built-in shaping**: direct or warm-up token calculation, reject or throttling admission
//! - **Pluggable generators** for custom (strategy, behavior) pairs; built-ins are protected
//! - **Lock-free reads** of the effective rule set via `arc-swap`
//! - **Injectable clocks** for deterministic pacing in tests
//!
//! ## Quick Start
//!
//! ```rust
//! use flowguard::{ControlBehavior, FlowRuleManager, Rule, StatSnapshot, TokenCalculateStrategy};
//!
//! let manager = FlowRuleManager::new();
//! let outcome = manager
//!     .load_rules(vec![
//!         Rule::new("GET:/orders", 20.0),
//!         Rule::new("POST:/orders", 5.0)
//!             .with_shaping(TokenCalculateStrategy::Direct, ControlBehavior::Throttling)
//!             .with_max_queueing_time_ms(500),
//!     ])
//!     .expect("rule update");
//! assert!(outcome.changed && outcome.rejected.is_empty());
//!
//! let controllers = manager.controllers_for_resource("GET:/orders").unwrap();
//! let stat = StatSnapshot { current: 3.0, previous_pass_qps: 0.0 };
//! assert!(controllers[0].perform_checking(1, &stat).is_pass());
//! ```

pub mod clock;
pub mod controller;
pub mod controller_map;
pub mod error;
pub mod generator;
pub mod manager;
pub mod prelude;
pub mod rule;
pub mod shaping;
pub mod validator;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use controller::TrafficShapingController;
pub use controller_map::{build_controller_map, ControllerList, ControllerMap, RejectedRule};
pub use error::{FlowError, LoadError, RuleError};
pub use generator::{GeneratorKey, GeneratorRegistry, GeneratorTable, TrafficControllerGenFn};
pub use manager::{FlowRuleManager, FlowRuleManagerBuilder, LoadOutcome};
pub use rule::{ControlBehavior, MetricType, RelationStrategy, Rule, TokenCalculateStrategy};
pub use shaping::{
    StatSnapshot, TokenResult, TrafficShapingCalculator, TrafficShapingChecker,
};
pub use validator::is_valid_rule;
