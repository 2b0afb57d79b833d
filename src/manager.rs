//! Flow rule manager: owns the effective controller map and reconciles rule batches.
//!
//! Semantics:
//! - `load_rules` replaces the whole rule set. Candidate controllers are built
//!   before any lock is taken, so expensive generators never block readers.
//! - The diff against the current map and the swap run in one short critical
//!   section; concurrent loads apply in lock order and the last one wins.
//! - Readers load the current map without locking and never observe a partial swap.
//! - Per-rule problems are reported in [`LoadOutcome::rejected`]; only a panic
//!   during build/diff/swap turns into a [`LoadError`], with the map left untouched.
//!
//! Example
//! ```rust
//! use flowguard::{FlowRuleManager, Rule};
//!
//! let manager = FlowRuleManager::new();
//! let outcome = manager
//!     .load_rules(vec![Rule::new("GET:/orders", 100.0), Rule::new("", 1.0)])
//!     .unwrap();
//! assert!(outcome.changed);
//! assert_eq!(outcome.failed_rules(), vec![Rule::new("", 1.0)]);
//! assert_eq!(manager.rules_of_resource("GET:/orders").len(), 1);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, error, info};

use crate::clock::{Clock, MonotonicClock};
use crate::controller::TrafficShapingController;
use crate::controller_map::{
    build_controller_map, has_changed, rules_from, ControllerList, ControllerMap, RejectedRule,
};
use crate::error::{FlowError, LoadError};
use crate::generator::{GeneratorRegistry, TrafficControllerGenFn};
use crate::rule::{ControlBehavior, Rule, TokenCalculateStrategy};

/// Result of a completed [`FlowRuleManager::load_rules`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    /// False if the new effective rules are equivalent to the previous ones.
    pub changed: bool,
    /// Rules that were dropped, in input order. Duplicates are not listed.
    pub rejected: Vec<RejectedRule>,
}

impl LoadOutcome {
    /// Copies of the rejected rules, in input order.
    pub fn failed_rules(&self) -> Vec<Rule> {
        self.rejected.iter().map(|r| Rule::clone(&r.rule)).collect()
    }
}

/// Owner of the effective rule set and the generator registry.
pub struct FlowRuleManager {
    generators: GeneratorRegistry,
    controllers: ArcSwap<ControllerMap>,
    update_lock: Mutex<()>,
}

impl FlowRuleManager {
    /// Manager with the built-in generators and a monotonic clock.
    pub fn new() -> Self {
        Self::with_registry(GeneratorRegistry::new(Arc::new(MonotonicClock::default())))
    }

    /// Construct a builder for custom clocks and pre-registered generators.
    pub fn builder() -> FlowRuleManagerBuilder {
        FlowRuleManagerBuilder::new()
    }

    fn with_registry(generators: GeneratorRegistry) -> Self {
        Self {
            generators,
            controllers: ArcSwap::from_pointee(ControllerMap::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Replace every effective rule with `rules`.
    ///
    /// Always inspect [`LoadOutcome::rejected`]: partially rejected batches are a
    /// normal result, not an error.
    pub fn load_rules<I>(&self, rules: I) -> Result<LoadOutcome, LoadError>
    where
        I: IntoIterator<Item = Rule>,
    {
        let rules: Vec<Arc<Rule>> = rules.into_iter().map(Arc::new).collect();

        match panic::catch_unwind(AssertUnwindSafe(|| self.reconcile(&rules))) {
            Ok((outcome, effective)) => {
                log_rule_update(&effective, outcome.changed);
                Ok(outcome)
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(target: "flowguard::rule_manager", %message, rules = rules.len(), "flow rule update panicked; effective rules unchanged");
                Err(LoadError {
                    source: FlowError::PanicRecovered { message },
                    failed_rules: rules.iter().map(|r| Rule::clone(r)).collect(),
                })
            }
        }
    }

    /// Remove every rule.
    pub fn clear_rules(&self) -> Result<(), LoadError> {
        self.load_rules(Vec::new()).map(|_| ())
    }

    fn reconcile(&self, rules: &[Arc<Rule>]) -> (LoadOutcome, Arc<ControllerMap>) {
        // One registry snapshot per build: concurrent (un)registration cannot split it.
        let table = self.generators.snapshot();
        let (candidate, rejected) = build_controller_map(rules, &table);
        let candidate = Arc::new(candidate);

        let started = Instant::now();
        let changed = {
            let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = has_changed(&self.controllers.load(), &candidate);
            self.controllers.store(candidate.clone());
            changed
        };
        debug!(target: "flowguard::rule_manager", elapsed = ?started.elapsed(), "flow rule update applied");

        (LoadOutcome { changed, rejected }, candidate)
    }

    /// Copies of all effective rules, grouped by resource in ascending name order.
    pub fn rules(&self) -> Vec<Rule> {
        rules_from(&self.controllers.load()).iter().map(|r| Rule::clone(r)).collect()
    }

    /// Copies of the effective rules of `resource`; empty for unknown resources.
    pub fn rules_of_resource(&self, resource: &str) -> Vec<Rule> {
        self.controllers
            .load()
            .get(resource)
            .map(|tcs| tcs.iter().map(|tc| Rule::clone(tc.rule())).collect())
            .unwrap_or_default()
    }

    /// Live controllers of `resource`, shared with the effective map (no copy).
    pub fn controllers_for_resource(&self, resource: &str) -> Option<ControllerList> {
        self.controllers.load().get(resource).cloned()
    }

    /// The whole effective map, shared.
    pub fn controller_map(&self) -> Arc<ControllerMap> {
        self.controllers.load_full()
    }

    /// Register a generator for a custom (strategy, behavior) pair.
    pub fn set_traffic_shaping_generator<F>(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
        generator: F,
    ) -> Result<(), FlowError>
    where
        F: Fn(&Arc<Rule>) -> Option<Arc<TrafficShapingController>> + Send + Sync + 'static,
    {
        self.generators.register(strategy, behavior, generator)
    }

    /// Remove the generator of a custom (strategy, behavior) pair.
    ///
    /// Controllers already built from it stay effective until the next load.
    pub fn remove_traffic_shaping_generator(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
    ) -> Result<(), FlowError> {
        self.generators.unregister(strategy, behavior)
    }

    /// The generator registry.
    pub fn generators(&self) -> &GeneratorRegistry {
        &self.generators
    }
}

impl Default for FlowRuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FlowRuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRuleManager")
            .field("generators", &self.generators)
            .field("resources", &self.controllers.load().len())
            .finish()
    }
}

/// Builder for [`FlowRuleManager`].
pub struct FlowRuleManagerBuilder {
    clock: Arc<dyn Clock>,
    generators: Vec<(TokenCalculateStrategy, ControlBehavior, TrafficControllerGenFn)>,
}

impl FlowRuleManagerBuilder {
    /// Builder with a monotonic clock and no custom generators.
    pub fn new() -> Self {
        Self { clock: Arc::new(MonotonicClock::default()), generators: Vec::new() }
    }

    /// Override the clock used by the built-in throttling and warm-up strategies.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Pre-register a custom generator.
    pub fn generator<F>(
        mut self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
        generator: F,
    ) -> Self
    where
        F: Fn(&Arc<Rule>) -> Option<Arc<TrafficShapingController>> + Send + Sync + 'static,
    {
        self.generators.push((strategy, behavior, Arc::new(generator)));
        self
    }

    /// Build the manager; fails if a generator targets a built-in pair.
    pub fn build(self) -> Result<FlowRuleManager, FlowError> {
        let registry = GeneratorRegistry::new(self.clock);
        for (strategy, behavior, generator) in self.generators {
            registry.register_shared(strategy, behavior, generator)?;
        }
        Ok(FlowRuleManager::with_registry(registry))
    }
}

impl Default for FlowRuleManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FlowRuleManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRuleManagerBuilder")
            .field("clock", &self.clock)
            .field("generators", &self.generators.len())
            .finish()
    }
}

fn log_rule_update(effective: &ControllerMap, changed: bool) {
    if !changed {
        debug!(target: "flowguard::rule_manager", resources = effective.len(), "flow rules unchanged");
        return;
    }
    if effective.is_empty() {
        info!(target: "flowguard::rule_manager", "flow rules were cleared");
        return;
    }
    let rules = rules_from(effective);
    let rules: Vec<&Rule> = rules.iter().map(|r| r.as_ref()).collect();
    match serde_json::to_string(&rules) {
        Ok(json) => info!(target: "flowguard::rule_manager", rules = %json, "flow rules were loaded"),
        Err(_) => info!(target: "flowguard::rule_manager", "flow rules were loaded"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(resource: &str) -> Rule {
        Rule::new(resource, 0.0)
    }

    #[test]
    fn basic_load_builds_one_controller_per_rule() {
        let manager = FlowRuleManager::new();
        let r2 = rule("abc2").with_shaping(TokenCalculateStrategy::Direct, ControlBehavior::Throttling);
        let outcome = manager.load_rules(vec![rule("abc1"), r2]).unwrap();
        assert!(outcome.changed);
        assert!(outcome.rejected.is_empty());
        assert_eq!(manager.controllers_for_resource("abc1").unwrap().len(), 1);
        assert_eq!(manager.controllers_for_resource("abc2").unwrap().len(), 1);
    }

    #[test]
    fn invalid_only_load_on_empty_manager_is_unchanged() {
        let manager = FlowRuleManager::new();
        let outcome = manager.load_rules(vec![Rule::new("", 1.0)]).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(manager.controller_map().is_empty());
    }

    #[test]
    fn clear_after_load_empties_map() {
        let manager = FlowRuleManager::new();
        manager.load_rules(vec![rule("abc")]).unwrap();
        manager.clear_rules().unwrap();
        assert!(manager.rules().is_empty());
        assert!(manager.controllers_for_resource("abc").is_none());
    }

    #[test]
    fn panic_message_extracts_str_and_string() {
        let p: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*p), "static");
        let p: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*p), "owned");
        let p: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*p), "unknown panic payload");
    }

    #[test]
    fn builder_rejects_protected_generator() {
        let err = FlowRuleManager::builder()
            .generator(TokenCalculateStrategy::WarmUp, ControlBehavior::Custom(4), |_| None)
            .build()
            .unwrap_err();
        assert!(err.is_protected_strategy());
    }
}
