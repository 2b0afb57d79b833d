//! Registry of traffic shaping controller generators.
//!
//! Generators are keyed by `(TokenCalculateStrategy, ControlBehavior)`. The four
//! built-in pairs are seeded at construction and can never be replaced or removed;
//! a pair touching a built-in strategy *or* a built-in behavior is refused, even if
//! the other half is custom.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::clock::Clock;
use crate::controller::TrafficShapingController;
use crate::error::FlowError;
use crate::rule::{ControlBehavior, Rule, TokenCalculateStrategy};
use crate::shaping::{DirectCalculator, RejectChecker, ThrottlingChecker, WarmUpCalculator};

/// Builds a controller for a rule. `None` means the generator declined the rule.
pub type TrafficControllerGenFn =
    Arc<dyn Fn(&Arc<Rule>) -> Option<Arc<TrafficShapingController>> + Send + Sync>;

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeneratorKey {
    /// Token calculate strategy half.
    pub token_calculate_strategy: TokenCalculateStrategy,
    /// Control behavior half.
    pub control_behavior: ControlBehavior,
}

impl GeneratorKey {
    /// Key for a (strategy, behavior) pair.
    pub fn new(strategy: TokenCalculateStrategy, behavior: ControlBehavior) -> Self {
        Self { token_calculate_strategy: strategy, control_behavior: behavior }
    }

    /// Key a rule resolves to.
    pub fn of(rule: &Rule) -> Self {
        Self::new(rule.token_calculate_strategy, rule.control_behavior)
    }

    /// True if either half is a built-in.
    pub fn is_protected(&self) -> bool {
        self.token_calculate_strategy.is_builtin() || self.control_behavior.is_builtin()
    }

    fn protected_error(&self) -> FlowError {
        FlowError::ProtectedStrategy {
            strategy: self.token_calculate_strategy,
            behavior: self.control_behavior,
        }
    }
}

/// Immutable view of the registered generators, used for one rule build.
#[derive(Clone, Default)]
pub struct GeneratorTable {
    entries: HashMap<GeneratorKey, TrafficControllerGenFn>,
}

impl GeneratorTable {
    /// Generator for `key`, if registered.
    pub fn lookup(&self, key: &GeneratorKey) -> Option<TrafficControllerGenFn> {
        self.entries.get(key).cloned()
    }

    /// Registered keys.
    pub fn keys(&self) -> impl Iterator<Item = &GeneratorKey> {
        self.entries.keys()
    }

    /// Number of registered generators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, key: GeneratorKey, generator: TrafficControllerGenFn) {
        self.entries.insert(key, generator);
    }
}

impl fmt::Debug for GeneratorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Concurrency-safe generator registry seeded with the built-in strategies.
pub struct GeneratorRegistry {
    table: RwLock<GeneratorTable>,
}

impl GeneratorRegistry {
    /// Registry holding the four built-in generators; `clock` drives their pacing.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { table: RwLock::new(builtin_table(clock)) }
    }

    /// Generator for a (strategy, behavior) pair.
    pub fn lookup(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
    ) -> Option<TrafficControllerGenFn> {
        self.read().lookup(&GeneratorKey::new(strategy, behavior))
    }

    /// Register (or replace) a custom generator.
    pub fn register<F>(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
        generator: F,
    ) -> Result<(), FlowError>
    where
        F: Fn(&Arc<Rule>) -> Option<Arc<TrafficShapingController>> + Send + Sync + 'static,
    {
        self.register_shared(strategy, behavior, Arc::new(generator))
    }

    /// Like [`register`](Self::register) for a generator that is already shared.
    pub fn register_shared(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
        generator: TrafficControllerGenFn,
    ) -> Result<(), FlowError> {
        let key = GeneratorKey::new(strategy, behavior);
        if key.is_protected() {
            warn!(target: "flowguard::generator", ?strategy, ?behavior, "refused to replace built-in generator");
            return Err(key.protected_error());
        }
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.entries.contains_key(&key) {
            warn!(target: "flowguard::generator", ?strategy, ?behavior, "generator replaced; last registration wins");
        } else {
            info!(target: "flowguard::generator", ?strategy, ?behavior, "generator registered");
        }
        table.insert(key, generator);
        Ok(())
    }

    /// Remove a custom generator. Removing an unknown pair succeeds.
    pub fn unregister(
        &self,
        strategy: TokenCalculateStrategy,
        behavior: ControlBehavior,
    ) -> Result<(), FlowError> {
        let key = GeneratorKey::new(strategy, behavior);
        if key.is_protected() {
            warn!(target: "flowguard::generator", ?strategy, ?behavior, "refused to remove built-in generator");
            return Err(key.protected_error());
        }
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.entries.remove(&key).is_some() {
            info!(target: "flowguard::generator", ?strategy, ?behavior, "generator removed");
        }
        Ok(())
    }

    /// True if a generator is registered for the pair.
    pub fn contains(&self, strategy: TokenCalculateStrategy, behavior: ControlBehavior) -> bool {
        self.read().entries.contains_key(&GeneratorKey::new(strategy, behavior))
    }

    /// Copy of the current table. Generators are shared, not cloned.
    pub fn snapshot(&self) -> GeneratorTable {
        self.read().clone()
    }

    // Writers only insert or remove whole entries, so a poisoned table is still consistent.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, GeneratorTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeneratorRegistry{{generators:{}}}", self.read().len())
    }
}

fn builtin_table(clock: Arc<dyn Clock>) -> GeneratorTable {
    let mut table = GeneratorTable::default();

    table.insert(
        GeneratorKey::new(TokenCalculateStrategy::Direct, ControlBehavior::Reject),
        Arc::new(|rule: &Arc<Rule>| {
            Some(Arc::new(TrafficShapingController::new(
                Arc::new(DirectCalculator::new(rule.count)),
                Arc::new(RejectChecker),
                rule.clone(),
            )))
        }),
    );

    let c = clock.clone();
    table.insert(
        GeneratorKey::new(TokenCalculateStrategy::Direct, ControlBehavior::Throttling),
        Arc::new(move |rule: &Arc<Rule>| {
            Some(Arc::new(TrafficShapingController::new(
                Arc::new(DirectCalculator::new(rule.count)),
                Arc::new(ThrottlingChecker::new(rule.max_queueing_time_ms, c.clone())),
                rule.clone(),
            )))
        }),
    );

    let c = clock.clone();
    table.insert(
        GeneratorKey::new(TokenCalculateStrategy::WarmUp, ControlBehavior::Reject),
        Arc::new(move |rule: &Arc<Rule>| {
            Some(Arc::new(TrafficShapingController::new(
                Arc::new(WarmUpCalculator::new(rule, c.clone())),
                Arc::new(RejectChecker),
                rule.clone(),
            )))
        }),
    );

    table.insert(
        GeneratorKey::new(TokenCalculateStrategy::WarmUp, ControlBehavior::Throttling),
        Arc::new(move |rule: &Arc<Rule>| {
            Some(Arc::new(TrafficShapingController::new(
                Arc::new(WarmUpCalculator::new(rule, clock.clone())),
                Arc::new(ThrottlingChecker::new(rule.max_queueing_time_ms, clock.clone())),
                rule.clone(),
            )))
        }),
    );

    table
}
