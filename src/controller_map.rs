//! Turning a rule batch into per-resource controller lists.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::controller::TrafficShapingController;
use crate::error::FlowError;
use crate::generator::{GeneratorKey, GeneratorTable};
use crate::rule::Rule;
use crate::validator::is_valid_rule;

/// Controllers of one resource, in first-seen rule order. Shared, never mutated.
pub type ControllerList = Arc<[Arc<TrafficShapingController>]>;

/// Resource name to its controllers.
pub type ControllerMap = HashMap<String, ControllerList>;

/// A rule that did not make it into the controller map, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRule {
    /// The rejected rule as submitted.
    pub rule: Arc<Rule>,
    /// Why it was rejected.
    pub reason: FlowError,
}

/// Build a controller map from `rules` using the generators in `table`.
///
/// Per rule, in input order: validate, drop if an equivalent rule was already
/// accepted for the same resource, resolve the generator, build the controller.
/// Failures are collected in input order and never abort the batch.
pub fn build_controller_map(
    rules: &[Arc<Rule>],
    table: &GeneratorTable,
) -> (ControllerMap, Vec<RejectedRule>) {
    let mut building: HashMap<String, Vec<Arc<TrafficShapingController>>> = HashMap::new();
    let mut rejected = Vec::new();

    for rule in rules {
        if let Err(e) = is_valid_rule(rule) {
            warn!(target: "flowguard::rule_manager", resource = %rule.resource, reason = %e, rule = %rule, "ignoring invalid flow rule");
            rejected.push(RejectedRule { rule: rule.clone(), reason: e.into() });
            continue;
        }

        let existing = building.get(&rule.resource);
        if existing.is_some_and(|tcs| tcs.iter().any(|tc| tc.rule().is_equivalent(rule))) {
            continue;
        }

        let key = GeneratorKey::of(rule);
        let Some(generator) = table.lookup(&key) else {
            warn!(target: "flowguard::rule_manager", resource = %rule.resource, rule = %rule, "ignoring flow rule with unsupported control behavior");
            rejected.push(RejectedRule {
                rule: rule.clone(),
                reason: FlowError::UnsupportedStrategy {
                    strategy: key.token_calculate_strategy,
                    behavior: key.control_behavior,
                },
            });
            continue;
        };
        let Some(tsc) = generator(rule) else {
            warn!(target: "flowguard::rule_manager", resource = %rule.resource, rule = %rule, "ignoring flow rule; generator produced no traffic controller");
            rejected.push(RejectedRule {
                rule: rule.clone(),
                reason: FlowError::GeneratorFailure {
                    strategy: key.token_calculate_strategy,
                    behavior: key.control_behavior,
                },
            });
            continue;
        };

        building.entry(rule.resource.clone()).or_default().push(tsc);
    }

    let map = building.into_iter().map(|(resource, tcs)| (resource, ControllerList::from(tcs))).collect();
    (map, rejected)
}

/// Every rule held by `map`, resources in ascending name order.
pub(crate) fn rules_from(map: &ControllerMap) -> Vec<Arc<Rule>> {
    let mut resources: Vec<&String> = map.keys().collect();
    resources.sort();
    resources
        .into_iter()
        .flat_map(|resource| map[resource].iter().map(|tc| tc.rule().clone()))
        .collect()
}

/// True unless `current` and `candidate` hold the same rules, resource by resource.
///
/// Lists are compared as sets of rule values, not positionally. Equal lengths plus
/// "every current rule has an equivalent candidate" is enough because lists are
/// deduplicated on build.
pub(crate) fn has_changed(current: &ControllerMap, candidate: &ControllerMap) -> bool {
    if current.len() != candidate.len() {
        return true;
    }
    for (resource, tcs) in current {
        let Some(candidates) = candidate.get(resource) else {
            return true;
        };
        if tcs.len() != candidates.len() {
            return true;
        }
        let matched = tcs
            .iter()
            .filter(|tc| candidates.iter().any(|c| c.rule().is_equivalent(tc.rule())))
            .count();
        if matched < tcs.len() {
            return true;
        }
    }
    false
}
