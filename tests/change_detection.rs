//! Property checks for reload change detection.
use flowguard::prelude::*;
use proptest::prelude::*;

fn arb_rule() -> impl Strategy<Value = Rule> {
    (
        prop::sample::select(vec!["a", "b", "c"]),
        0u8..4,
        prop::bool::ANY,
        prop::bool::ANY,
    )
        .prop_map(|(resource, count, qps, throttling)| {
            let mut rule = Rule::new(resource, f64::from(count));
            if qps {
                rule = rule.with_metric_type(MetricType::Qps);
            }
            if throttling {
                rule = rule.with_shaping(TokenCalculateStrategy::Direct, ControlBehavior::Throttling);
            }
            rule
        })
}

fn as_set(rules: Vec<Rule>) -> Vec<String> {
    let mut keys: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
    keys.sort();
    keys.dedup();
    keys
}

proptest! {
    #[test]
    fn changed_iff_effective_sets_differ(
        first in prop::collection::vec(arb_rule(), 0..8),
        second in prop::collection::vec(arb_rule(), 0..8),
    ) {
        let manager = FlowRuleManager::new();
        manager.load_rules(first.clone()).unwrap();
        let outcome = manager.load_rules(second.clone()).unwrap();
        prop_assert_eq!(outcome.changed, as_set(first) != as_set(second));
    }

    #[test]
    fn permutations_and_duplicates_are_not_changes(
        rules in prop::collection::vec(arb_rule(), 1..8),
        shift in 0usize..8,
    ) {
        let manager = FlowRuleManager::new();
        manager.load_rules(rules.clone()).unwrap();

        let mut reshuffled = rules.clone();
        let len = reshuffled.len();
        reshuffled.rotate_left(shift % len);
        reshuffled.extend(rules.iter().cloned());
        let outcome = manager.load_rules(reshuffled).unwrap();
        prop_assert!(!outcome.changed);
        prop_assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn each_resource_holds_pairwise_distinct_rules(
        rules in prop::collection::vec(arb_rule(), 0..12),
    ) {
        let manager = FlowRuleManager::new();
        manager.load_rules(rules).unwrap();
        for resource in ["a", "b", "c"] {
            let held = manager.rules_of_resource(resource);
            for (i, x) in held.iter().enumerate() {
                for y in &held[i + 1..] {
                    prop_assert!(!x.is_equivalent(y));
                }
            }
        }
    }
}
