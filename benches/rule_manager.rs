use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowguard::{ControlBehavior, FlowRuleManager, Rule, StatSnapshot, TokenCalculateStrategy};

fn rule_set(resources: usize, offset: f64) -> Vec<Rule> {
    (0..resources)
        .flat_map(|i| {
            let resource = format!("GET:/svc/{i}");
            [
                Rule::new(resource.clone(), 100.0 + offset),
                Rule::new(resource, 50.0 + offset)
                    .with_shaping(TokenCalculateStrategy::Direct, ControlBehavior::Throttling)
                    .with_max_queueing_time_ms(500),
            ]
        })
        .collect()
}

fn load_rules_unchanged(c: &mut Criterion) {
    let manager = FlowRuleManager::new();
    let rules = rule_set(200, 0.0);
    manager.load_rules(rules.clone()).unwrap();

    c.bench_function("load_rules_400_unchanged", |b| {
        b.iter(|| black_box(manager.load_rules(black_box(rules.clone())).unwrap()));
    });
}

fn load_rules_alternating(c: &mut Criterion) {
    let manager = FlowRuleManager::new();
    let sets = [rule_set(200, 0.0), rule_set(200, 1.0)];
    let mut flip = 0usize;

    c.bench_function("load_rules_400_changed", |b| {
        b.iter(|| {
            flip ^= 1;
            black_box(manager.load_rules(sets[flip].clone()).unwrap())
        });
    });
}

fn reader_path(c: &mut Criterion) {
    let manager = FlowRuleManager::new();
    manager.load_rules(rule_set(200, 0.0)).unwrap();
    let stat = StatSnapshot { current: 10.0, previous_pass_qps: 0.0 };

    c.bench_function("controllers_for_resource_and_check", |b| {
        b.iter(|| {
            let tcs = manager.controllers_for_resource(black_box("GET:/svc/42")).unwrap();
            black_box(tcs[0].perform_checking(1, &stat))
        });
    });
}

criterion_group!(benches, load_rules_unchanged, load_rules_alternating, reader_path);
criterion_main!(benches);
