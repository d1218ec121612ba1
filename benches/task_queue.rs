use conclave_core::dispatch::{NewTask, TaskDispatcher, TaskPriority};
use conclave_core::governance::{Roundtable, Tier};
use conclave_core::registry::{AgentRegistry, Capability, RegisterOptions};
use conclave_core::trust::TrustVector;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashSet;

fn make_task(priority: TaskPriority) -> NewTask {
    NewTask {
        name: "bench-task".to_string(),
        description: String::new(),
        required_capability: Capability::Testing,
        required_tier: Tier::Ko,
        priority,
        input: None,
        min_trust_score: 0.0,
        requires_approval: false,
        required_approval_count: 0,
        max_retries: 3,
    }
}

fn bench_create_task(c: &mut Criterion) {
    let dispatcher = TaskDispatcher::new();
    c.bench_function("create_task", |b| {
        b.iter(|| black_box(dispatcher.create_task(make_task(TaskPriority::Medium))));
    });
}

fn bench_assign_next_under_load(c: &mut Criterion) {
    c.bench_function("assign_next_under_load", |b| {
        b.iter_batched(
            || {
                let registry = AgentRegistry::new();
                for _ in 0..50 {
                    registry.register(RegisterOptions {
                        name: "worker".to_string(),
                        provider: "anthropic".to_string(),
                        model: "claude".to_string(),
                        capabilities: HashSet::from([Capability::Testing]),
                        max_concurrent_tasks: 10,
                        max_governance_tier: Tier::Dr,
                        trust_vector: TrustVector::new([0.9; 6]).unwrap(),
                    });
                }
                let dispatcher = TaskDispatcher::new();
                let roundtable = Roundtable::new();
                for i in 0..500 {
                    let priority = match i % 4 {
                        0 => TaskPriority::Critical,
                        1 => TaskPriority::High,
                        2 => TaskPriority::Medium,
                        _ => TaskPriority::Low,
                    };
                    dispatcher.create_task(make_task(priority));
                }
                (dispatcher, registry, roundtable)
            },
            |(dispatcher, registry, roundtable)| {
                black_box(dispatcher.assign_next(&registry, &roundtable).unwrap());
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_create_task, bench_assign_next_under_load);
criterion_main!(benches);
