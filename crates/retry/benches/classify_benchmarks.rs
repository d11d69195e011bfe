use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;

use forgejobs_core::JobId;
use forgejobs_retry::{
    AttemptCounters, ClassifyContext, Discard, Failure, JobPolicy, KindHierarchy, Retry,
    WaitPolicy, classify,
};

/// Hierarchy `Kind0 <- Kind1 <- ... <- KindN`, so matching `KindN` against a
/// rule on `Kind0` walks the full chain.
fn deep_hierarchy(depth: usize) -> KindHierarchy {
    let mut hierarchy = KindHierarchy::new();
    for i in 1..=depth {
        hierarchy
            .declare(format!("Kind{i}"), format!("Kind{}", i - 1))
            .unwrap();
    }
    hierarchy
}

fn policy_with_rules(rules: usize) -> JobPolicy {
    let mut policy = JobPolicy::new();
    policy.declare_discard(Discard::on(["Discarded"])).unwrap();
    for i in 0..rules {
        policy
            .declare_retry(
                Retry::on([format!("Unrelated{i}")])
                    .wait(WaitPolicy::fixed(Duration::from_secs(1)))
                    .unlimited(),
            )
            .unwrap();
    }
    policy
        .declare_retry(Retry::on(["Kind0"]).wait(WaitPolicy::exponential()).unlimited())
        .unwrap();
    policy
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for depth in [1usize, 8, 32] {
        let hierarchy = deep_hierarchy(depth);
        let policy = policy_with_rules(16);
        let failure = Failure::new(format!("Kind{depth}"), "boom");
        let ctx = ClassifyContext {
            hierarchy: &hierarchy,
            job_id: JobId::new(),
            job_name: "bench_job",
            executions: 1,
        };

        group.bench_with_input(BenchmarkId::new("hierarchy_depth", depth), &depth, |b, _| {
            let mut counters = AttemptCounters::new();
            b.iter(|| {
                black_box(classify(
                    black_box(&failure),
                    &policy,
                    &mut counters,
                    &ctx,
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
