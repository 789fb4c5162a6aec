//! Benchmarks for expansion and planning.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use subjectflow::cache::ArtifactCache;
use subjectflow::scheduler::plan;
use subjectflow::testing::{domain, subject_inputs, two_stage_with_join};

fn unit_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("sub-{i:03}")).collect()
}

fn expansion_benchmark(c: &mut Criterion) {
    let fixture = two_stage_with_join().unwrap();
    let mut group = c.benchmark_group("expand");
    for count in [10, 100, 1000] {
        let names = unit_names(count);
        let units: Vec<&str> = names.iter().map(String::as_str).collect();
        let domain = domain(&units).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &domain, |b, domain| {
            b.iter(|| black_box(fixture.expand(domain).unwrap()));
        });
    }
    group.finish();
}

fn plan_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let fixture = two_stage_with_join().unwrap();
    let cache = ArtifactCache::in_memory();
    let mut group = c.benchmark_group("plan");
    for count in [10, 100] {
        let names = unit_names(count);
        let units: Vec<&str> = names.iter().map(String::as_str).collect();
        let expanded = fixture.expand(&domain(&units).unwrap()).unwrap();
        let versions: Vec<(&str, &str)> = units.iter().map(|u| (*u, "v1")).collect();
        let inputs = subject_inputs(&versions);
        group.bench_with_input(BenchmarkId::from_parameter(count), &expanded, |b, expanded| {
            b.iter(|| {
                runtime
                    .block_on(plan(expanded, &inputs, &cache))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, expansion_benchmark, plan_benchmark);
criterion_main!(benches);
