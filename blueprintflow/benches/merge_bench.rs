//! Benchmarks for result merging.

use blueprintflow::core::WorkResult;
use blueprintflow::pipeline::merge;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn raw_results(keys: usize, rounds: u32) -> Vec<WorkResult> {
    let mut raw = Vec::new();
    for attempt in 1..=rounds {
        for key in 0..keys {
            let key = format!("m{key}");
            if attempt < rounds && key.len() % 2 == 0 {
                raw.push(WorkResult::failed(key, "timed out", attempt));
            } else {
                raw.push(WorkResult::success(key, json!({"attempt": attempt}), attempt));
            }
        }
    }
    raw
}

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for keys in [16, 256, 4096] {
        let raw = raw_results(keys, 3);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &raw, |b, raw| {
            b.iter(|| merge(black_box(raw)));
        });
    }
    group.finish();
}

criterion_group!(benches, merge_benchmark);
criterion_main!(benches);
