//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use procflow::cancellation::InterruptToken;
use procflow::core::{Payload, StepStatus};
use procflow::pipeline::{AsyncEdge, PipelineBuilder};
use procflow::testing::{Collector, Multiplier, NumberSource};
use std::sync::Arc;
use std::thread;

const ITEMS: usize = 10_000;

fn edge_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("edge_throughput");
    group.throughput(Throughput::Elements(ITEMS as u64));
    for capacity in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let edge = Arc::new(AsyncEdge::new("producer", "consumer", capacity));
                let token = InterruptToken::new();
                let producer = {
                    let edge = Arc::clone(&edge);
                    let token = token.clone();
                    thread::spawn(move || {
                        for value in 0..ITEMS {
                            let _ = edge.push(StepStatus::Success, Some(Payload::new(value)), &token);
                        }
                        let _ = edge.push(StepStatus::Failure, None, &token);
                    })
                };
                let mut received = 0_usize;
                while let Ok(packet) = edge.pop(&token) {
                    if packet.status == StepStatus::Failure {
                        break;
                    }
                    received += 1;
                }
                let _ = producer.join();
                black_box(received)
            });
        });
    }
    group.finish();
}

fn chain(values: usize) -> PipelineBuilder {
    let values = (0..i32::try_from(values).unwrap_or(i32::MAX)).collect();
    PipelineBuilder::new("bench")
        .add(NumberSource::new("src", values))
        .and_then(|b| b.add(Multiplier::new("mul")))
        .and_then(|b| b.add(Collector::<i32>::new("sink")))
        .and_then(|b| b.connect("src", "number", "mul", "input"))
        .and_then(|b| b.connect("mul", "output", "sink", "input"))
        .unwrap_or_else(|e| panic!("benchmark pipeline is invalid: {e}"))
}

fn scheduler_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("three_node_chain");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("sync", |b| {
        b.iter(|| {
            let mut pipeline = chain(1_000).build_sync().unwrap_or_else(|e| panic!("{e}"));
            black_box(pipeline.run())
        });
    });
    group.bench_function("async", |b| {
        b.iter(|| {
            let pipeline = chain(1_000).build_async().unwrap_or_else(|e| panic!("{e}"));
            black_box(pipeline.run().is_ok())
        });
    });
    group.finish();
}

criterion_group!(benches, edge_throughput, scheduler_comparison);
criterion_main!(benches);
