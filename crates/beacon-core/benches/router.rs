//! Router benchmarks: pattern matching and publish fan-out.

use beacon_core::{Route, Router, SessionHandle, SessionId, TopicPattern};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::mpsc;

fn bench_pattern_match(c: &mut Criterion) {
    let literal = TopicPattern::parse("orders.eu.created").unwrap();
    let wildcard = TopicPattern::parse("orders.*.created").unwrap();

    let mut group = c.benchmark_group("pattern");
    group.bench_function("literal", |b| {
        b.iter(|| literal.matches(black_box("orders.eu.created")))
    });
    group.bench_function("wildcard", |b| {
        b.iter(|| wildcard.matches(black_box("orders.us.created")))
    });
    group.bench_function("wildcard_miss", |b| {
        b.iter(|| wildcard.matches(black_box("orders.us.west.created")))
    });
    group.finish();
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for patterns in [10usize, 100, 1000] {
        let router = Router::new();
        let mut receivers = Vec::new();
        for i in 0..patterns {
            let id = SessionId::new(format!("s{i}"));
            let (tx, rx) = mpsc::unbounded_channel();
            router.sessions().insert(id.clone(), SessionHandle::new(tx, None));
            let pattern = if i % 10 == 0 {
                "metrics.*.cpu".to_string()
            } else {
                format!("metrics.host{i}.cpu")
            };
            router.subscribe(&id, &pattern).unwrap();
            receivers.push(rx);
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("fan_out", patterns), &router, |b, router| {
            b.iter(|| {
                let n = router.publish(&Route::Local, black_box("metrics.host1.cpu"), "0.5");
                for rx in &mut receivers {
                    while rx.try_recv().is_ok() {}
                }
                n
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pattern_match, bench_publish);
criterion_main!(benches);
