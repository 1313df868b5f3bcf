//! Latency benchmarks for Matchcast.
//!
//! These benchmarks time single room and heartbeat operations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use matchcast_bench::populate;
use matchcast_core::Hub;
use serde_json::json;
use std::time::Instant;

/// Benchmark commentary relay inside rooms of various sizes.
fn bench_room_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_relay");

    for members in [2, 10, 100] {
        let hub = Hub::new();
        let conns = populate(&hub, members);
        for (id, _) in &conns {
            hub.join(id, "match-42").unwrap();
        }
        let from = conns[0].0.clone();

        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                hub.relay(black_box("match-42"), &from, json!({"text": "goal!"}))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark join + leave with notices to existing members.
fn bench_join_leave(c: &mut Criterion) {
    let mut group = c.benchmark_group("join_leave");

    group.bench_function("ten_members", |b| {
        let hub = Hub::new();
        let conns = populate(&hub, 11);
        for (id, _) in &conns[1..] {
            hub.join(id, "match-42").unwrap();
        }
        let joiner = conns[0].0.clone();

        b.iter(|| {
            hub.join(&joiner, "match-42").unwrap();
            hub.leave(&joiner, "match-42").unwrap()
        });
    });

    group.finish();
}

/// Benchmark a heartbeat sweep over many live connections.
fn bench_heartbeat_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("heartbeat_sweep");

    group.bench_function("10000_connections", |b| {
        b.iter_custom(|iters| {
            let hub = Hub::new();
            let conns = populate(&hub, 10_000);

            let start = Instant::now();
            for _ in 0..iters {
                hub.heartbeat_sweep();
                // Answer every probe so nothing is evicted
                for (id, _) in &conns {
                    hub.mark_alive(id);
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_room_relay,
    bench_join_leave,
    bench_heartbeat_sweep
);
criterion_main!(benches);
