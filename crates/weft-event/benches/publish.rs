//! Event bus dispatch benchmarks.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use weft_event::{EventBus, ModEventBus, Priority};

struct Tick {
    n: u64,
}

fn publish_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");

    for handlers in [0_u64, 1, 8, 64] {
        group.throughput(Throughput::Elements(handlers.max(1)));

        let bus = EventBus::new();
        let subs: Vec<_> = (0..handlers)
            .map(|i| {
                bus.subscribe_with_priority(Priority(i32::try_from(i % 3).unwrap_or(0)), |tick: &Tick| {
                    black_box(tick.n);
                })
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("engine", handlers), &handlers, |b, _| {
            b.iter(|| bus.publish(black_box(&Tick { n: 1 })));
        });

        let mods = ModEventBus::default();
        let mod_subs: Vec<_> = (0..handlers)
            .map(|_| {
                mods.subscribe("bench", |tick: &Tick| {
                    black_box(tick.n);
                })
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("mod", handlers), &handlers, |b, _| {
            b.iter(|| mods.publish(black_box(&Tick { n: 1 })));
        });

        drop(subs);
        drop(mod_subs);
    }

    group.finish();
}

criterion_group!(benches, publish_benchmarks);
criterion_main!(benches);
