//! Stage planner and frame benchmarks using criterion.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use weft_ecs::{ComponentId, World};
use weft_schedule::{
    FnSystem, Scheduler, SchedulerConfig, SystemAccess, SystemDescriptor, SystemId,
    compute_execution_stages,
};

struct A;
struct B;
struct C;
struct D;
struct E;
struct F;

fn components() -> [ComponentId; 6] {
    [
        ComponentId::of::<A>(),
        ComponentId::of::<B>(),
        ComponentId::of::<C>(),
        ComponentId::of::<D>(),
        ComponentId::of::<E>(),
        ComponentId::of::<F>(),
    ]
}

/// Deterministic mix of readers and writers over six components.
fn access_for(i: usize) -> SystemAccess {
    let ids = components();
    let access = SystemAccess::new()
        .read_id(ids[i % 6])
        .read_id(ids[(i + 2) % 6])
        .with_priority((i % 4) as i32);
    if i % 3 == 0 {
        access.write_id(ids[(i + 1) % 6])
    } else {
        access
    }
}

fn planner_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for count in [8_usize, 64, 256] {
        let descriptors: Vec<_> = (0..count)
            .map(|i| {
                SystemDescriptor::new(SystemId::new(i as u32), format!("system_{i}"), Some(access_for(i)))
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("greedy", count), &descriptors, |b, descriptors| {
            b.iter(|| black_box(compute_execution_stages(black_box(descriptors))));
        });
    }

    group.finish();
}

fn frame_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let world = World::new();

    for parallel in [false, true] {
        let mut scheduler = Scheduler::new(SchedulerConfig::default().with_parallel(parallel))
            .expect("worker pool");
        for i in 0..32 {
            scheduler.register_system(
                FnSystem::new(format!("noop_{i}"), |_: &World, _: f32| {
                    black_box(());
                })
                .with_access(access_for(i)),
            );
        }
        scheduler.rebuild_execution_plan();

        let label = if parallel { "parallel" } else { "sequential" };
        group.bench_function(BenchmarkId::new("update_32", label), |b| {
            b.iter(|| black_box(scheduler.update(&world, 0.016)));
        });
    }

    group.finish();
}

criterion_group!(benches, planner_benchmarks, frame_benchmarks);
criterion_main!(benches);
