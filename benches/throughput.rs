//! Throughput benchmarks using criterion.
//!
//! Measures raw queue operation cost and end-to-end job throughput when
//! spawning 100,000 tiny tasks against a shared counter.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobforge::{Counter, JobSystem, MpmcQueue};

const JOB_COUNT: usize = 100_000;

/// Benchmark uncontended queue push/pop pairs.
fn bench_queue_ops(c: &mut Criterion) {
    let queue = MpmcQueue::new(1024);

    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));
    group.bench_function("push_pop_pair", |b| {
        b.iter(|| {
            queue.try_push(std::hint::black_box(1u64)).unwrap();
            std::hint::black_box(queue.try_pop().unwrap());
        })
    });
    group.finish();
}

/// Benchmark spawning 100k jobs with a shared counter.
fn bench_spawn_jobs(c: &mut Criterion) {
    let num_threads = num_cpus::get();
    let system = JobSystem::new(num_threads);

    // Warmup
    for _ in 0..100 {
        let counter = system.run(|| {});
        system.wait_for_counter(&counter);
    }

    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(JOB_COUNT as u64));
    group.sample_size(10); // Reduce samples since each iteration is expensive

    group.bench_function(BenchmarkId::new("spawn_100k_jobs", num_threads), |b| {
        b.iter(|| {
            let batch_counter = Counter::new(0);
            for _ in 0..JOB_COUNT {
                system.schedule_with_counter(
                    || {
                        std::hint::black_box(1 + 1);
                    },
                    &batch_counter,
                );
            }
            system.wait_for_counter(&batch_counter);
        })
    });

    group.finish();
}

/// Benchmark at different thread counts for scaling analysis.
fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput_scaling");
    group.throughput(Throughput::Elements(JOB_COUNT as u64));
    group.sample_size(10);

    for threads in [1, 2, 4, 8, 16]
        .iter()
        .filter(|&&t| t <= num_cpus::get())
    {
        let system = JobSystem::new(*threads);

        for _ in 0..100 {
            let counter = system.run(|| {});
            system.wait_for_counter(&counter);
        }

        group.bench_function(BenchmarkId::new("spawn_100k", threads), |b| {
            b.iter(|| {
                let batch_counter = Counter::new(0);
                for _ in 0..JOB_COUNT {
                    system.schedule_with_counter(
                        || {
                            std::hint::black_box(1 + 1);
                        },
                        &batch_counter,
                    );
                }
                system.wait_for_counter(&batch_counter);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue_ops, bench_spawn_jobs, bench_scaling);
criterion_main!(benches);
