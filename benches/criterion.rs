// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ::forkcount::ReductionStrategy;
use std::mem::size_of;

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];
const SPLIT_THRESHOLD: usize = 4096;

fn sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * size_of::<u64>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::sum);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon_join@{num_threads}"), len),
                len,
                |bencher, len| rayon::sum(bencher, num_threads, len),
            );
            for (strategy, strategy_name) in [
                (ReductionStrategy::Balanced, "balanced"),
                (ReductionStrategy::Chained, "chained"),
            ] {
                group.bench_with_input(
                    BenchmarkId::new(format!("forkcount_{strategy_name}@{num_threads}"), len),
                    len,
                    |bencher, len| forkcount::sum(bencher, strategy, num_threads, len),
                );
            }
        }
    }
    group.finish();
}

fn search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * size_of::<u64>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::search);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("forkcount@{num_threads}"), len),
                len,
                |bencher, len| forkcount::search(bencher, num_threads, len),
            );
        }
    }
    group.finish();
}

/// Baseline benchmarks using serial iterators (without any multi-threading
/// involved).
mod serial {
    use criterion::{black_box, Bencher};

    pub fn sum(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher.iter(|| black_box(input_slice).iter().sum::<u64>());
    }

    pub fn search(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let needle = *len as u64 - 1;
        bencher.iter(|| black_box(input_slice).iter().position(|&x| x == needle));
    }
}

/// Benchmarks using recursive `rayon::join()`.
mod rayon {
    use criterion::{black_box, Bencher};

    fn sum_slice(slice: &[u64], split_threshold: usize) -> u64 {
        if slice.len() < split_threshold {
            return slice.iter().sum();
        }
        let (left, right) = slice.split_at(slice.len() / 2);
        let (left, right) = rayon::join(
            || sum_slice(left, split_threshold),
            || sum_slice(right, split_threshold),
        );
        left + right
    }

    pub fn sum(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| sum_slice(black_box(input_slice), super::SPLIT_THRESHOLD))
        });
    }
}

/// Benchmarks using Forkcount.
mod forkcount {
    use criterion::{black_box, Bencher};
    use forkcount::{
        CpuPinningPolicy, ForkJoin, OverflowPolicy, ReductionStrategy, ThreadCount, ThreadPool,
        ThreadPoolBuilder,
    };
    use std::convert::Infallible;
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn thread_pool(num_threads: usize) -> ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            queue_capacity: NonZeroUsize::try_from(1024).unwrap(),
            overflow: OverflowPolicy::CallerRuns,
            cpu_pinning: CpuPinningPolicy::IfSupported,
        }
        .build()
    }

    pub fn sum(
        bencher: &mut Bencher,
        strategy: ReductionStrategy,
        num_threads: usize,
        len: &usize,
    ) {
        let input = Arc::new((0..*len as u64).collect::<Vec<u64>>());
        let thread_pool = thread_pool(num_threads);
        let invocation = ForkJoin {
            split_threshold: super::SPLIT_THRESHOLD,
            strategy,
            ..ForkJoin::new(0..*len)
        };

        bencher.iter(|| {
            let input = black_box(input.clone());
            invocation
                .invoke(
                    &thread_pool,
                    move |i| Ok::<_, Infallible>(input[i]),
                    |x, y| x + y,
                )
                .unwrap()
        });
    }

    pub fn search(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = Arc::new((0..*len as u64).collect::<Vec<u64>>());
        let needle = *len as u64 - 1;
        let thread_pool = thread_pool(num_threads);
        let invocation = ForkJoin {
            split_threshold: super::SPLIT_THRESHOLD,
            ..ForkJoin::new(0..*len)
        };

        bencher.iter(|| {
            let input = black_box(input.clone());
            invocation
                .search(&thread_pool, move |i| {
                    Ok::<_, Infallible>((input[i] == needle).then_some(i))
                })
                .unwrap()
        });
    }
}

criterion_group!(benches, sum, search);
criterion_main!(benches);
