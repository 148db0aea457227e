// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];
const SPLIT_THRESHOLD: usize = 4096;

/// Baseline benchmarks using serial iterators (without any multi-threading
/// involved).
mod serial {
    use super::LENGTHS;
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};

    #[divan::bench(args = LENGTHS)]
    fn sum(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| black_box(input_slice).iter().sum::<u64>())
    }

    #[divan::bench(args = LENGTHS)]
    fn search(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let needle = len as u64 - 1;
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| black_box(input_slice).iter().position(|&x| x == needle))
    }
}

/// Benchmarks using recursive `rayon::join()`.
mod rayon {
    use super::{LENGTHS, NUM_THREADS, SPLIT_THRESHOLD};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};

    fn sum_slice(slice: &[u64]) -> u64 {
        if slice.len() < SPLIT_THRESHOLD {
            return slice.iter().sum();
        }
        let (left, right) = slice.split_at(slice.len() / 2);
        let (left, right) = rayon::join(|| sum_slice(left), || sum_slice(right));
        left + right
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn sum_join<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        // Ideally we'd prefer to run bench_local() inside the Rayon thread pool, but
        // that doesn't work because divan::Bencher isn't Send (and bench_local()
        // consumes it).
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| thread_pool.install(|| sum_slice(black_box(input_slice))));
    }
}

/// Benchmarks using Forkcount.
mod forkcount {
    use super::{LENGTHS, NUM_THREADS, SPLIT_THRESHOLD};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use forkcount::{
        CpuPinningPolicy, ForkJoin, OverflowPolicy, ReductionStrategy, ThreadCount, ThreadPool,
        ThreadPoolBuilder,
    };
    use std::convert::Infallible;
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn thread_pool<const NUM_THREADS: usize>() -> ThreadPool {
        ThreadPoolBuilder {
            num_threads: ThreadCount::try_from(NUM_THREADS).unwrap(),
            queue_capacity: NonZeroUsize::try_from(1024).unwrap(),
            overflow: OverflowPolicy::CallerRuns,
            cpu_pinning: CpuPinningPolicy::IfSupported,
        }
        .build()
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn sum_balanced<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        sum_impl::<NUM_THREADS>(bencher, len, ReductionStrategy::Balanced)
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn sum_chained<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        sum_impl::<NUM_THREADS>(bencher, len, ReductionStrategy::Chained)
    }

    fn sum_impl<const NUM_THREADS: usize>(
        bencher: Bencher,
        len: usize,
        strategy: ReductionStrategy,
    ) {
        let input = Arc::new((0..len as u64).collect::<Vec<u64>>());
        let thread_pool = thread_pool::<NUM_THREADS>();
        let invocation = ForkJoin {
            split_threshold: SPLIT_THRESHOLD,
            strategy,
            ..ForkJoin::new(0..len)
        };

        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
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

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn search<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = Arc::new((0..len as u64).collect::<Vec<u64>>());
        let needle = len as u64 - 1;
        let thread_pool = thread_pool::<NUM_THREADS>();
        let invocation = ForkJoin {
            split_threshold: SPLIT_THRESHOLD,
            ..ForkJoin::new(0..len)
        };

        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                let input = black_box(input.clone());
                invocation
                    .search(&thread_pool, move |i| {
                        Ok::<_, Infallible>((input[i] == needle).then_some(i))
                    })
                    .unwrap()
            });
    }
}
