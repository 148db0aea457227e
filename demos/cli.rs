// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of fork/join computations.

use clap::{Parser, ValueEnum};
use forkcount::{
    CpuPinningPolicy, ForkJoin, OverflowPolicy, ReductionStrategy, SearchOutcome, ThreadCount,
    ThreadPoolBuilder,
};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::convert::Infallible;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let thread_pool = ThreadPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        queue_capacity: cli.queue_capacity,
        overflow: match cli.overflow {
            OverflowCli::CallerRuns => OverflowPolicy::CallerRuns,
            OverflowCli::Reject => OverflowPolicy::Reject,
        },
        cpu_pinning: CpuPinningPolicy::IfSupported,
    }
    .build();

    let invocation = ForkJoin {
        split_threshold: cli.split_threshold,
        strategy: match cli.strategy {
            StrategyCli::Balanced => ReductionStrategy::Balanced,
            StrategyCli::Chained => ReductionStrategy::Chained,
        },
        ..ForkJoin::new(0..cli.input_size)
    };

    match cli.scenario {
        Scenario::Sum => {
            let input = Arc::new((0..cli.input_size as u64).collect::<Vec<u64>>());
            let sum = invocation.invoke(
                &thread_pool,
                move |i| Ok::<_, Infallible>(black_box(input[i])),
                |a, b| a + b,
            );
            match sum {
                Ok(sum) => println!("sum = {sum:?}"),
                Err(e) => println!("sum failed: {e}"),
            }
        }
        Scenario::Concat => {
            let concat = invocation.invoke(
                &thread_pool,
                |i| Ok::<_, Infallible>(vec![i]),
                |mut a, b| {
                    a.extend(b);
                    a
                },
            );
            match concat {
                Ok(concat) => {
                    let sorted = concat
                        .as_deref()
                        .unwrap_or_default()
                        .windows(2)
                        .all(|w| w[0] < w[1]);
                    println!(
                        "concatenated {} items, in order: {sorted}",
                        concat.map_or(0, |c| c.len())
                    );
                }
                Err(e) => println!("concat failed: {e}"),
            }
        }
        Scenario::Search => {
            let input = Arc::new(fill_needles(cli.input_size, cli.density));
            let found = invocation.search(&thread_pool, move |i| {
                Ok::<_, Infallible>(black_box(input[i]).then_some(i))
            });
            match found {
                Ok(SearchOutcome::Found(i)) => println!("found needle at index {i}"),
                Ok(SearchOutcome::NotFound) => println!("no needle found"),
                Err(e) => println!("search failed: {e}"),
            }
        }
    }
}

/// Creates a vector of `input_size` booleans, `density` of which are set to
/// [`true`] (the needles). The set of needles follows a uniform distribution,
/// but is fixed by a constant-time seed for reproducibility.
fn fill_needles(input_size: usize, density: usize) -> Vec<bool> {
    let mut input = vec![false; input_size];

    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let needles = index::sample(&mut rng, input_size, density.min(input_size));
    for needle in needles {
        input[needle] = true;
    }

    input
}

/// CLI tool to run examples of fork/join computations.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Maximal number of tasks waiting in the pool's queue.
    #[arg(long, default_value_t = NonZeroUsize::new(1024).unwrap())]
    queue_capacity: NonZeroUsize,

    /// What to do with a task forked while the queue is full.
    #[arg(long, value_enum, default_value_t = OverflowCli::CallerRuns)]
    overflow: OverflowCli,

    /// How map-reduce results are merged.
    #[arg(long, value_enum, default_value_t = StrategyCli::Balanced)]
    strategy: StrategyCli,

    /// Minimal number of items for a task to split.
    #[arg(long, default_value_t = 1024)]
    split_threshold: usize,

    /// Scenario to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: usize,

    /// Number of items that match the search. Used only for the search
    /// scenario.
    #[arg(long, default_value_t = 1)]
    density: usize,
}

/// What to do with a task forked while the queue is full.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OverflowCli {
    /// Run the task on the forking thread.
    CallerRuns,
    /// Fail the computation.
    Reject,
}

/// How map-reduce results are merged.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StrategyCli {
    /// Binary splits, merged by the sibling finishing last.
    Balanced,
    /// Fan-out splits, merged along a chain of forks.
    Chained,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum a vector of numbers.
    Sum,
    /// Concatenate the indices, checking that the order is preserved.
    Concat,
    /// Find any needle.
    Search,
}
