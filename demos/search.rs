// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that searches for any common multiple of 7 and 11, stopping
//! as soon as one is found.

use forkcount::{
    CpuPinningPolicy, ForkJoin, OverflowPolicy, SearchOutcome, ThreadCount, ThreadPoolBuilder,
};
use std::convert::Infallible;
use std::num::NonZeroUsize;

fn main() {
    env_logger::init();

    let thread_pool = ThreadPoolBuilder {
        num_threads: ThreadCount::AvailableParallelism,
        queue_capacity: NonZeroUsize::new(1024).unwrap(),
        overflow: OverflowPolicy::CallerRuns,
        cpu_pinning: CpuPinningPolicy::IfSupported,
    }
    .build();

    let found = ForkJoin::new(1..10_000_001)
        .search(&thread_pool, |i| {
            Ok::<_, Infallible>((i % 7 == 0 && i % 11 == 0).then_some(i))
        })
        .unwrap();
    match found {
        SearchOutcome::Found(i) => println!("found {i} = 77 * {}", i / 77),
        SearchOutcome::NotFound => println!("not found"),
    }
}
