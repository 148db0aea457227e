// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes the sum of a vector with the balanced
//! strategy.

use forkcount::{CpuPinningPolicy, OverflowPolicy, ThreadCount, ThreadPoolBuilder};
use std::convert::Infallible;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;

fn main() {
    env_logger::init();

    let thread_pool = ThreadPoolBuilder {
        num_threads: ThreadCount::AvailableParallelism,
        queue_capacity: NonZeroUsize::new(1024).unwrap(),
        overflow: OverflowPolicy::CallerRuns,
        cpu_pinning: CpuPinningPolicy::IfSupported,
    }
    .build();

    let input_size = 1_000_000;

    let input = Arc::new((0..input_size as u64).collect::<Vec<u64>>());
    let sum = thread_pool
        .invoke(
            0..input_size,
            4096,
            move |i| Ok::<_, Infallible>(black_box(input[i])),
            |a, b| a + b,
        )
        .unwrap();
    println!("sum = {sum:?}");
}
