// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

mod core;
mod error;
mod fork_join;
mod macros;

pub use crate::core::{
    CountUnderflow, Countdown, CpuPinningPolicy, OnceFlag, OverflowPolicy, PendingCount,
    Submitted, ThreadCount, ThreadPool, ThreadPoolBuilder, WorkUnit,
};
pub use error::{Error, Rejected};
pub use fork_join::{CancellationToken, ForkJoin, ReductionStrategy, SearchOutcome};
