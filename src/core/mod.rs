// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: bounded thread pool, units of work and synchronization
//! primitives.

mod job;
mod sync;
mod thread_pool;
mod util;

pub use job::{Submitted, WorkUnit};
pub use sync::{CountUnderflow, Countdown, OnceFlag, PendingCount};
pub(crate) use thread_pool::PoolShared;
pub use thread_pool::{
    CpuPinningPolicy, OverflowPolicy, ThreadCount, ThreadPool, ThreadPoolBuilder,
};
pub(crate) use util::Status;
