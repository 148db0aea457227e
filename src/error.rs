// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors reported by fork/join invocations and by the thread pool.

use thiserror::Error;

/// Reason why a fork/join invocation didn't produce a result.
///
/// `E` is the error type returned by the user-provided leaf computation.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// The leaf computation failed on the given index. If several leaves
    /// failed concurrently, the first reported failure wins.
    #[error("leaf computation failed at index {index}")]
    LeafComputationFailed {
        /// Index passed to the failing leaf computation.
        index: usize,
        /// Error returned by the leaf computation.
        error: E,
    },
    /// The invocation's cancellation token was triggered before the
    /// computation completed.
    #[error("the fork/join invocation was cancelled")]
    Cancelled,
    /// The pool refused a forked task because its queue was full.
    #[error("the worker pool rejected a forked task")]
    PoolRejected,
}

/// A unit of work was refused because the pool's queue was full and the pool
/// is configured with [`OverflowPolicy::Reject`](crate::OverflowPolicy::Reject).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("the worker pool queue is full")]
pub struct Rejected;
