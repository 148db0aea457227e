// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Completion-tracking fork/join computations over a [`ThreadPool`].

mod balanced;
mod chained;
mod context;
mod map_reduce;
mod node;
mod search;

use crate::core::ThreadPool;
use crate::error::Error;
use balanced::Balanced;
use chained::Chained;
use context::{execute, Outcome};
use map_reduce::MapReduce;
use search::{Search, SharedResultSlot};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a map-reduce tree splits its range and merges the results.
///
/// Both strategies give the same result as a sequential left-to-right fold,
/// for any associative combine function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReductionStrategy {
    /// Each node splits into two halves, the right half being forked and the
    /// left half computed inline. The half finishing last merges both.
    #[default]
    Balanced,
    /// Each node forks the upper half of its remaining range until it is small
    /// enough, and computes the rest inline. The forked children are merged in
    /// index order once all of them completed.
    Chained,
}

/// Result of a successful [`ForkJoin::search()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome<T> {
    /// Some index matched, with the probed value. If several indices match,
    /// any of them may be returned.
    Found(T),
    /// No index matched.
    NotFound,
}

/// A handle to cancel fork/join invocations.
///
/// Once cancelled, the invocations sharing this token stop forking new tasks.
/// Leaf computations already running finish, and the invocation returns
/// [`Error::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that isn't cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels all the invocations sharing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns whether this token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Configuration of a fork/join invocation over a range of indices.
///
/// ```
/// # use forkcount::{
/// #     CpuPinningPolicy, ForkJoin, OverflowPolicy, ReductionStrategy, SearchOutcome,
/// #     ThreadCount, ThreadPoolBuilder,
/// # };
/// # use std::convert::Infallible;
/// # use std::num::NonZeroUsize;
/// let thread_pool = ThreadPoolBuilder {
///     num_threads: ThreadCount::AvailableParallelism,
///     queue_capacity: NonZeroUsize::try_from(256).unwrap(),
///     overflow: OverflowPolicy::CallerRuns,
///     cpu_pinning: CpuPinningPolicy::No,
/// }
/// .build();
///
/// let invocation = ForkJoin {
///     split_threshold: 16,
///     strategy: ReductionStrategy::Chained,
///     ..ForkJoin::new(0..1000)
/// };
/// let sum = invocation
///     .invoke(&thread_pool, |i| Ok::<_, Infallible>(i as u64), |a, b| a + b)
///     .unwrap();
/// assert_eq!(sum, Some(999 * 1000 / 2));
///
/// let found = invocation
///     .search(&thread_pool, |i| Ok::<_, Infallible>((i == 123).then_some(i)))
///     .unwrap();
/// assert_eq!(found, SearchOutcome::Found(123));
/// ```
#[derive(Clone, Debug)]
pub struct ForkJoin {
    /// Indices to process.
    pub range: Range<usize>,
    /// Minimal number of indices for a task to split. Values below 2 are
    /// treated as 2.
    pub split_threshold: usize,
    /// How map-reduce results are merged. Ignored by searches, which always
    /// fan out.
    pub strategy: ReductionStrategy,
    /// Optional token to cancel this invocation from another thread.
    pub cancellation: Option<CancellationToken>,
}

impl ForkJoin {
    /// Creates an invocation over the given range, splitting down to single
    /// indices with the [`Balanced`](ReductionStrategy::Balanced) strategy.
    pub fn new(range: Range<usize>) -> Self {
        Self {
            range,
            split_threshold: 2,
            strategy: ReductionStrategy::default(),
            cancellation: None,
        }
    }

    /// Computes `leaf(i)` for every index in the range, and combines the
    /// results in index order with `combine`, which must be associative.
    ///
    /// Returns `Ok(None)` for an empty range. Blocks until the computation
    /// completes, fails or is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if `leaf` or `combine` panics.
    pub fn invoke<T, E>(
        &self,
        thread_pool: &ThreadPool,
        leaf: impl Fn(usize) -> Result<T, E> + Send + Sync + 'static,
        combine: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Result<Option<T>, Error<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        if self.range.is_empty() {
            return Ok(None);
        }

        let map = MapReduce::new(leaf, combine);
        let outcome = match self.strategy {
            ReductionStrategy::Balanced => execute(
                thread_pool.shared(),
                Balanced::new(map),
                self.range.clone(),
                self.split_threshold,
                self.cancellation.clone(),
            ),
            ReductionStrategy::Chained => execute(
                thread_pool.shared(),
                Chained::new(map),
                self.range.clone(),
                self.split_threshold,
                self.cancellation.clone(),
            ),
        };

        match outcome {
            Outcome::Completed(result) => Ok(result),
            Outcome::Claimed | Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::Failed { index, error } => Err(Error::LeafComputationFailed { index, error }),
            Outcome::Rejected => Err(Error::PoolRejected),
        }
    }

    /// Searches the range for an index on which `probe` returns `Ok(Some(_))`.
    ///
    /// The first branch to find a match stops the whole search, so the
    /// returned match isn't necessarily the one with the lowest index.
    /// Blocks until a match is found, the range is exhausted, a probe fails or
    /// the search is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if `probe` panics.
    pub fn search<T, E>(
        &self,
        thread_pool: &ThreadPool,
        probe: impl Fn(usize) -> Result<Option<T>, E> + Send + Sync + 'static,
    ) -> Result<SearchOutcome<T>, Error<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        if self.range.is_empty() {
            return Ok(SearchOutcome::NotFound);
        }

        let slot = Arc::new(SharedResultSlot::new());
        let outcome = execute(
            thread_pool.shared(),
            Search::new(probe, slot.clone()),
            self.range.clone(),
            self.split_threshold,
            self.cancellation.clone(),
        );

        match outcome {
            Outcome::Claimed => match slot.take() {
                Some(value) => Ok(SearchOutcome::Found(value)),
                None => Err(Error::Cancelled),
            },
            Outcome::Completed(_) => Ok(SearchOutcome::NotFound),
            Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::Failed { index, error } => Err(Error::LeafComputationFailed { index, error }),
            Outcome::Rejected => Err(Error::PoolRejected),
        }
    }
}

impl ThreadPool {
    /// Computes `leaf(i)` for every index in the range, splitting it into
    /// tasks down to `split_threshold` indices, and combines the results in
    /// index order with the associative `combine` function.
    ///
    /// This is a shorthand for [`ForkJoin::invoke()`] with the
    /// [`Balanced`](ReductionStrategy::Balanced) strategy.
    ///
    /// ```
    /// # use forkcount::{CpuPinningPolicy, OverflowPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::convert::Infallible;
    /// # use std::num::NonZeroUsize;
    /// # let thread_pool = ThreadPoolBuilder {
    /// #     num_threads: ThreadCount::AvailableParallelism,
    /// #     queue_capacity: NonZeroUsize::try_from(64).unwrap(),
    /// #     overflow: OverflowPolicy::CallerRuns,
    /// #     cpu_pinning: CpuPinningPolicy::No,
    /// # }
    /// # .build();
    /// let sum = thread_pool.invoke(0..8, 2, |i| Ok::<_, Infallible>(i as u64), |a, b| a + b);
    /// assert_eq!(sum.unwrap(), Some(28));
    /// ```
    pub fn invoke<T, E>(
        &self,
        range: Range<usize>,
        split_threshold: usize,
        leaf: impl Fn(usize) -> Result<T, E> + Send + Sync + 'static,
        combine: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> Result<Option<T>, Error<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        ForkJoin {
            split_threshold,
            ..ForkJoin::new(range)
        }
        .invoke(self, leaf, combine)
    }
}
