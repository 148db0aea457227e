// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

/// Outcome of a successful [`PendingCount::decrement()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Countdown {
    /// Other completions are still outstanding. Contains the remaining count.
    Pending(usize),
    /// This call brought the count to zero. The caller is the sole finalizer.
    Finalize,
}

/// A decrement was attempted on a count that had already reached zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("pending count decremented below zero")]
pub struct CountUnderflow;

/// Number of completions that a task node still awaits before it can be
/// finalized.
///
/// Every node starts with a count of 1, which represents the node's own inline
/// work. Forking `n` children adds `n`. Each child completion, as well as the
/// end of the node's own work, removes one. Whichever decrement brings the
/// count to exactly zero designates its caller as the unique finalizer.
pub struct PendingCount {
    count: AtomicUsize,
}

impl PendingCount {
    /// Creates a counter holding the given number of pending completions.
    pub fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Registers `n` additional pending completions.
    ///
    /// This must happen before the corresponding children are forked, so that
    /// the count cannot reach zero while they are still in flight.
    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Returns the current count.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Removes one pending completion.
    ///
    /// The count is never driven below zero: a decrement observed on a zero
    /// count fails with [`CountUnderflow`] and leaves the counter unchanged.
    pub fn decrement(&self) -> Result<Countdown, CountUnderflow> {
        let backoff = Backoff::new();
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(CountUnderflow);
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if current == 1 => return Ok(Countdown::Finalize),
                Ok(_) => return Ok(Countdown::Pending(current - 1)),
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }
}

/// A one-shot flag that exactly one thread can claim.
#[derive(Default)]
pub struct OnceFlag {
    claimed: AtomicBool,
}

impl OnceFlag {
    /// Creates an unclaimed flag.
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Attempts to claim this flag, returning true for the single caller that
    /// succeeds.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns whether this flag has been claimed.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}
