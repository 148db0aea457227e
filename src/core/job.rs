// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Units of work submitted to a [`ThreadPool`](super::ThreadPool).

use super::sync::OnceFlag;
use std::sync::{Arc, Mutex};

type Job = Box<dyn FnOnce() + Send>;

/// A unit of work that can be submitted to a
/// [`ThreadPool`](super::ThreadPool).
///
/// A unit carries a claim flag: whichever thread first claims it runs the job,
/// and every other attempt is a no-op. This allows the same unit to be
/// reachable both from the pool's queue and from other places (such as the
/// help list of a fork/join invocation) without ever running twice.
pub struct WorkUnit {
    claim: OnceFlag,
    job: Mutex<Option<Job>>,
}

impl WorkUnit {
    /// Wraps the given job into a new unclaimed unit.
    ///
    /// ```
    /// # use forkcount::WorkUnit;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// let unit = WorkUnit::new({
    ///     let counter = counter.clone();
    ///     move || {
    ///         counter.fetch_add(1, Ordering::Relaxed);
    ///     }
    /// });
    ///
    /// assert!(unit.try_run());
    /// assert!(!unit.try_run());
    /// assert_eq!(counter.load(Ordering::Relaxed), 1);
    /// ```
    pub fn new(job: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            claim: OnceFlag::new(),
            job: Mutex::new(Some(Box::new(job))),
        })
    }

    /// Returns whether some thread already claimed this unit.
    pub fn is_claimed(&self) -> bool {
        self.claim.is_claimed()
    }

    /// Claims this unit and runs its job on the current thread.
    ///
    /// Returns false without running anything if the unit was already
    /// claimed. The job is dropped once it has run, releasing everything it
    /// captured even while the unit itself is still referenced.
    pub fn try_run(&self) -> bool {
        if !self.claim.try_claim() {
            return false;
        }
        let job = self.job.lock().unwrap().take();
        if let Some(job) = job {
            job();
        }
        true
    }
}

/// How a [`WorkUnit`] was handled by
/// [`ThreadPool::submit()`](super::ThreadPool::submit).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// The unit was queued for a worker thread.
    Queued,
    /// The queue was full, so the unit ran synchronously on the submitting
    /// thread.
    RanOnCaller,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn unit_runs_once_under_contention() {
        const NUM_THREADS: usize = 8;

        for _ in 0..100 {
            let runs = Arc::new(AtomicUsize::new(0));
            let unit = WorkUnit::new({
                let runs = runs.clone();
                move || {
                    runs.fetch_add(1, Ordering::Relaxed);
                }
            });
            let barrier = Arc::new(Barrier::new(NUM_THREADS));

            let threads: Vec<_> = (0..NUM_THREADS)
                .map(|_| {
                    let unit = unit.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        unit.try_run()
                    })
                })
                .collect();

            let winners = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|&won| won)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(runs.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn unit_releases_job_after_running() {
        let payload = Arc::new(());
        let unit = WorkUnit::new({
            let payload = payload.clone();
            move || drop(payload)
        });
        assert_eq!(Arc::strong_count(&payload), 2);
        assert!(!unit.is_claimed());

        assert!(unit.try_run());
        assert!(unit.is_claimed());
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
