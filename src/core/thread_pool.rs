// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A bounded thread pool with a caller-runs overflow policy.

use super::job::{Submitted, WorkUnit};
use super::util::Status;
use crate::error::Rejected;
#[cfg(feature = "log_parallelism")]
use crate::macros::log_info;
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_queue::ArrayQueue;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
#[cfg(feature = "log_parallelism")]
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Number of threads to spawn in a thread pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy applied when a unit is submitted while the pool's queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Run the unit synchronously on the submitting thread.
    CallerRuns,
    /// Refuse the unit, returning a [`Rejected`] error to the submitter.
    Reject,
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a thread pool will panic.
    Always,
}

/// A builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Maximal number of units waiting in the pool's queue.
    pub queue_capacity: NonZeroUsize,
    /// What to do with a unit submitted while the queue is full.
    pub overflow: OverflowPolicy,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use forkcount::{CpuPinningPolicy, OverflowPolicy, ThreadCount, ThreadPoolBuilder};
    /// # use std::convert::Infallible;
    /// # use std::num::NonZeroUsize;
    /// let pool_builder = ThreadPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     queue_capacity: NonZeroUsize::try_from(64).unwrap(),
    ///     overflow: OverflowPolicy::CallerRuns,
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// };
    /// let thread_pool = pool_builder.build();
    ///
    /// let sum = thread_pool
    ///     .invoke(1..11, 2, |i| Ok::<_, Infallible>(i), |a, b| a + b)
    ///     .unwrap();
    /// assert_eq!(sum, Some(5 * 11));
    /// ```
    pub fn build(&self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

/// State of the pool, shared with the worker threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PoolState {
    /// The worker threads process units as they are queued.
    Running,
    /// The worker threads must drain the queue and exit.
    Finished,
}

/// Context shared between the pool handle, the worker threads and the
/// fork/join invocations that submit work.
pub(crate) struct PoolShared {
    /// Units waiting for a worker thread.
    queue: ArrayQueue<Arc<WorkUnit>>,
    /// Status that idle worker threads wait on.
    state: Status<PoolState>,
    /// Policy applied when the queue is full.
    overflow: OverflowPolicy,
    /// Counters printed when the pool is dropped.
    #[cfg(feature = "log_parallelism")]
    statistics: PoolStatistics,
}

impl PoolShared {
    /// Hands the given unit to the pool, applying the overflow policy if the
    /// queue is full.
    pub(crate) fn submit(&self, unit: Arc<WorkUnit>) -> Result<Submitted, Rejected> {
        match self.queue.push(unit) {
            Ok(()) => {
                #[cfg(feature = "log_parallelism")]
                self.statistics.queued.fetch_add(1, Ordering::Relaxed);
                self.state.notify_one();
                Ok(Submitted::Queued)
            }
            Err(unit) => match self.overflow {
                OverflowPolicy::CallerRuns => {
                    #[cfg(feature = "log_parallelism")]
                    self.statistics.ran_on_caller.fetch_add(1, Ordering::Relaxed);
                    unit.try_run();
                    Ok(Submitted::RanOnCaller)
                }
                OverflowPolicy::Reject => {
                    #[cfg(feature = "log_parallelism")]
                    self.statistics.rejected.fetch_add(1, Ordering::Relaxed);
                    log_debug!("Rejected a unit: the queue is full");
                    Err(Rejected)
                }
            },
        }
    }
}

/// Debugging statistics about the units handled by a pool.
#[cfg(feature = "log_parallelism")]
#[derive(Default)]
struct PoolStatistics {
    queued: AtomicU64,
    ran_on_caller: AtomicU64,
    rejected: AtomicU64,
    already_claimed: AtomicU64,
}

#[cfg(feature = "log_parallelism")]
impl PoolStatistics {
    fn print(&self) {
        log_info!(
            "Pool statistics: {} queued, {} ran on caller, {} rejected, {} already claimed when popped",
            self.queued.load(Ordering::Relaxed),
            self.ran_on_caller.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.already_claimed.load(Ordering::Relaxed),
        );
    }
}

/// A fixed-size pool of worker threads fed by a bounded queue.
///
/// Fork/join computations are run on a pool with
/// [`invoke()`](Self::invoke) or via a [`ForkJoin`](crate::ForkJoin)
/// configuration. Standalone units of work can be submitted with
/// [`submit()`](Self::submit).
pub struct ThreadPool {
    /// Handles to all the worker threads in the pool.
    threads: Vec<WorkerThreadHandle>,
    /// Context shared with the worker threads.
    shared: Arc<PoolShared>,
}

/// Handle to a worker thread in a thread pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Creates a new thread pool using the given parameters.
    fn new(builder: &ThreadPoolBuilder) -> Self {
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .expect("Getting the available parallelism failed"),
            ThreadCount::Count(count) => count,
        };
        let num_threads: usize = num_threads.into();
        let cpu_pinning = builder.cpu_pinning;

        let shared = Arc::new(PoolShared {
            queue: ArrayQueue::new(builder.queue_capacity.get()),
            state: Status::new(PoolState::Running),
            overflow: builder.overflow,
            #[cfg(feature = "log_parallelism")]
            statistics: PoolStatistics::default(),
        });

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                panic!("Pinning threads to CPUs is not implemented on this platform.")
            }
        }

        let threads = (0..num_threads)
            .map(|id| {
                let context = ThreadContext {
                    id,
                    shared: shared.clone(),
                };
                WorkerThreadHandle {
                    handle: std::thread::spawn(move || {
                        #[cfg(all(
                            not(miri),
                            any(
                                target_os = "android",
                                target_os = "dragonfly",
                                target_os = "freebsd",
                                target_os = "linux"
                            )
                        ))]
                        match cpu_pinning {
                            CpuPinningPolicy::No => (),
                            CpuPinningPolicy::IfSupported => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(_e) = cpu_set.set(id) {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else if let Err(_e) =
                                    sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                            CpuPinningPolicy::Always => {
                                let mut cpu_set = CpuSet::new();
                                if let Err(e) = cpu_set.set(id) {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set)
                                {
                                    panic!("Failed to set CPU affinity for thread #{id}: {e}");
                                } else {
                                    log_debug!("Pinned thread #{id} to CPU #{id}");
                                }
                            }
                        }
                        context.run()
                    }),
                }
            })
            .collect();
        log_debug!("[main thread] Spawned threads");

        Self { threads, shared }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// thread pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.threads.len().try_into().unwrap()
    }

    /// Returns the maximal number of units that can wait in this pool's
    /// queue.
    pub fn queue_capacity(&self) -> NonZeroUsize {
        self.shared.queue.capacity().try_into().unwrap()
    }

    /// Submits a unit of work to this pool.
    ///
    /// If the queue is full, the unit is either run on the current thread or
    /// rejected, depending on the [`OverflowPolicy`] of this pool.
    pub fn submit(&self, unit: Arc<WorkUnit>) -> Result<Submitted, Rejected> {
        self.shared.submit(unit)
    }

    /// Returns the context shared with the worker threads.
    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }
}

impl Drop for ThreadPool {
    /// Joins all the threads in the pool, once they have drained the queue.
    #[allow(clippy::single_match, clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        log_debug!("[main thread] Notifying threads to finish...");
        self.shared.state.notify_all(PoolState::Finished);

        log_debug!("[main thread] Joining threads in the pool...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Thread {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");

        #[cfg(feature = "log_parallelism")]
        self.shared.statistics.print();
    }
}

/// Context object owned by a worker thread.
struct ThreadContext {
    /// Thread index.
    #[cfg_attr(not(feature = "log"), allow(dead_code))]
    id: usize,
    /// Context shared with the pool handle.
    shared: Arc<PoolShared>,
}

impl ThreadContext {
    /// Main function run by this thread.
    fn run(&self) {
        loop {
            if let Some(unit) = self.shared.queue.pop() {
                self.execute(&unit);
                continue;
            }

            let state = *self.shared.state.wait_while(|state| {
                *state == PoolState::Running && self.shared.queue.is_empty()
            });
            if state == PoolState::Finished && self.shared.queue.is_empty() {
                log_debug!("[thread {}] Received finish signal", self.id);
                break;
            }
        }
    }

    /// Runs the given unit, unless another thread already claimed it.
    fn execute(&self, unit: &WorkUnit) {
        // A panicking unit notifies its own invocation. The worker thread itself
        // survives to process the next units.
        match std::panic::catch_unwind(AssertUnwindSafe(|| unit.try_run())) {
            Ok(true) => (),
            Ok(false) => {
                #[cfg(feature = "log_parallelism")]
                self.shared
                    .statistics
                    .already_claimed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => log_error!("[thread {}] A unit of work panicked", self.id),
        }
    }
}
