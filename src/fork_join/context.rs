// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared state of a single fork/join invocation, and the completion
//! protocol that drives its tree.

use super::node::{NodeStatus, TaskNode};
use super::CancellationToken;
use crate::core::{Countdown, PoolShared, Status, Submitted, WorkUnit};
#[cfg(feature = "log_parallelism")]
use crate::macros::log_trace;
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// Node type of the tree driven by the strategy `S`.
pub(crate) type Node<S> = TaskNode<<S as Strategy>::Output, <S as Strategy>::Links>;

/// How a tree splits its range into nodes and merges their results.
pub(crate) trait Strategy: Send + Sync + Sized + 'static {
    /// Value materialized by each node.
    type Output: Send + 'static;
    /// Error returned by the user-provided leaf computation.
    type Error: Send + 'static;
    /// Per-node bookkeeping, owning the node's children.
    type Links: Send + Sync + 'static;

    /// Links of the root node.
    fn root_links(&self) -> Self::Links;

    /// Runs the node's own work: either splits it into children or computes
    /// it as a leaf. Must eventually [`release()`] the node's hold exactly
    /// once, and never block.
    fn compute(&self, ctx: &Arc<Context<Self>>, node: &Arc<Node<Self>>);

    /// Merges the node's children once all of them have reported, returning
    /// the node's terminal status. `caller` is the child whose report
    /// finalized the node, or `None` if the node's own hold did.
    fn reduce(&self, node: &Node<Self>, caller: Option<&Node<Self>>) -> NodeStatus;
}

/// Reason why an invocation was aborted before its root completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AbortReason {
    /// A search branch claimed the shared result slot.
    Claimed = 1,
    /// A leaf computation returned an error.
    Failed = 2,
    /// The pool rejected a fork.
    Rejected = 3,
    /// A task panicked.
    Panicked = 4,
}

const NOT_ABORTED: u8 = 0;

impl AbortReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            NOT_ABORTED => None,
            1 => Some(AbortReason::Claimed),
            2 => Some(AbortReason::Failed),
            3 => Some(AbortReason::Rejected),
            4 => Some(AbortReason::Panicked),
            _ => unreachable!("invalid abort reason {value}"),
        }
    }
}

/// State of the latch that the invoking thread blocks on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Latch {
    /// The root hasn't completed and the invocation isn't aborted.
    Waiting,
    /// The root completed, or the invocation was aborted.
    Released,
}

/// How an invocation ended, before translation into the public result types.
pub(crate) enum Outcome<T, E> {
    /// The root completed, with its result.
    Completed(Option<T>),
    /// A search branch claimed the shared result slot.
    Claimed,
    /// The cancellation token stopped the tree.
    Cancelled,
    /// A leaf computation failed.
    Failed { index: usize, error: E },
    /// The pool rejected a fork.
    Rejected,
}

/// Context shared by all the nodes of one invocation.
pub(crate) struct Context<S: Strategy> {
    strategy: S,
    pool: Arc<PoolShared>,
    split_threshold: usize,
    cancellation: Option<CancellationToken>,
    /// Thread that started the invocation.
    owner: ThreadId,
    /// Units queued on the pool by the invoking thread, that it may run itself
    /// before blocking.
    help: SegQueue<Arc<WorkUnit>>,
    abort: CachePadded<AtomicU8>,
    forks: AtomicUsize,
    /// Value of `forks` when the invocation was aborted.
    forks_at_abort: AtomicUsize,
    failure: Mutex<Option<(usize, S::Error)>>,
    latch: Status<Latch>,
}

impl<S: Strategy> Context<S> {
    /// Creates the context of an invocation started by the current thread.
    pub(crate) fn new(
        strategy: S,
        pool: Arc<PoolShared>,
        split_threshold: usize,
        cancellation: Option<CancellationToken>,
    ) -> Self {
        Self {
            strategy,
            pool,
            split_threshold: split_threshold.max(2),
            cancellation,
            owner: std::thread::current().id(),
            help: SegQueue::new(),
            abort: CachePadded::new(AtomicU8::new(NOT_ABORTED)),
            forks: AtomicUsize::new(0),
            forks_at_abort: AtomicUsize::new(0),
            failure: Mutex::new(None),
            latch: Status::new(Latch::Waiting),
        }
    }

    /// Returns whether a node covering `len` indices splits rather than runs
    /// as a leaf.
    pub(crate) fn should_split(&self, len: usize) -> bool {
        len >= self.split_threshold
    }

    /// Returns whether nodes should stop forking and finalize as cancelled.
    pub(crate) fn should_stop(&self) -> bool {
        self.abort.load(Ordering::Acquire) != NOT_ABORTED
            || self
                .cancellation
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
    }

    fn abort_reason(&self) -> Option<AbortReason> {
        AbortReason::from_u8(self.abort.load(Ordering::Acquire))
    }

    /// Aborts the invocation and wakes the invoking thread. Only the first
    /// reason is kept.
    pub(crate) fn abort(&self, reason: AbortReason) -> bool {
        let won = self
            .abort
            .compare_exchange(
                NOT_ABORTED,
                reason as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.forks_at_abort
                .store(self.forks.load(Ordering::SeqCst), Ordering::SeqCst);
            log_debug!("Aborting fork/join invocation: {reason:?}");
            // Can be called while unwinding, so a poisoned latch must not panic
            // again.
            if self.latch.try_notify_all(Latch::Released).is_err() {
                log_error!("Failed to wake the invoking thread: the latch is poisoned");
            }
        }
        won
    }

    /// Records the failure of the leaf computation at the given index and
    /// aborts the invocation.
    pub(crate) fn fail(&self, index: usize, error: S::Error) {
        {
            let mut failure = self.failure.lock().unwrap();
            if failure.is_none() {
                *failure = Some((index, error));
            } else {
                log_debug!("Discarding the failure at index {index}: another leaf failed first");
            }
        }
        self.abort(AbortReason::Failed);
    }

    /// Returns the number of forks started after the invocation was aborted.
    pub(crate) fn forks_after_abort(&self) -> usize {
        if self.abort_reason().is_none() {
            return 0;
        }
        let forks = self.forks.load(Ordering::SeqCst);
        forks.saturating_sub(self.forks_at_abort.load(Ordering::SeqCst))
    }

    fn finish_root(&self, _status: NodeStatus) {
        log_debug!("Root node finalized as {_status:?}");
        self.latch.notify_all(Latch::Released);
    }

    /// Runs the units queued by the invoking thread, until none is left or the
    /// invocation is aborted. Units already claimed by a worker are skipped.
    fn help(&self) {
        while self.abort_reason().is_none() {
            let Some(unit) = self.help.pop() else {
                break;
            };
            unit.try_run();
        }
    }

    fn wait(&self) {
        let _latch = self.latch.wait_while(|latch| *latch == Latch::Waiting);
    }
}

/// Aborts the invocation if dropped while unwinding from a panicking task.
struct PanicNotifier<'a, S: Strategy> {
    ctx: &'a Context<S>,
}

impl<S: Strategy> Drop for PanicNotifier<'_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log_error!("A fork/join task panicked");
            self.ctx.abort(AbortReason::Panicked);
        }
    }
}

/// Submits the given node to the pool.
///
/// The caller must have registered the node in its parent's pending count.
pub(crate) fn fork<S: Strategy>(ctx: &Arc<Context<S>>, node: Arc<Node<S>>) {
    ctx.forks.fetch_add(1, Ordering::SeqCst);
    node.mark_forked();
    #[cfg(feature = "log_parallelism")]
    log_trace!("Forking node {:?}", node.range());

    let unit = WorkUnit::new({
        let ctx = Arc::downgrade(ctx);
        let node = node.clone();
        move || {
            // Nobody awaits the tree anymore.
            if let Some(ctx) = ctx.upgrade() {
                run_node(&ctx, &node);
            }
        }
    });
    match ctx.pool.submit(unit.clone()) {
        // Only the invoking thread drains the help list.
        Ok(Submitted::Queued) if std::thread::current().id() == ctx.owner => {
            ctx.help.push(unit)
        }
        Ok(Submitted::Queued) | Ok(Submitted::RanOnCaller) => (),
        Err(_e) => {
            log_warn!("Fork of node {:?} failed: {_e}", node.range());
            ctx.abort(AbortReason::Rejected);
            node.abandon(NodeStatus::Failed);
            release(ctx, &node);
        }
    }
}

/// Runs the given node's work on the current thread, or finalizes it as
/// cancelled if the invocation is stopping.
pub(crate) fn run_node<S: Strategy>(ctx: &Arc<Context<S>>, node: &Arc<Node<S>>) {
    let _notifier = PanicNotifier { ctx: ctx.as_ref() };
    if ctx.should_stop() {
        node.abandon(NodeStatus::Cancelled);
        release(ctx, node);
        return;
    }
    ctx.strategy.compute(ctx, node);
}

/// Releases one pending completion of the given node: either its own hold, or
/// the report of one of its children. The thread bringing the count to zero
/// finalizes the node.
pub(crate) fn release<S: Strategy>(ctx: &Arc<Context<S>>, node: &Arc<Node<S>>) {
    match node.pending().decrement() {
        Ok(Countdown::Finalize) => propagate(ctx, node.clone()),
        Ok(Countdown::Pending(_)) => (),
        Err(_e) => log_error!("Releasing node {:?}: {_e}", node.range()),
    }
}

/// Finalizes the given node and reports its completion upward, finalizing
/// every ancestor whose last pending completion it was.
fn propagate<S: Strategy>(ctx: &Arc<Context<S>>, node: Arc<Node<S>>) {
    let mut node = node;
    let mut caller: Option<Arc<Node<S>>> = None;
    loop {
        let status = if node.begin_reduce() {
            let status = ctx.strategy.reduce(node.as_ref(), caller.as_deref());
            node.finish(status);
            status
        } else {
            node.status()
        };

        if !node.claim_report() {
            log_error!("Node {:?} was already reported", node.range());
            return;
        }

        let Some(parent) = node.parent() else {
            ctx.finish_root(status);
            return;
        };
        // The tree was abandoned by its owner.
        let Some(parent) = parent.upgrade() else {
            return;
        };
        match parent.pending().decrement() {
            Ok(Countdown::Finalize) => {
                caller = Some(node);
                node = parent;
            }
            Ok(Countdown::Pending(_)) => return,
            Err(_e) => {
                log_error!("Reporting node {:?}: {_e}", node.range());
                return;
            }
        }
    }
}

/// Runs a whole tree over the given range, blocking until the root completes
/// or the invocation is aborted.
pub(crate) fn execute<S: Strategy>(
    pool: &Arc<PoolShared>,
    strategy: S,
    range: Range<usize>,
    split_threshold: usize,
    cancellation: Option<CancellationToken>,
) -> Outcome<S::Output, S::Error> {
    let ctx = Arc::new(Context::new(
        strategy,
        pool.clone(),
        split_threshold,
        cancellation,
    ));
    run(&ctx, range)
}

/// Runs a tree over the given range within the given context.
///
/// The root runs inline on the current thread, which then helps with the
/// units it queued before blocking.
pub(crate) fn run<S: Strategy>(
    ctx: &Arc<Context<S>>,
    range: Range<usize>,
) -> Outcome<S::Output, S::Error> {
    let root = Arc::new(TaskNode::root(range, ctx.strategy.root_links()));

    let inline = std::panic::catch_unwind(AssertUnwindSafe(|| {
        run_node(ctx, &root);
        ctx.help();
    }));
    if inline.is_err() {
        ctx.abort(AbortReason::Panicked);
        panic!("A fork/join task panicked!");
    }

    ctx.wait();

    let _stragglers = ctx.forks_after_abort();
    log_debug!(
        "Invocation forked {} nodes, {_stragglers} after it was aborted",
        ctx.forks.load(Ordering::SeqCst)
    );

    match ctx.abort_reason() {
        Some(AbortReason::Panicked) => panic!("A fork/join task panicked!"),
        Some(AbortReason::Claimed) => Outcome::Claimed,
        Some(AbortReason::Rejected) => Outcome::Rejected,
        Some(AbortReason::Failed) => {
            let (index, error) = ctx
                .failure
                .lock()
                .unwrap()
                .take()
                .expect("A failed invocation must record its failure");
            Outcome::Failed { index, error }
        }
        None => match root.status() {
            NodeStatus::Completed => Outcome::Completed(root.result().take()),
            _status => {
                log_debug!("Invocation ended with root status {_status:?}");
                Outcome::Cancelled
            }
        },
    }
}
