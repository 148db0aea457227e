// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Task nodes: the units of recursive work of a fork/join tree.

use crate::core::{OnceFlag, PendingCount};
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle of a [`TaskNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NodeStatus {
    /// Created, its own work not yet finished.
    Pending = 0,
    /// Submitted to the pool, not yet finalized.
    Forked = 1,
    /// The finalizer is merging the children results.
    Reducing = 2,
    /// The result is available.
    Completed = 3,
    /// Stopped before producing a result.
    Cancelled = 4,
    /// A leaf computation failed in this subtree, or a fork was rejected.
    Failed = 5,
}

impl NodeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => NodeStatus::Pending,
            1 => NodeStatus::Forked,
            2 => NodeStatus::Reducing,
            3 => NodeStatus::Completed,
            4 => NodeStatus::Cancelled,
            5 => NodeStatus::Failed,
            _ => unreachable!("invalid node status {value}"),
        }
    }

    /// Returns whether the node has finalized.
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Cancelled | NodeStatus::Failed
        )
    }

    /// Combines the statuses of two subtrees: the worst one wins, with
    /// `Failed` > `Cancelled` > `Completed`.
    pub(crate) fn merge(self, other: NodeStatus) -> NodeStatus {
        match (self, other) {
            (NodeStatus::Failed, _) | (_, NodeStatus::Failed) => NodeStatus::Failed,
            (NodeStatus::Completed, NodeStatus::Completed) => NodeStatus::Completed,
            _ => NodeStatus::Cancelled,
        }
    }
}

struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(status: NodeStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn load(&self) -> NodeStatus {
        NodeStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Atomically moves to `to` if the current status satisfies `from`.
    fn transition(&self, from: impl Fn(NodeStatus) -> bool, to: NodeStatus) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                from(NodeStatus::from_u8(current)).then_some(to as u8)
            })
            .is_ok()
    }
}

/// Slot holding the value materialized by a node. Written at most once, then
/// consumed by the parent's reduction.
pub(crate) struct ResultSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Stores the given value, unless a value was already stored, in which case
    /// it is handed back.
    pub(crate) fn set(&self, value: T) -> Result<(), T> {
        let mut slot = self.value.lock().unwrap();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        Ok(())
    }

    /// Moves the value out of this slot.
    pub(crate) fn take(&self) -> Option<T> {
        self.value.lock().unwrap().take()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.value.lock().unwrap().is_some()
    }
}

/// A node of a fork/join tree, covering the half-open index range
/// `[lo, hi)`.
///
/// Each node counts the completions it still awaits in a [`PendingCount`]
/// that starts at 1 for its own work. `L` holds the bookkeeping specific to
/// the reduction strategy, notably the owning links to the node's children.
pub(crate) struct TaskNode<T, L> {
    range: Range<usize>,
    /// Only used to report completion upward.
    parent: Option<Weak<Self>>,
    pending: PendingCount,
    status: AtomicStatus,
    reported: OnceFlag,
    result: ResultSlot<T>,
    pub(crate) links: L,
}

impl<T, L> TaskNode<T, L> {
    /// Creates the root of a tree.
    pub(crate) fn root(range: Range<usize>, links: L) -> Self {
        Self::new(range, None, links)
    }

    /// Creates a child of the given node.
    pub(crate) fn child(parent: &Arc<Self>, range: Range<usize>, links: L) -> Self {
        Self::new(range, Some(Arc::downgrade(parent)), links)
    }

    fn new(range: Range<usize>, parent: Option<Weak<Self>>, links: L) -> Self {
        Self {
            range,
            parent,
            pending: PendingCount::new(1),
            status: AtomicStatus::new(NodeStatus::Pending),
            reported: OnceFlag::new(),
            result: ResultSlot::new(),
            links,
        }
    }

    pub(crate) fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Returns the link to the parent, or `None` for the root.
    pub(crate) fn parent(&self) -> Option<&Weak<Self>> {
        self.parent.as_ref()
    }

    pub(crate) fn pending(&self) -> &PendingCount {
        &self.pending
    }

    pub(crate) fn status(&self) -> NodeStatus {
        self.status.load()
    }

    pub(crate) fn result(&self) -> &ResultSlot<T> {
        &self.result
    }

    /// Pending → Forked.
    pub(crate) fn mark_forked(&self) -> bool {
        self.status
            .transition(|s| s == NodeStatus::Pending, NodeStatus::Forked)
    }

    /// Pending|Forked → Cancelled|Failed, for a node that stops without
    /// producing a result.
    pub(crate) fn abandon(&self, status: NodeStatus) -> bool {
        debug_assert!(matches!(status, NodeStatus::Cancelled | NodeStatus::Failed));
        self.status.transition(
            |s| matches!(s, NodeStatus::Pending | NodeStatus::Forked),
            status,
        )
    }

    /// Pending|Forked → Reducing. Fails for abandoned nodes, which skip the
    /// reduction.
    pub(crate) fn begin_reduce(&self) -> bool {
        self.status.transition(
            |s| matches!(s, NodeStatus::Pending | NodeStatus::Forked),
            NodeStatus::Reducing,
        )
    }

    /// Reducing → terminal.
    pub(crate) fn finish(&self, status: NodeStatus) {
        debug_assert!(status.is_terminal());
        let finished = self
            .status
            .transition(|s| s == NodeStatus::Reducing, status);
        debug_assert!(finished);
    }

    /// Claims the right to report this node's completion to its parent.
    /// Returns true exactly once.
    pub(crate) fn claim_report(&self) -> bool {
        self.reported.try_claim()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Barrier;

    type Node = TaskNode<u64, ()>;

    #[test]
    fn status_merge_worst_wins() {
        use NodeStatus::*;
        assert_eq!(Completed.merge(Completed), Completed);
        assert_eq!(Completed.merge(Cancelled), Cancelled);
        assert_eq!(Cancelled.merge(Completed), Cancelled);
        assert_eq!(Cancelled.merge(Failed), Failed);
        assert_eq!(Failed.merge(Completed), Failed);
    }

    #[test]
    fn node_lifecycle() {
        let node = Node::root(0..4, ());
        assert_eq!(node.status(), NodeStatus::Pending);
        assert_eq!(node.range(), 0..4);
        assert!(node.parent().is_none());

        assert!(node.mark_forked());
        assert!(!node.mark_forked());
        assert_eq!(node.status(), NodeStatus::Forked);

        assert!(node.begin_reduce());
        assert!(!node.begin_reduce());
        assert!(!node.abandon(NodeStatus::Cancelled));
        node.finish(NodeStatus::Completed);
        assert_eq!(node.status(), NodeStatus::Completed);
    }

    #[test]
    fn abandoned_node_skips_reduction() {
        let node = Node::root(0..1, ());
        assert!(node.abandon(NodeStatus::Failed));
        assert!(!node.begin_reduce());
        assert_eq!(node.status(), NodeStatus::Failed);
    }

    #[test]
    fn result_set_at_most_once() {
        let node = Node::root(0..1, ());
        assert!(!node.result().is_set());
        assert_eq!(node.result().set(1), Ok(()));
        assert_eq!(node.result().set(2), Err(2));
        assert_eq!(node.result().take(), Some(1));
        assert_eq!(node.result().take(), None);
    }

    #[test]
    fn child_does_not_keep_parent_alive() {
        let parent = Arc::new(Node::root(0..2, ()));
        let child = Node::child(&parent, 0..1, ());
        assert!(child.parent().unwrap().upgrade().is_some());
        drop(parent);
        assert!(child.parent().unwrap().upgrade().is_none());
    }

    #[test]
    fn report_claimed_once_under_contention() {
        const NUM_THREADS: usize = 8;

        let node = Arc::new(Node::root(0..1, ()));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let node = node.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    node.claim_report()
                })
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
        assert!(!node.claim_report());
    }
}
