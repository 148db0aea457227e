// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Early-exit search: the first branch to find a match claims a shared slot,
//! which stops the rest of the tree.

use super::chained::{fan_out, ChainLinks};
use super::context::{release, AbortReason, Context, Node, Strategy};
use super::node::NodeStatus;
use crate::core::OnceFlag;
use crossbeam_utils::CachePadded;
use std::sync::{Arc, Mutex};

/// Slot holding the value of the winning search branch.
pub(crate) struct SharedResultSlot<T> {
    claimed: CachePadded<OnceFlag>,
    value: Mutex<Option<T>>,
}

impl<T> SharedResultSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            claimed: CachePadded::new(OnceFlag::new()),
            value: Mutex::new(None),
        }
    }

    /// Stores the given value if no other branch claimed the slot before.
    pub(crate) fn try_claim(&self, value: T) -> bool {
        if !self.claimed.try_claim() {
            return false;
        }
        *self.value.lock().unwrap() = Some(value);
        true
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.is_claimed()
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.value.lock().unwrap().take()
    }
}

type ProbeFn<T, E> = Box<dyn Fn(usize) -> Result<Option<T>, E> + Send + Sync>;

pub(crate) struct Search<T, E> {
    probe: ProbeFn<T, E>,
    slot: Arc<SharedResultSlot<T>>,
}

impl<T, E> Search<T, E> {
    pub(crate) fn new(
        probe: impl Fn(usize) -> Result<Option<T>, E> + Send + Sync + 'static,
        slot: Arc<SharedResultSlot<T>>,
    ) -> Self {
        Self {
            probe: Box::new(probe),
            slot,
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> Strategy for Search<T, E> {
    // Search nodes carry no partial results: a completed subtree found nothing.
    type Output = ();
    type Error = E;
    type Links = ChainLinks<()>;

    fn root_links(&self) -> ChainLinks<()> {
        ChainLinks::new()
    }

    fn compute(&self, ctx: &Arc<Context<Self>>, node: &Arc<Node<Self>>) {
        let Some(segment) = fan_out(ctx, node) else {
            node.abandon(NodeStatus::Cancelled);
            release(ctx, node);
            return;
        };

        for index in segment {
            if ctx.should_stop() {
                node.abandon(NodeStatus::Cancelled);
                release(ctx, node);
                return;
            }
            match (self.probe)(index) {
                Ok(None) => (),
                Ok(Some(value)) => {
                    if self.slot.try_claim(value) {
                        ctx.abort(AbortReason::Claimed);
                    }
                    node.abandon(NodeStatus::Cancelled);
                    release(ctx, node);
                    return;
                }
                Err(error) => {
                    node.abandon(NodeStatus::Failed);
                    ctx.fail(index, error);
                    release(ctx, node);
                    return;
                }
            }
        }

        let _ = node.result().set(());
        release(ctx, node);
    }

    fn reduce(&self, node: &Node<Self>, _caller: Option<&Node<Self>>) -> NodeStatus {
        let mut status = if node.result().take().is_some() {
            NodeStatus::Completed
        } else {
            NodeStatus::Cancelled
        };
        for child in node.links.take_forks() {
            status = status.merge(child.status());
        }

        if self.slot.is_claimed() {
            return status.merge(NodeStatus::Cancelled);
        }
        if status == NodeStatus::Completed {
            let _ = node.result().set(());
        }
        status
    }
}
