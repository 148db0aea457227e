// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Chained fan-out reduction: each node repeatedly forks the upper half of its
//! remaining range, keeping the forks in a linked chain, and computes the rest
//! inline.

use super::context::{fork, release, Context, Node, Strategy};
use super::map_reduce::MapReduce;
use super::node::{NodeStatus, TaskNode};
use std::ops::Range;
use std::sync::{Arc, Mutex};

type ChainNode<T> = TaskNode<T, ChainLinks<T>>;

/// Owning links of a node in a fork chain.
///
/// The head of a node's chain is its most recent fork, and each fork links to
/// the one forked before it, which covers the indices right after its own.
pub(crate) struct ChainLinks<T> {
    next: Option<Arc<ChainNode<T>>>,
    forks: Mutex<Option<Arc<ChainNode<T>>>>,
}

impl<T> ChainLinks<T> {
    pub(crate) fn new() -> Self {
        Self::linked(None)
    }

    fn linked(next: Option<Arc<ChainNode<T>>>) -> Self {
        Self {
            next,
            forks: Mutex::new(None),
        }
    }

    /// Detaches this node's chain of forks, from the most recent one.
    pub(crate) fn take_forks(&self) -> impl Iterator<Item = Arc<ChainNode<T>>> {
        let head = self.forks.lock().unwrap().take();
        std::iter::successors(head, |fork| fork.links.next.clone())
    }
}

/// Splits the given node's range while it is large enough, forking each upper
/// half at the head of the node's chain. Returns the remaining lower part, or
/// `None` if the invocation is stopping.
pub(crate) fn fan_out<S, T>(ctx: &Arc<Context<S>>, node: &Arc<ChainNode<T>>) -> Option<Range<usize>>
where
    S: Strategy<Output = T, Links = ChainLinks<T>>,
{
    let Range { start, mut end } = node.range();
    while ctx.should_split(end - start) {
        if ctx.should_stop() {
            return None;
        }
        let mid = start + (end - start) / 2;
        let child = {
            let mut forks = node.links.forks.lock().unwrap();
            let child = Arc::new(TaskNode::child(
                node,
                mid..end,
                ChainLinks::linked(forks.take()),
            ));
            *forks = Some(child.clone());
            child
        };
        node.pending().add(1);
        fork(ctx, child);
        end = mid;
    }
    Some(start..end)
}

pub(crate) struct Chained<T, E> {
    map: MapReduce<T, E>,
}

impl<T, E> Chained<T, E> {
    pub(crate) fn new(map: MapReduce<T, E>) -> Self {
        Self { map }
    }
}

impl<T: Send + 'static, E: Send + 'static> Strategy for Chained<T, E> {
    type Output = T;
    type Error = E;
    type Links = ChainLinks<T>;

    fn root_links(&self) -> ChainLinks<T> {
        ChainLinks::new()
    }

    fn compute(&self, ctx: &Arc<Context<Self>>, node: &Arc<Node<Self>>) {
        match fan_out(ctx, node) {
            None => {
                node.abandon(NodeStatus::Cancelled);
            }
            Some(segment) => match self.map.fold(segment) {
                Ok(Some(value)) => {
                    let _ = node.result().set(value);
                }
                Ok(None) => (),
                Err((index, error)) => {
                    node.abandon(NodeStatus::Failed);
                    ctx.fail(index, error);
                }
            },
        }
        release(ctx, node);
    }

    fn reduce(&self, node: &Node<Self>, _caller: Option<&Node<Self>>) -> NodeStatus {
        let mut status = NodeStatus::Completed;
        let mut accumulator = node.result().take();
        // Reverse-fork order is left-to-right index order.
        for child in node.links.take_forks() {
            status = status.merge(child.status());
            if status != NodeStatus::Completed {
                continue;
            }
            accumulator = match (accumulator, child.result().take()) {
                (Some(left), Some(right)) => Some(self.map.combine(left, right)),
                (left, right) => left.or(right),
            };
        }

        if status != NodeStatus::Completed {
            return status;
        }
        match accumulator {
            Some(value) => {
                let _ = node.result().set(value);
                NodeStatus::Completed
            }
            None => NodeStatus::Cancelled,
        }
    }
}
