// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Balanced sibling reduction: each node splits into two halves, and the
//! child finishing second merges both.

use super::context::{fork, release, run_node, Context, Node, Strategy};
use super::map_reduce::MapReduce;
use super::node::{NodeStatus, TaskNode};
use crate::macros::log_error;
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// Position of a node relative to its sibling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Root,
    Left,
    Right,
}

type SiblingNode<T> = TaskNode<T, SiblingLinks<T>>;

pub(crate) struct SiblingLinks<T> {
    side: Side,
    /// Set once both halves of a split exist.
    sibling: OnceLock<Weak<SiblingNode<T>>>,
    /// Owning links to the two halves, until they are merged.
    children: Mutex<Option<[Arc<SiblingNode<T>>; 2]>>,
}

impl<T> SiblingLinks<T> {
    fn new(side: Side) -> Self {
        Self {
            side,
            sibling: OnceLock::new(),
            children: Mutex::new(None),
        }
    }

    fn sibling(&self) -> Option<Arc<SiblingNode<T>>> {
        self.sibling.get().and_then(Weak::upgrade)
    }
}

pub(crate) struct Balanced<T, E> {
    map: MapReduce<T, E>,
}

impl<T, E> Balanced<T, E> {
    pub(crate) fn new(map: MapReduce<T, E>) -> Self {
        Self { map }
    }
}

impl<T: Send + 'static, E: Send + 'static> Strategy for Balanced<T, E> {
    type Output = T;
    type Error = E;
    type Links = SiblingLinks<T>;

    fn root_links(&self) -> SiblingLinks<T> {
        SiblingLinks::new(Side::Root)
    }

    fn compute(&self, ctx: &Arc<Context<Self>>, node: &Arc<Node<Self>>) {
        let range = node.range();
        if ctx.should_split(range.len()) {
            let mid = range.start + range.len() / 2;
            let left = Arc::new(TaskNode::child(
                node,
                range.start..mid,
                SiblingLinks::new(Side::Left),
            ));
            let right = Arc::new(TaskNode::child(
                node,
                mid..range.end,
                SiblingLinks::new(Side::Right),
            ));
            let _ = left.links.sibling.set(Arc::downgrade(&right));
            let _ = right.links.sibling.set(Arc::downgrade(&left));
            *node.links.children.lock().unwrap() = Some([left.clone(), right.clone()]);

            // The own hold is released right away: the second child to finish
            // finalizes this node.
            node.pending().add(2);
            release(ctx, node);

            fork(ctx, right);
            run_node(ctx, &left);
        } else {
            match self.map.fold(range) {
                Ok(Some(value)) => {
                    let _ = node.result().set(value);
                }
                Ok(None) => (),
                Err((index, error)) => {
                    node.abandon(NodeStatus::Failed);
                    ctx.fail(index, error);
                }
            }
            release(ctx, node);
        }
    }

    fn reduce(&self, node: &Node<Self>, caller: Option<&Node<Self>>) -> NodeStatus {
        let Some(child) = caller else {
            return if node.result().is_set() {
                NodeStatus::Completed
            } else {
                NodeStatus::Cancelled
            };
        };

        // Keeps both halves alive until the end of the merge, then drops them.
        let _children = node.links.children.lock().unwrap().take();
        let Some(sibling) = child.links.sibling() else {
            log_error!("Node {:?} lost its sibling", child.range());
            return NodeStatus::Failed;
        };

        let status = child.status().merge(sibling.status());
        if status != NodeStatus::Completed {
            return status;
        }

        let (left, right) = match child.links.side {
            Side::Left => (child, sibling.as_ref()),
            Side::Right | Side::Root => (sibling.as_ref(), child),
        };
        match (left.result().take(), right.result().take()) {
            (Some(left), Some(right)) => {
                let _ = node.result().set(self.map.combine(left, right));
                NodeStatus::Completed
            }
            _ => NodeStatus::Cancelled,
        }
    }
}
