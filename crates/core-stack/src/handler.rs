//! Current-node ownership on top of the back-stack.
//!
//! The handler is the only mutator of the stack and the only publisher of
//! the current-node cell. It is driven exclusively from the choreographer's
//! serial dispatch task, so methods take `&mut self` and stay synchronous.
//! Observers subscribe through `current()`: a watch cell with latest-value
//! semantics (equal consecutive publishes may coalesce, which the contract
//! permits).
//!
//! Self-healing: the retained tier must never end up empty. `pop` on a
//! bottomed-out stack republishes the root; `pop_until` with no matching
//! entry rebuilds the stack as `[root]`. Callers treat both as benign.

use crate::{BackStack, StackError};
use core_intent::NavOptions;
use core_route::{Graph, Node, RouteKey};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct StateHandler {
    stack: BackStack,
    graph: Arc<Graph>,
    current_tx: watch::Sender<Arc<Node>>,
}

impl StateHandler {
    /// Construct with the graph root pushed and published as the initial
    /// current node.
    pub fn new(graph: Arc<Graph>) -> Self {
        let root = graph.root_node().clone();
        let mut stack = BackStack::new();
        stack.add(root.clone(), NavOptions::push());
        let (current_tx, _) = watch::channel(root);
        Self {
            stack,
            graph,
            current_tx,
        }
    }

    /// Subscribe to current-node changes. The receiver starts at the latest
    /// value.
    pub fn current(&self) -> watch::Receiver<Arc<Node>> {
        self.current_tx.subscribe()
    }

    /// Snapshot of the node currently on top.
    pub fn current_node(&self) -> Arc<Node> {
        self.current_tx.borrow().clone()
    }

    pub fn depth(&self) -> usize {
        self.stack.size()
    }

    /// Push `node` under `options` and publish it. Returns whether the
    /// stack actually changed (`false` when singleTop suppressed the push);
    /// the node is published either way, the cell coalesces the no-op.
    pub fn append(&mut self, node: Arc<Node>, options: NavOptions) -> bool {
        let changed = self.stack.add(node.clone(), options);
        debug!(
            target: "stack",
            key = %node.route_key(),
            changed,
            depth = self.stack.size(),
            "append"
        );
        self.publish(node);
        changed
    }

    /// Pop the effective top and publish the new current node. A bottomed-
    /// out stack heals to `[root]`.
    pub fn pop(&mut self) -> Arc<Node> {
        match self.stack.pop() {
            Ok(entry) => {
                debug!(target: "stack", key = %entry.node.route_key(), depth = self.stack.size(), "pop");
                self.publish(entry.node.clone());
                entry.node
            }
            Err(StackError::EmptyStack) | Err(StackError::NoMatch) => {
                debug!(target: "stack", "pop_on_root");
                self.reset_to_root()
            }
        }
    }

    /// Pop retained entries until `key` tops the stack (the matched entry is
    /// kept). `NoMatch` recovers by rebuilding `[root]` and publishing the
    /// root. Returns `false` only for the empty-on-entry case, which
    /// publishes nothing.
    pub fn pop_until(&mut self, key: RouteKey) -> bool {
        match self
            .stack
            .pop_until(|entry| entry.node.route_key() == key, false)
        {
            Ok(()) => {
                let top = self
                    .stack
                    .last()
                    .map(|e| e.node.clone())
                    .unwrap_or_else(|| self.graph.root_node().clone());
                debug!(target: "stack", key = %key, depth = self.stack.size(), "pop_until");
                self.publish(top);
                true
            }
            Err(StackError::NoMatch) => {
                warn!(target: "stack", key = %key, "pop_until_no_match");
                self.reset_to_root();
                true
            }
            Err(StackError::EmptyStack) => {
                warn!(target: "stack", key = %key, "pop_until_on_empty");
                false
            }
        }
    }

    /// Drop everything, push the root, publish it.
    pub fn clear(&mut self) {
        debug!(target: "stack", "clear");
        self.reset_to_root();
    }

    fn reset_to_root(&mut self) -> Arc<Node> {
        let root = self.graph.root_node().clone();
        self.stack.clear();
        self.stack.add(root.clone(), NavOptions::push());
        self.publish(root.clone());
        root
    }

    fn publish(&self, node: Arc<Node>) {
        // send_replace never fails; observers may come and go freely.
        self.current_tx.send_replace(node);
    }
}
