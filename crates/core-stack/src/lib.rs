//! Two-tier navigation history.
//!
//! The back-stack keeps two ordered sequences: `retained` (real history,
//! never empty once initialised) and `non_retained` (transient entries that
//! any pop wipes before retained is touched). The current node is always the
//! top of the effective stack: last non-retained entry when that tier is
//! occupied, else last retained entry.
//!
//! Mutation discipline: only the `StateHandler` (in `handler`) mutates a
//! stack, and the handler is only driven from the choreographer's serial
//! dispatch task, so no interior locking is needed here. External observers
//! read through the handler's watch cell.

use core_intent::NavOptions;
use core_route::{Node, RouteKey};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

pub mod handler;
pub use handler::StateHandler;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    #[error("back-stack is empty")]
    EmptyStack,
    #[error("no entry matched the predicate")]
    NoMatch,
}

/// One stack slot: the node plus the options it was pushed under. Options
/// are kept so later inspection (and the singleTop invariant) can reason
/// about how an entry arrived.
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub node: Arc<Node>,
    pub options: NavOptions,
}

#[derive(Debug, Default)]
pub struct BackStack {
    retained: Vec<StackEntry>,
    non_retained: Vec<StackEntry>,
}

impl BackStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `node` according to `options`.
    ///
    /// Returns `false` when the singleTop rule suppressed the push (the node
    /// already tops the target tier), `true` otherwise.
    pub fn add(&mut self, node: Arc<Node>, options: NavOptions) -> bool {
        if options.clear_back_stack() {
            self.retained.clear();
            self.non_retained.clear();
        }

        let entry = StackEntry {
            node: node.clone(),
            options,
        };

        if options.add_to_back_stack() {
            // Retained push collapses the transient tier first.
            self.non_retained.clear();
            if options.single_top() && self.tops_with(&self.retained, node.route_key()) {
                trace!(target: "stack", key = %node.route_key(), "single_top_suppressed");
                return false;
            }
            self.retained.push(entry);
        } else {
            if options.single_top() && self.current_key() == Some(node.route_key()) {
                trace!(target: "stack", key = %node.route_key(), "single_top_suppressed");
                return false;
            }
            self.non_retained.push(entry);
        }
        true
    }

    /// Pop the effective top. A non-empty transient tier is dropped whole
    /// and the retained top becomes current; otherwise one retained entry is
    /// removed. Fails with `EmptyStack` when the operation would leave no
    /// retained entry to become current.
    pub fn pop(&mut self) -> Result<StackEntry, StackError> {
        if !self.non_retained.is_empty() {
            self.non_retained.clear();
            return self.retained.last().cloned().ok_or(StackError::EmptyStack);
        }
        if self.retained.len() <= 1 {
            return Err(StackError::EmptyStack);
        }
        self.retained.pop();
        self.retained.last().cloned().ok_or(StackError::EmptyStack)
    }

    /// Clear the transient tier, then pop retained entries until `pred`
    /// matches. With `inclusive = false` the matched entry is reinstated as
    /// the new top. `NoMatch` leaves retained empty (caller recovers);
    /// `EmptyStack` is returned when retained was empty on entry.
    pub fn pop_until<P>(&mut self, pred: P, inclusive: bool) -> Result<(), StackError>
    where
        P: Fn(&StackEntry) -> bool,
    {
        if self.retained.is_empty() {
            return Err(StackError::EmptyStack);
        }
        self.non_retained.clear();
        while let Some(entry) = self.retained.pop() {
            if pred(&entry) {
                if !inclusive {
                    self.retained.push(entry);
                }
                return Ok(());
            }
        }
        Err(StackError::NoMatch)
    }

    /// Effective top of the stack.
    pub fn last(&self) -> Option<&StackEntry> {
        self.non_retained.last().or_else(|| self.retained.last())
    }

    pub fn clear(&mut self) {
        self.retained.clear();
        self.non_retained.clear();
    }

    pub fn size(&self) -> usize {
        self.retained.len() + self.non_retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty() && self.non_retained.is_empty()
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    pub fn non_retained_len(&self) -> usize {
        self.non_retained.len()
    }

    fn current_key(&self) -> Option<RouteKey> {
        self.last().map(|e| e.node.route_key())
    }

    fn tops_with(&self, tier: &[StackEntry], key: RouteKey) -> bool {
        tier.last().is_some_and(|e| e.node.route_key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node(key: u32) -> Arc<Node> {
        Arc::new(Node::new(RouteKey(key), format!("n{key}")))
    }

    fn keys(stack: &BackStack) -> (Vec<u32>, Vec<u32>) {
        (
            stack.retained.iter().map(|e| e.node.route_key().0).collect(),
            stack
                .non_retained
                .iter()
                .map(|e| e.node.route_key().0)
                .collect(),
        )
    }

    #[test]
    fn retained_push_clears_transient_tier() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        s.add(node(1), NavOptions::empty());
        s.add(node(2), NavOptions::empty());
        assert_eq!(keys(&s), (vec![0], vec![1, 2]));

        s.add(node(3), NavOptions::push());
        assert_eq!(keys(&s), (vec![0, 3], vec![]));
    }

    #[test]
    fn single_top_suppresses_consecutive_duplicate() {
        let mut s = BackStack::new();
        let opts = NavOptions::push() | NavOptions::SINGLE_TOP;
        assert!(s.add(node(0), opts));
        assert!(s.add(node(1), opts));
        assert!(!s.add(node(1), opts));
        assert_eq!(s.size(), 2);
        // Non-consecutive duplicates are allowed.
        assert!(s.add(node(0), opts));
        assert_eq!(keys(&s).0, vec![0, 1, 0]);
    }

    #[test]
    fn single_top_on_transient_tier_checks_effective_top() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        let opts = NavOptions::SINGLE_TOP;
        assert!(!s.add(node(0), opts), "effective top is already node 0");
        assert!(s.add(node(1), opts));
        assert!(!s.add(node(1), opts));
        assert_eq!(keys(&s), (vec![0], vec![1]));
    }

    #[test]
    fn clear_back_stack_option_drops_both_tiers() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        s.add(node(1), NavOptions::empty());
        s.add(node(2), NavOptions::push() | NavOptions::CLEAR_BACK_STACK);
        assert_eq!(keys(&s), (vec![2], vec![]));
    }

    #[test]
    fn pop_drops_transient_tier_whole() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        s.add(node(1), NavOptions::push());
        s.add(node(2), NavOptions::empty());
        s.add(node(3), NavOptions::empty());

        let top = s.pop().unwrap();
        assert_eq!(top.node.route_key(), RouteKey(1));
        assert_eq!(keys(&s), (vec![0, 1], vec![]));
    }

    #[test]
    fn pop_refuses_to_empty_retained() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        assert!(matches!(s.pop(), Err(StackError::EmptyStack)));
        // The sole entry survives the failed pop.
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn pop_until_exclusive_reinstates_match() {
        let mut s = BackStack::new();
        for k in 0..4 {
            s.add(node(k), NavOptions::push());
        }
        s.add(node(9), NavOptions::empty());

        s.pop_until(|e| e.node.route_key() == RouteKey(1), false)
            .unwrap();
        assert_eq!(keys(&s), (vec![0, 1], vec![]));
    }

    #[test]
    fn pop_until_inclusive_removes_match() {
        let mut s = BackStack::new();
        for k in 0..4 {
            s.add(node(k), NavOptions::push());
        }
        s.pop_until(|e| e.node.route_key() == RouteKey(1), true)
            .unwrap();
        assert_eq!(keys(&s).0, vec![0]);
    }

    #[test]
    fn pop_until_no_match_empties_retained() {
        let mut s = BackStack::new();
        for k in 0..3 {
            s.add(node(k), NavOptions::push());
        }
        assert_eq!(
            s.pop_until(|e| e.node.route_key() == RouteKey(42), false),
            Err(StackError::NoMatch)
        );
        assert!(s.is_empty());
    }

    #[test]
    fn pop_until_on_empty_stack() {
        let mut s = BackStack::new();
        assert_eq!(
            s.pop_until(|_| true, false),
            Err(StackError::EmptyStack)
        );
    }

    #[test]
    fn last_prefers_transient_tier() {
        let mut s = BackStack::new();
        s.add(node(0), NavOptions::push());
        assert_eq!(s.last().unwrap().node.route_key(), RouteKey(0));
        s.add(node(1), NavOptions::empty());
        assert_eq!(s.last().unwrap().node.route_key(), RouteKey(1));
    }
}
