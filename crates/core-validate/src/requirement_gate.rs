//! Stock validator gating destinations behind requirement tags.
//!
//! A node may carry opaque requirement tags; the gate holds the set of tags
//! currently granted (shared, mutable from anywhere via `GrantSet`) and
//! redirects navigation at a node with an unsatisfied tag through a
//! designated acquisition route (typically a login screen). Once every tag
//! on the node is granted the gate votes `Valid` and the original intent
//! proceeds.

use crate::{ValidationResult, Validator};
use core_intent::{Intent, NavOptions, Sender, priority};
use core_route::{Node, Route, RouteKey};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared grant state. Clones address the same underlying set.
#[derive(Clone, Default)]
pub struct GrantSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, tag: impl Into<String>) {
        self.inner.write().expect("grant set poisoned").insert(tag.into());
    }

    pub fn revoke(&self, tag: &str) {
        self.inner.write().expect("grant set poisoned").remove(tag);
    }

    pub fn has(&self, tag: &str) -> bool {
        self.inner.read().expect("grant set poisoned").contains(tag)
    }
}

pub struct RequirementGate {
    grants: GrantSet,
    acquisition_route: Route,
    chain_priority: i32,
    priority: i32,
}

impl RequirementGate {
    pub fn new(acquisition_route: Route, grants: GrantSet) -> Self {
        Self {
            grants,
            acquisition_route,
            chain_priority: priority::SYSTEM_HIGH,
            priority: 0,
        }
    }

    /// Priority stamped on the redirect prefix intent.
    pub fn with_chain_priority(mut self, chain_priority: i32) -> Self {
        self.chain_priority = chain_priority;
        self
    }

    /// Scan position of this gate within the composite.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn acquisition_key(&self) -> RouteKey {
        self.acquisition_route.key()
    }

    fn first_unsatisfied(&self, node: &Node) -> Option<String> {
        node.requirements()
            .iter()
            .find(|req| !self.grants.has(req.tag()))
            .map(|req| req.tag().to_string())
    }
}

#[async_trait::async_trait]
impl Validator for RequirementGate {
    fn name(&self) -> &'static str {
        "requirement_gate"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn validate(
        &self,
        intent: &Intent,
        node: &Node,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<ValidationResult> {
        // The acquisition screen itself is always reachable, otherwise the
        // redirect could never drain.
        if node.route_key() == self.acquisition_key() {
            return Ok(ValidationResult::Valid);
        }

        match self.first_unsatisfied(node) {
            None => Ok(ValidationResult::Valid),
            Some(tag) => {
                debug!(
                    target: "validate",
                    node = %node.route_key(),
                    requirement = tag.as_str(),
                    "requirement_unsatisfied"
                );
                Ok(ValidationResult::Redirect {
                    original: intent.clone(),
                    chain: vec![Intent::NavigateTo {
                        route: self.acquisition_route.clone(),
                        options: NavOptions::push() | NavOptions::SINGLE_TOP,
                        sender: Sender::System,
                        priority: self.chain_priority,
                    }],
                })
            }
        }
    }
}
