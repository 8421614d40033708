//! Composable per-intent policy.
//!
//! A `Validator` inspects `(intent, prospective current node)` and votes:
//! pass (`Valid`), drop silently (`Ignore`), reject with a user-visible
//! message (`Invalid`), or demand a prefix of other intents first
//! (`Redirect`). The `ValidatorChain` composite runs its children in
//! ascending priority order (lower numbers first, ties in configured order)
//! and folds their votes:
//!
//! - `Invalid` and `Ignore` short-circuit the scan and win outright.
//! - `Valid` is absorbed; the scan continues.
//! - `Redirect`s are merged: the union of required prefix intents (deduped
//!   structurally) with the most recent `original`; the scan continues so a
//!   later validator can still reject.
//!
//! A merged redirect is re-sorted by *descending* intent priority (stable,
//! so insertion order breaks ties) before it is handed to the transaction
//! manager.
//!
//! Failure containment: a validator returning `Err` is logged and treated
//! as `Invalid("validator error")`; with a watchdog configured, a validator
//! exceeding it yields `Invalid("validator_timeout")`. Neither crashes the
//! pipeline. A cancelled token stops evaluation and yields `Ignore` (the
//! pipeline is being torn down; nothing should be emitted).

use core_intent::Intent;
use core_route::Node;
use smallvec::SmallVec;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub mod requirement_gate;
pub use requirement_gate::{GrantSet, RequirementGate};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Ignore,
    Invalid(String),
    Redirect {
        original: Intent,
        /// Prefix intents, ordered by descending priority once merged.
        chain: Vec<Intent>,
    },
}

impl ValidationResult {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ValidationResult::Valid => "valid",
            ValidationResult::Ignore => "ignore",
            ValidationResult::Invalid(_) => "invalid",
            ValidationResult::Redirect { .. } => "redirect",
        }
    }
}

#[async_trait::async_trait]
pub trait Validator: Send + Sync {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;

    /// Scan position within the chain: lower runs earlier.
    fn priority(&self) -> i32 {
        0
    }

    /// Evaluate one intent against the node that would become current.
    /// Implementations may await external state but must honor `cancel`.
    /// An `Err` is contained by the chain, never propagated.
    async fn validate(
        &self,
        intent: &Intent,
        node: &Node,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ValidationResult>;
}

pub struct ValidatorChain {
    validators: Vec<Box<dyn Validator>>,
    watchdog: Option<Duration>,
}

impl ValidatorChain {
    /// Build the composite. Children are sorted ascending by priority once,
    /// stably, so equal priorities keep the configured order.
    pub fn new(mut validators: Vec<Box<dyn Validator>>) -> Self {
        validators.sort_by_key(|v| v.priority());
        Self {
            validators,
            watchdog: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Abort any single validator call exceeding `limit`, treating the
    /// result as `Invalid("validator_timeout")`.
    pub fn with_watchdog(mut self, limit: Duration) -> Self {
        self.watchdog = Some(limit);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub async fn evaluate(
        &self,
        intent: &Intent,
        node: &Node,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let mut merged: Option<(Intent, SmallVec<[Intent; 4]>)> = None;

        for validator in &self.validators {
            if cancel.is_cancelled() {
                trace!(target: "validate", validator = validator.name(), "cancelled_mid_chain");
                return ValidationResult::Ignore;
            }

            let result = self.run_one(validator.as_ref(), intent, node, cancel).await;
            trace!(
                target: "validate",
                validator = validator.name(),
                intent = intent.kind(),
                result = result.kind(),
                "step"
            );

            match result {
                ValidationResult::Valid => {}
                ValidationResult::Ignore => return ValidationResult::Ignore,
                ValidationResult::Invalid(message) => {
                    return ValidationResult::Invalid(message);
                }
                ValidationResult::Redirect { original, chain } => {
                    let (slot_original, slot_chain) =
                        merged.get_or_insert_with(|| (original.clone(), SmallVec::new()));
                    // Most recent original wins; prefixes union structurally.
                    *slot_original = original;
                    for prefix in chain {
                        if !slot_chain.iter().any(|seen| *seen == prefix) {
                            slot_chain.push(prefix);
                        }
                    }
                }
            }
        }

        match merged {
            Some((original, mut chain)) => {
                // Descending priority; stable sort keeps insertion order on ties.
                chain.sort_by_key(|i| std::cmp::Reverse(i.priority()));
                ValidationResult::Redirect {
                    original,
                    chain: chain.into_vec(),
                }
            }
            None => ValidationResult::Valid,
        }
    }

    async fn run_one(
        &self,
        validator: &dyn Validator,
        intent: &Intent,
        node: &Node,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let outcome = match self.watchdog {
            Some(limit) => {
                match tokio::time::timeout(limit, validator.validate(intent, node, cancel)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(
                            target: "validate",
                            validator = validator.name(),
                            limit_ms = limit.as_millis() as u64,
                            "validator_timeout"
                        );
                        return ValidationResult::invalid("validator_timeout");
                    }
                }
            }
            None => validator.validate(intent, node, cancel).await,
        };

        match outcome {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    target: "validate",
                    validator = validator.name(),
                    %error,
                    "validator_error"
                );
                ValidationResult::invalid("validator error")
            }
        }
    }
}
