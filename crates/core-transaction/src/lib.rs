//! Redirect-chain sequencing.
//!
//! When validation answers `Redirect`, the prefix intents plus the original
//! become a `Transaction`. At most one transaction is active at a time; a
//! second `apply` while prefixes are still pending fails with
//! `TransactionInProgress` (fail-on-active, never silent overwrite). The
//! choreographer steps the chain with `next()`: each call hands out the next
//! pending prefix, and the exhausted iterator consumes the transaction and
//! surrenders the original for direct execution.
//!
//! All mutating methods are guarded by one internal mutex; the "at most one
//! active transaction" invariant is enforced inside the lock, so handles can
//! be shared across tasks even though in practice only the serial dispatch
//! task drives them.

use core_intent::Intent;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("a transaction with pending intents is already active")]
    TransactionInProgress,
    #[error("no transaction installed")]
    NoTransaction,
    #[error("transaction state inconsistent; reset")]
    InvalidState,
}

/// A redirect chain (ordered by descending priority) plus the intent that
/// triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    required: Vec<Intent>,
    original: Intent,
}

impl Transaction {
    pub fn new(required: Vec<Intent>, original: Intent) -> Self {
        Self { required, original }
    }

    pub fn required(&self) -> &[Intent] {
        &self.required
    }

    pub fn original(&self) -> &Intent {
        &self.original
    }
}

/// One step of the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Another prefix intent must complete first.
    Continue(Intent),
    /// The chain is drained; execute the original directly.
    BackToOriginal(Intent),
}

#[derive(Debug, Default)]
struct TxState {
    txn: Option<TxProgress>,
    current: Option<Intent>,
}

#[derive(Debug)]
struct TxProgress {
    required: Vec<Intent>,
    cursor: usize,
    original: Intent,
}

#[derive(Debug, Default)]
pub struct TransactionManager {
    state: Mutex<TxState>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `t`. Fails with `TransactionInProgress` while a prior
    /// transaction still has pending prefixes; the prior transaction wins.
    pub fn apply(&self, t: Transaction) -> Result<(), TransactionError> {
        let mut state = self.lock();
        if let Some(progress) = &state.txn
            && progress.cursor < progress.required.len()
        {
            return Err(TransactionError::TransactionInProgress);
        }
        debug!(
            target: "transaction",
            prefixes = t.required.len(),
            original = t.original.kind(),
            "apply"
        );
        state.txn = Some(TxProgress {
            required: t.required,
            cursor: 0,
            original: t.original,
        });
        state.current = None;
        Ok(())
    }

    /// Advance the chain. The exhausted iterator consumes the manager:
    /// the transaction slot empties and the original becomes `current`.
    pub fn next(&self) -> Result<Step, TransactionError> {
        let mut state = self.lock();
        let Some(progress) = state.txn.as_mut() else {
            return Err(TransactionError::NoTransaction);
        };

        if progress.cursor > progress.required.len() {
            // Unreachable through the public API; a corrupted cursor means a
            // bug somewhere, so reset and surface once.
            error!(
                target: "transaction",
                cursor = progress.cursor,
                required = progress.required.len(),
                "inconsistent_state_reset"
            );
            *state = TxState::default();
            return Err(TransactionError::InvalidState);
        }

        if progress.cursor < progress.required.len() {
            let intent = progress.required[progress.cursor].clone();
            progress.cursor += 1;
            debug!(
                target: "transaction",
                step = progress.cursor,
                of = progress.required.len(),
                intent = intent.kind(),
                "continue"
            );
            state.current = Some(intent.clone());
            return Ok(Step::Continue(intent));
        }

        let original = progress.original.clone();
        debug!(target: "transaction", original = original.kind(), "back_to_original");
        state.txn = None;
        state.current = Some(original.clone());
        Ok(Step::BackToOriginal(original))
    }

    /// Intent most recently handed out by `next()`.
    pub fn current(&self) -> Option<Intent> {
        self.lock().current.clone()
    }

    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.txn.is_some() || state.current.is_some() {
            debug!(target: "transaction", "cancel");
        }
        *state = TxState::default();
    }

    /// True while an installed transaction still has pending prefixes.
    pub fn active(&self) -> bool {
        self.lock()
            .txn
            .as_ref()
            .is_some_and(|p| p.cursor < p.required.len())
    }

    /// True while any transaction is installed, drained or not.
    pub fn installed(&self) -> bool {
        self.lock().txn.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxState> {
        self.state.lock().expect("transaction state poisoned")
    }
}
