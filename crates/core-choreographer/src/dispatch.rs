//! Serial dispatch of admitted intents.
//!
//! The worker owns every mutable collaborator (state handler, validator
//! chain, transaction manager, debounce gate) and is driven by exactly one
//! task, so all side effects of one intent complete before the next is
//! pulled. Suspension happens only at validator evaluation, local-source
//! injection, and nowhere else; the command broadcast never suspends.
//!
//! Commands are emitted only for validated intents, with two sanctioned
//! bypasses: the final `BackToOriginal` command of a drained transaction
//! (its prefixes were validated on the way in), and the synthesized
//! error dialog, which re-enters the pipeline and is validated like any
//! other intent.

use crate::ChoreoError;
use crate::debounce::DebounceGate;
use core_config::PipelineConfig;
use core_intent::{
    COMMANDS_EMITTED, Command, DISPATCH_ERRORS, DISPATCH_RETRIES, ERROR_DIALOGS_INJECTED,
    INTENTS_DEBOUNCED, Intent, IntentObserver, LOCAL_SOURCE_DROPS, Overlay, Sender, count,
    priority,
};
use core_route::{Graph, Node, Route};
use core_stack::StateHandler;
use core_transaction::{Step, Transaction, TransactionError, TransactionManager};
use core_validate::{ValidationResult, ValidatorChain};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Worker {
    pub(crate) graph: Arc<Graph>,
    pub(crate) state: StateHandler,
    pub(crate) chain: ValidatorChain,
    pub(crate) transactions: TransactionManager,
    pub(crate) config: PipelineConfig,
    pub(crate) cancel: CancellationToken,
    pub(crate) command_tx: broadcast::Sender<Command>,
    pub(crate) local_tx: mpsc::Sender<Intent>,
    pub(crate) local_rx: mpsc::Receiver<Intent>,
    pub(crate) merge_rx: mpsc::Receiver<Intent>,
    pub(crate) debounce: DebounceGate,
    pub(crate) observers: Vec<Box<dyn IntentObserver>>,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        info!(
            target: "choreo",
            debounce_ms = self.debounce.window().as_millis() as u64,
            max_retries = self.config.max_intent_retries,
            "pipeline_started"
        );

        loop {
            let intent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                // Locally injected intents (transaction prefixes, error
                // dialogs) re-enter ahead of fresh actor traffic.
                Some(intent) = self.local_rx.recv() => intent,
                maybe = self.merge_rx.recv() => match maybe {
                    Some(intent) => intent,
                    None => break,
                },
            };

            if !self.debounce.admit(&intent, Instant::now()) {
                count(&INTENTS_DEBOUNCED);
                trace!(target: "choreo.dispatch", kind = intent.kind(), "debounced");
                continue;
            }

            self.dispatch_with_retry(intent).await;
        }

        info!(target: "choreo", "pipeline_stopped");
    }

    /// Dispatch one intent, retrying invalid-state failures up to the
    /// configured cap. Any other error terminates dispatch of this intent
    /// only; the pipeline keeps running.
    async fn dispatch_with_retry(&mut self, intent: Intent) {
        // Notify observers (pre-dispatch).
        for obs in &self.observers {
            obs.on_intent(&intent);
        }

        let mut attempts: u32 = 0;
        loop {
            match self.dispatch(&intent).await {
                Ok(()) => return,
                Err(err) if err.is_invalid_state() && attempts < self.config.max_intent_retries => {
                    attempts += 1;
                    count(&DISPATCH_RETRIES);
                    warn!(
                        target: "choreo.dispatch",
                        kind = intent.kind(),
                        attempt = attempts,
                        %err,
                        "invalid_state_retry"
                    );
                }
                Err(err) => {
                    count(&DISPATCH_ERRORS);
                    error!(
                        target: "choreo.dispatch",
                        kind = intent.kind(),
                        sender = intent.sender().as_str(),
                        %err,
                        "intent_dropped"
                    );
                    return;
                }
            }
        }
    }

    async fn dispatch(&mut self, intent: &Intent) -> Result<(), ChoreoError> {
        trace!(
            target: "choreo.dispatch",
            kind = intent.kind(),
            sender = intent.sender().as_str(),
            priority = intent.priority(),
            "dispatch"
        );

        match intent {
            Intent::NavigateTo { route, .. } => {
                let node = self.resolve(route)?;
                let verdict = self.chain.evaluate(intent, &node, &self.cancel).await;
                self.apply_verdict(intent, verdict).await
            }
            Intent::PopUpTo { route, .. } => {
                if !self.state.pop_until(route.key()) {
                    // Empty stack: nothing to validate, nothing to emit.
                    return Ok(());
                }
                let node = self.state.current_node();
                let verdict = self.chain.evaluate(intent, &node, &self.cancel).await;
                self.apply_verdict(intent, verdict).await
            }
            Intent::Back { .. } => {
                self.state.pop();
                // A pending redirect chain belongs to a navigation the user
                // just walked away from.
                self.transactions.cancel();
                let node = self.state.current_node();
                let verdict = self.chain.evaluate(intent, &node, &self.cancel).await;
                self.apply_verdict(intent, verdict).await
            }
            Intent::ClearBackStack { .. } | Intent::InteractionTimeout { .. } => {
                self.state.clear();
                self.transactions.cancel();
                let node = self.state.current_node();
                let verdict = self.chain.evaluate(intent, &node, &self.cancel).await;
                self.apply_verdict(intent, verdict).await
            }
            Intent::DisplayDialog { .. } | Intent::DismissOverlay { .. } => {
                let node = self.state.current_node();
                let verdict = self.chain.evaluate(intent, &node, &self.cancel).await;
                self.apply_verdict(intent, verdict).await
            }
            Intent::CompleteNavTransaction { route } => self.complete_transaction(route).await,
        }
    }

    /// Apply a validation verdict: mutate state for a valid navigate,
    /// reject with an injected error dialog, install redirect transactions,
    /// drop ignores.
    async fn apply_verdict(
        &mut self,
        intent: &Intent,
        verdict: ValidationResult,
    ) -> Result<(), ChoreoError> {
        match verdict {
            ValidationResult::Valid => {
                if let Intent::NavigateTo { route, options, .. } = intent {
                    let node = self.resolve(route)?;
                    self.state.append(node, *options);
                }
                self.emit(intent.command());
                Ok(())
            }
            ValidationResult::Invalid(message) => {
                warn!(
                    target: "choreo.dispatch",
                    kind = intent.kind(),
                    message = message.as_str(),
                    "intent_rejected"
                );
                self.inject_error_dialog(message);
                Ok(())
            }
            ValidationResult::Redirect { original, chain } => {
                debug!(
                    target: "choreo.dispatch",
                    kind = intent.kind(),
                    prefixes = chain.len(),
                    "redirected"
                );
                // A superseded transaction never survives a fresh redirect.
                self.transactions.cancel();
                self.transactions.apply(Transaction::new(chain, original))?;
                self.advance_transaction().await
            }
            ValidationResult::Ignore => {
                trace!(target: "choreo.dispatch", kind = intent.kind(), "ignored");
                Ok(())
            }
        }
    }

    /// Step the active transaction: hand the next prefix back into the
    /// pipeline, or execute the original once the chain is drained.
    async fn advance_transaction(&mut self) -> Result<(), ChoreoError> {
        match self.transactions.next() {
            Ok(Step::Continue(next)) => {
                self.inject_local(next).await;
                Ok(())
            }
            Ok(Step::BackToOriginal(original)) => self.finish_original(original).await,
            Err(err) => {
                self.transactions.cancel();
                warn!(target: "choreo.dispatch", %err, "transaction_step_failed");
                Err(err.into())
            }
        }
    }

    async fn complete_transaction(&mut self, route: &Route) -> Result<(), ChoreoError> {
        if !self.transactions.installed() {
            // Completion for a transaction that no longer exists (cancelled
            // by a destructive intent, or never installed).
            return Err(TransactionError::NoTransaction.into());
        }
        if let Some(current) = self.transactions.current()
            && let Intent::NavigateTo { route: expected, .. } = &current
            && expected.key() != route.key()
        {
            debug!(
                target: "choreo.dispatch",
                expected = %expected.key(),
                got = %route.key(),
                "transaction_completion_route_mismatch"
            );
        }
        self.advance_transaction().await
    }

    /// Execute a drained transaction's original intent. A navigate original
    /// mutates the stack directly (its validation already happened when the
    /// redirect was issued) and every original emits its command form.
    async fn finish_original(&mut self, original: Intent) -> Result<(), ChoreoError> {
        if let Intent::NavigateTo { route, options, .. } = &original {
            let node = self.resolve(route)?;
            self.state.append(node, *options);
        }
        self.emit(original.command());
        Ok(())
    }

    fn resolve(&self, route: &Route) -> Result<Arc<Node>, ChoreoError> {
        self.graph
            .lookup(route.key())
            .cloned()
            .ok_or(ChoreoError::RouteNotInGraph(route.key()))
    }

    /// Synthesize the user-visible rejection dialog and feed it back through
    /// the normal pipeline. Error path: drop-if-full rather than suspend, so
    /// a rejected-intent storm cannot deadlock dispatch against its own
    /// queue.
    fn inject_error_dialog(&mut self, message: String) {
        let dialog = Intent::DisplayDialog {
            overlay: Overlay::error(message),
            sender: Sender::System,
            priority: priority::SYSTEM_DEFAULT,
            dismiss_id: None,
        };
        match self.local_tx.try_send(dialog) {
            Ok(()) => count(&ERROR_DIALOGS_INJECTED),
            Err(mpsc::error::TrySendError::Full(_)) => {
                count(&LOCAL_SOURCE_DROPS);
                warn!(target: "choreo.dispatch", "error_dialog_dropped_queue_full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Primary local injection (transaction prefixes): bounded, suspending.
    async fn inject_local(&mut self, intent: Intent) {
        debug!(
            target: "choreo.dispatch",
            kind = intent.kind(),
            "inject_local"
        );
        if self.local_tx.send(intent).await.is_err() {
            warn!(target: "choreo.dispatch", "local_source_closed");
        }
    }

    fn emit(&self, command: Option<Command>) {
        let Some(command) = command else { return };
        count(&COMMANDS_EMITTED);
        debug!(target: "choreo.command", kind = command.kind(), "emit");
        for obs in &self.observers {
            obs.on_command(&command);
        }
        // Err means no live subscribers, which is legal: commands are a
        // broadcast, not a contract that someone listens.
        if self.command_tx.send(command).is_err() {
            trace!(target: "choreo.command", "no_subscribers");
        }
    }
}
