//! Central serialising processor of navigation intents.
//!
//! The choreographer merges every registered intent source plus an internal
//! local source into one serial sequence, applies debounce-distinct
//! admission, validates each admitted intent against the node that would
//! become current, mutates the back-stack through the state handler, and
//! broadcasts the resulting view-layer commands. Redirect verdicts are
//! sequenced through the transaction manager; rejected intents surface as
//! injected error dialogs rather than exceptions.
//!
//! Construction is plain dependency injection: graph, state handler,
//! validator chain, transaction manager, intent-source registry, tunables,
//! and the cancellation token are all passed in. Nothing runs until
//! `initialize()`; repeated initializations are idempotent (the running
//! task is preserved). Nothing escapes the pipeline task except
//! cancellation.

use core_config::PipelineConfig;
use core_intent::{Command, Intent, IntentSourceRegistry};
use core_route::{Graph, Node, RouteKey};
use core_stack::StateHandler;
use core_transaction::{TransactionError, TransactionManager};
use core_validate::ValidatorChain;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

mod debounce;
mod dispatch;
pub use debounce::DebounceGate;
use dispatch::Worker;

#[derive(Debug, Error)]
pub enum ChoreoError {
    #[error("route {0} not present in graph")]
    RouteNotInGraph(RouteKey),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl ChoreoError {
    /// Invalid-state failures are the retryable class.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ChoreoError::Transaction(TransactionError::InvalidState))
    }
}

/// Bits consumed by the pipeline task on first `initialize()`.
struct Boot {
    worker: Worker,
    registry: IntentSourceRegistry,
}

pub struct Choreographer {
    cancel: CancellationToken,
    command_tx: broadcast::Sender<Command>,
    merge_tx: mpsc::Sender<Intent>,
    current_rx: watch::Receiver<Arc<Node>>,
    boot: Mutex<Option<Boot>>,
    task: Mutex<Option<JoinHandle<()>>>,
    source_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Choreographer {
    pub fn new(
        graph: Arc<Graph>,
        state: StateHandler,
        chain: ValidatorChain,
        transactions: TransactionManager,
        registry: IntentSourceRegistry,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, _) = broadcast::channel(config.command_buffer_capacity);
        let (merge_tx, merge_rx) = mpsc::channel(core_intent::INTENT_CHANNEL_CAP);
        let (local_tx, local_rx) = mpsc::channel(config.local_source_capacity);
        let current_rx = state.current();

        let debounce = DebounceGate::new(config.debounce_window);
        let worker = Worker {
            graph,
            state,
            chain,
            transactions,
            config,
            cancel: cancel.clone(),
            command_tx: command_tx.clone(),
            local_tx,
            local_rx,
            merge_rx,
            debounce,
            observers: Vec::new(),
        };

        Self {
            cancel,
            command_tx,
            merge_tx,
            current_rx,
            boot: Mutex::new(Some(Boot { worker, registry })),
            task: Mutex::new(None),
            source_handles: Mutex::new(Vec::new()),
        }
    }

    /// Attach an instrumentation observer. Only effective before the first
    /// `initialize()`; afterwards the worker owns its observer list.
    pub fn add_observer(&self, observer: Box<dyn core_intent::IntentObserver>) {
        match self.boot.lock().expect("boot slot poisoned").as_mut() {
            Some(boot) => boot.worker.observers.push(observer),
            None => warn!(target: "choreo", "observer_after_initialize_ignored"),
        }
    }

    /// Spawn the source tasks and the pipeline task. Idempotent: while the
    /// pipeline task is alive further calls are no-ops.
    pub fn initialize(&self) {
        let mut task = self.task.lock().expect("task slot poisoned");
        if let Some(handle) = task.as_ref()
            && !handle.is_finished()
        {
            debug!(target: "choreo", "already_initialized");
            return;
        }

        let Some(Boot { worker, mut registry }) =
            self.boot.lock().expect("boot slot poisoned").take()
        else {
            // The pipeline already ran and stopped; it cannot be rebuilt
            // from here because the channel ends are gone.
            warn!(target: "choreo", "initialize_after_shutdown_ignored");
            return;
        };

        let handles = registry.spawn_all(&self.merge_tx);
        *self.source_handles.lock().expect("source slot poisoned") = handles;
        *task = Some(tokio::spawn(worker.run()));
        info!(target: "choreo", "initialized");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("task slot poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Subscribe to the command broadcast. Late subscribers see only
    /// commands emitted after subscription; a lagging subscriber observes
    /// `RecvError::Lagged` with the number of commands it missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.command_tx.subscribe()
    }

    /// Latest-value subscription to the current node.
    pub fn current(&self) -> watch::Receiver<Arc<Node>> {
        self.current_rx.clone()
    }

    /// Snapshot of the current node.
    pub fn current_node(&self) -> Arc<Node> {
        self.current_rx.borrow().clone()
    }

    /// Cancel the pipeline and join its tasks, logging each stage. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        info!(target: "runtime.shutdown", stage = "begin", "choreographer_shutdown");
        self.cancel.cancel();

        let task = self.task.lock().expect("task slot poisoned").take();
        if let Some(handle) = task {
            match tokio::time::timeout(Duration::from_millis(500), handle).await {
                Ok(Ok(())) => trace!(target: "runtime.shutdown", "pipeline_task_stopped"),
                Ok(Err(err)) if err.is_cancelled() => {
                    trace!(target: "runtime.shutdown", "pipeline_task_cancelled")
                }
                Ok(Err(err)) => {
                    error!(target: "runtime.shutdown", ?err, "pipeline_task_error")
                }
                Err(_) => warn!(target: "runtime.shutdown", "pipeline_task_timeout"),
            }
        }

        // The worker is gone, so its merge receiver is dropped and every
        // source observes a closed channel on its next send.
        let handles: Vec<JoinHandle<()>> = self
            .source_handles
            .lock()
            .expect("source slot poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            match tokio::time::timeout(Duration::from_millis(200), handle).await {
                Ok(Ok(())) => trace!(target: "runtime.shutdown", "intent_source_stopped"),
                Ok(Err(err)) if err.is_cancelled() => {
                    trace!(target: "runtime.shutdown", "intent_source_cancelled")
                }
                Ok(Err(err)) => {
                    error!(target: "runtime.shutdown", ?err, "intent_source_error")
                }
                Err(_) => warn!(target: "runtime.shutdown", "intent_source_timeout"),
            }
        }

        info!(target: "runtime.shutdown", stage = "complete", "choreographer_shutdown");
    }

    /// Token governing the pipeline and everything it validates or spawns.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
