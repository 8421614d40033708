//! Inactivity timeout actor.
//!
//! Publishes `Intent::InteractionTimeout` after a screen-dependent period of
//! silence. Three pulse inputs are merged in one `select!` loop: user
//! interaction (via `ActivityHandle`), current-node changes (the state
//! handler's watch cell; the initial value does not pulse), and lock-reason
//! changes. Every pulse cancels the pending deadline; a fresh one is armed
//! only when no lock reason is held and the effective timeout is finite.
//! After a fire the timer stays disarmed until the next pulse (in practice
//! the stack clear that follows a timeout republishes the current node and
//! re-arms it).
//!
//! The deadline is not a stored timer object: each loop turn rebuilds the
//! sleep from the latest inputs, so "cancel the pending timer and start a
//! fresh one" falls out of the select shape rather than handle juggling.
//!
//! Locking: `TimerLock` is a clonable handle over a single-slot watch cell,
//! last-write-wins. `acquire`/`release` are idempotent (`send_if_modified`,
//! so re-acquiring with the same reason does not reset a running timer) and
//! callable from any thread.

use core_intent::{Intent, IntentSource, priority};
use core_route::Node;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

// Telemetry (same counter idiom as core-intent).
pub static TIMER_FIRES: AtomicU64 = AtomicU64::new(0); // timeout intents published
pub static TIMER_RESETS: AtomicU64 = AtomicU64::new(0); // pulses that cancelled a pending deadline
pub static TIMER_SUPPRESSED_LOCKED: AtomicU64 = AtomicU64::new(0); // arm attempts skipped by a held lock

/// Point-in-time copy of the timer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerTelemetrySnapshot {
    pub fires: u64,
    pub resets: u64,
    pub suppressed_locked: u64,
}

impl TimerTelemetrySnapshot {
    pub fn capture() -> Self {
        use std::sync::atomic::Ordering::Relaxed;
        Self {
            fires: TIMER_FIRES.load(Relaxed),
            resets: TIMER_RESETS.load(Relaxed),
            suppressed_locked: TIMER_SUPPRESSED_LOCKED.load(Relaxed),
        }
    }
}

/// Interaction pulse capacity. Pulses are edge signals; one queued pulse is
/// as good as many, so overflow drops are silent and harmless.
const ACTIVITY_QUEUE_CAP: usize = 8;

/// Clonable handle poking the timer on any user interaction.
#[derive(Clone)]
pub struct ActivityHandle {
    tx: mpsc::Sender<()>,
}

impl ActivityHandle {
    pub fn pulse(&self) {
        // Full queue already carries a pulse; closed means the timer is gone.
        let _ = self.tx.try_send(());
    }
}

/// Clonable handle over the lock-reason cell. While any reason is held the
/// timer never arms.
#[derive(Clone)]
pub struct TimerLock {
    tx: watch::Sender<Option<String>>,
}

impl TimerLock {
    pub fn acquire(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let modified = self.tx.send_if_modified(|slot| {
            if slot.as_deref() == Some(reason.as_str()) {
                false
            } else {
                *slot = Some(reason.clone());
                true
            }
        });
        if modified {
            info!(target: "timer", reason = reason.as_str(), "lock_acquired");
        }
    }

    pub fn release(&self) {
        let modified = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                *slot = None;
                true
            } else {
                false
            }
        });
        if modified {
            info!(target: "timer", "lock_released");
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_locked(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

pub struct InactivityTimer {
    default_timeout: Duration,
    activity_rx: mpsc::Receiver<()>,
    // Keeps the activity channel open even when every external handle drops.
    _activity_tx: mpsc::Sender<()>,
    node_rx: watch::Receiver<Arc<Node>>,
    lock_rx: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
}

impl InactivityTimer {
    /// Build the actor plus its two external handles. `node_rx` is the state
    /// handler's current-node subscription; its value at construction time
    /// counts as seen and produces no pulse.
    pub fn new(
        node_rx: watch::Receiver<Arc<Node>>,
        default_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Self, ActivityHandle, TimerLock) {
        let (activity_tx, activity_rx) = mpsc::channel(ACTIVITY_QUEUE_CAP);
        let (lock_tx, lock_rx) = watch::channel(None);
        let lock = TimerLock { tx: lock_tx };
        let timer = Self {
            default_timeout,
            activity_rx,
            _activity_tx: activity_tx.clone(),
            node_rx,
            lock_rx,
            cancel,
        };
        (timer, ActivityHandle { tx: activity_tx }, lock)
    }

    /// Timeout to arm right now, or `None` when a lock is held or the
    /// current screen disables timeouts.
    fn effective_timeout(&self) -> Option<Duration> {
        if self.lock_rx.borrow().is_some() {
            core_intent::count(&TIMER_SUPPRESSED_LOCKED);
            return None;
        }
        self.node_rx.borrow().effective_timeout(self.default_timeout)
    }

    async fn run(mut self, tx: mpsc::Sender<Intent>) {
        info!(
            target: "timer",
            default_secs = self.default_timeout.as_secs(),
            "inactivity_timer_started"
        );

        // Start-up counts as the first pulse: arm immediately.
        let mut armed = true;
        loop {
            let timeout = if armed { self.effective_timeout() } else { None };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tx.closed() => break,
                maybe = self.activity_rx.recv() => {
                    // The held sender clone keeps this arm alive forever.
                    debug_assert!(maybe.is_some());
                    trace!(target: "timer", "pulse_activity");
                    core_intent::count(&TIMER_RESETS);
                    armed = true;
                }
                changed = self.node_rx.changed() => {
                    if changed.is_err() {
                        // State handler gone; the pipeline is shutting down.
                        break;
                    }
                    trace!(target: "timer", node = %self.node_rx.borrow().route_key(), "pulse_node");
                    core_intent::count(&TIMER_RESETS);
                    armed = true;
                }
                changed = self.lock_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    trace!(
                        target: "timer",
                        locked = self.lock_rx.borrow().is_some(),
                        "pulse_lock"
                    );
                    core_intent::count(&TIMER_RESETS);
                    armed = true;
                }
                _ = tokio::time::sleep(timeout.unwrap_or(Duration::ZERO)), if timeout.is_some() => {
                    core_intent::count(&TIMER_FIRES);
                    debug!(
                        target: "timer",
                        node = %self.node_rx.borrow().route_key(),
                        after_secs = timeout.unwrap_or_default().as_secs(),
                        "interaction_timeout"
                    );
                    if tx
                        .send(Intent::InteractionTimeout {
                            priority: priority::SYSTEM_DEFAULT,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    // Stay quiet until something pulses again.
                    armed = false;
                }
            }
        }
        info!(target: "timer", "inactivity_timer_stopped");
    }
}

impl IntentSource for InactivityTimer {
    fn name(&self) -> &'static str {
        "inactivity_timer"
    }

    fn spawn(self: Box<Self>, tx: mpsc::Sender<Intent>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }
}
