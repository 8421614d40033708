//! Async intent sources and their registry.
//!
//! Every independent producer of intents (user actor, system actor, the
//! inactivity timer) implements `IntentSource`: a name for diagnostics plus a
//! `spawn` that moves the source into its own task pushing intents at the
//! shared merge channel. Sources own their task lifecycle; on channel send
//! failure (consumer dropped) they must terminate promptly. Backpressure
//! comes from the bounded channel; prioritization between sources is not a
//! source concern (arrival order at the merge point defines cross-source
//! ordering).

use crate::Intent;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Trait implemented by any async intent producer. Implementors usually hold
/// their own inbound queue or timers and spawn one background task that
/// pushes `Intent`s into the shared channel.
pub trait IntentSource: Send + 'static {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning its handle.
    /// Implementors stop when `tx.send(..).await` returns `Err` (channel
    /// closed) or on their own internal stop condition, and avoid busy loops
    /// by awaiting timers or queue receives.
    fn spawn(self: Box<Self>, tx: Sender<Intent>) -> JoinHandle<()>;
}

/// Registry of intent sources. The set is fixed at choreographer
/// construction; `spawn_all` drains it so duplicate spawns are impossible.
#[derive(Default)]
pub struct IntentSourceRegistry {
    sources: Vec<Box<dyn IntentSource>>,
}

impl IntentSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: IntentSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawn all registered sources, returning their JoinHandles. The
    /// supplied `Sender` stays owned by the caller; each source receives its
    /// own clone so no extra strong references linger in the registry once
    /// this returns. During shutdown the caller drops its final sender clone
    /// before awaiting the handles so sources observe the closed channel and
    /// exit cooperatively.
    pub fn spawn_all(&mut self, tx: &Sender<Intent>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "intent.source", source = name, "spawning intent source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}
