//! Debounce-distinct admission gate.
//!
//! Suppresses an intent when it is equivalent (`Intent::same_as`) to the
//! previously *admitted* intent and arrives within the window of that
//! admission. Suppressed arrivals do not refresh the window, so a steady
//! stream of duplicates is re-admitted once per window rather than silenced
//! forever. A zero window admits everything.
//!
//! Clock: `tokio::time::Instant`, so paused-time tests drive the gate the
//! same way the runtime does.

use core_intent::Intent;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct DebounceGate {
    window: Duration,
    last: Option<(Intent, Instant)>,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or suppress `intent` arriving at `now`.
    pub fn admit(&mut self, intent: &Intent, now: Instant) -> bool {
        if !self.window.is_zero()
            && let Some((prev, admitted_at)) = &self.last
            && prev.same_as(intent)
            && now.duration_since(*admitted_at) < self.window
        {
            return false;
        }
        self.last = Some((intent.clone(), now));
        true
    }
}
