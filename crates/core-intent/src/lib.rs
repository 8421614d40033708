//! Canonical intent and command vocabulary plus the producer-side plumbing
//! (intent sources, actors, telemetry counters).
//!
//! An `Intent` is a request for a navigation effect; it is the unit of input
//! to the choreographer pipeline. A `Command` is the validated, view-facing
//! counterpart emitted after dispatch. Both live here so every other crate
//! agrees on one taxonomy without circular dependencies.

use core_route::Route;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod navigator;
pub mod source;
pub use navigator::{Navigator, NavigatorSource};
pub use source::{IntentSource, IntentSourceRegistry};

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// The choreographer consumes from a single bounded mpsc channel sized by `INTENT_CHANNEL_CAP`.
// Producers (actors, the inactivity timer) use `send().await`, parking until space is available
// rather than dropping intents: with a serial consumer and bursty human-speed producers, latency
// stays low and intent fidelity is preferred over lossy drop strategies. The choreographer's
// internal local source (retries, transaction prefixes, error dialogs) has its own smaller
// configurable bound; its error-dialog path alone downgrades to try_send + drop accounting.
// -------------------------------------------------------------------------------------------------
pub const INTENT_CHANNEL_CAP: usize = 256;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Simple atomic counters (fetch_add relaxed, no locking). Inspected in tests and periodically
// logged; a future metrics integration can export them without touching producers.
// -------------------------------------------------------------------------------------------------
pub static INTENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0); // intents handed to any merge channel
pub static INTENTS_DEBOUNCED: AtomicU64 = AtomicU64::new(0); // intents suppressed by debounce-distinct
pub static INTENT_SEND_FAILURES: AtomicU64 = AtomicU64::new(0); // sends onto a closed merge channel
pub static DISPATCH_ERRORS: AtomicU64 = AtomicU64::new(0); // dispatch attempts that surfaced an error
pub static DISPATCH_RETRIES: AtomicU64 = AtomicU64::new(0); // invalid-state retries of a single intent
pub static COMMANDS_EMITTED: AtomicU64 = AtomicU64::new(0); // commands broadcast to the view layer
pub static ERROR_DIALOGS_INJECTED: AtomicU64 = AtomicU64::new(0); // synthesized error-dialog intents
pub static LOCAL_SOURCE_DROPS: AtomicU64 = AtomicU64::new(0); // try_send drops on the local source

pub fn count(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the pipeline counters, for tests and periodic
/// logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub intents_published: u64,
    pub intents_debounced: u64,
    pub intent_send_failures: u64,
    pub dispatch_errors: u64,
    pub dispatch_retries: u64,
    pub commands_emitted: u64,
    pub error_dialogs_injected: u64,
    pub local_source_drops: u64,
}

impl TelemetrySnapshot {
    pub fn capture() -> Self {
        Self {
            intents_published: INTENTS_PUBLISHED.load(Ordering::Relaxed),
            intents_debounced: INTENTS_DEBOUNCED.load(Ordering::Relaxed),
            intent_send_failures: INTENT_SEND_FAILURES.load(Ordering::Relaxed),
            dispatch_errors: DISPATCH_ERRORS.load(Ordering::Relaxed),
            dispatch_retries: DISPATCH_RETRIES.load(Ordering::Relaxed),
            commands_emitted: COMMANDS_EMITTED.load(Ordering::Relaxed),
            error_dialogs_injected: ERROR_DIALOGS_INJECTED.load(Ordering::Relaxed),
            local_source_drops: LOCAL_SOURCE_DROPS.load(Ordering::Relaxed),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Dispatch Hooks (no-op scaffolding)
// -------------------------------------------------------------------------------------------------
/// Optional hooks observing intents and commands at the pipeline boundary.
///
/// Consulted synchronously on the dispatch task, so implementations must not
/// block; they exist for instrumentation (analytics, tracing bridges,
/// debugging overlays) rather than policy. Policy belongs to validators.
pub trait IntentObserver: Send + Sync + 'static {
    /// Called after admission, before the intent is dispatched.
    fn on_intent(&self, _intent: &Intent) {}
    /// Called after a command was handed to the broadcast.
    fn on_command(&self, _command: &Command) {}
}

/// Default no-op observer implementation.
pub struct NoopIntentObserver;

impl IntentObserver for NoopIntentObserver {}

/// Origin of an intent. Influences default priorities and log attribution
/// only; dispatch semantics never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    System,
}

impl Sender {
    pub const fn default_priority(self) -> i32 {
        match self {
            Sender::User => priority::USER_DEFAULT,
            Sender::System => priority::SYSTEM_DEFAULT,
        }
    }

    pub const fn high_priority(self) -> i32 {
        match self {
            Sender::User => priority::USER_HIGH,
            Sender::System => priority::SYSTEM_HIGH,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::System => "system",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority defaults. Higher values sort earlier inside redirect chains.
pub mod priority {
    pub const USER_DEFAULT: i32 = 1;
    pub const USER_HIGH: i32 = 10;
    pub const SYSTEM_DEFAULT: i32 = 2;
    pub const SYSTEM_HIGH: i32 = 20;
}

bitflags::bitflags! {
    /// Stack-manipulation flags carried by `NavigateTo`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NavOptions: u8 {
        /// Suppress the push when the same node already tops the stack.
        const SINGLE_TOP        = 0b0000_0001;
        /// Push onto retained history instead of the transient tier.
        const ADD_TO_BACK_STACK = 0b0000_0010;
        /// Drop the whole stack (both tiers) before pushing.
        const CLEAR_BACK_STACK  = 0b0000_0100;
    }
}

impl NavOptions {
    /// Default for user-facing navigate calls: retained history, duplicates
    /// allowed.
    pub const fn push() -> Self {
        Self::ADD_TO_BACK_STACK
    }

    pub fn single_top(self) -> bool {
        self.contains(Self::SINGLE_TOP)
    }

    pub fn add_to_back_stack(self) -> bool {
        self.contains(Self::ADD_TO_BACK_STACK)
    }

    pub fn clear_back_stack(self) -> bool {
        self.contains(Self::CLEAR_BACK_STACK)
    }
}

/// Overlay identity, unique per process. Allocated through `DialogId::next`
/// so concurrent producers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialogId(pub u64);

static NEXT_DIALOG_ID: AtomicU64 = AtomicU64::new(1);

impl DialogId {
    pub fn next() -> Self {
        Self(NEXT_DIALOG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dialog#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Payload of a dialog request. Opaque to dispatch; the view layer renders
/// it however it likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub id: DialogId,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

impl Overlay {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: DialogId::next(),
            severity,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Error overlay used by the rejected-intent path.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, "Navigation error", message)
    }
}

/// A request for a navigation effect.
///
/// `CompleteNavTransaction` carries neither sender nor priority fields: it is
/// always system-originated at priority 0 (the accessors encode that).
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    NavigateTo {
        route: Route,
        options: NavOptions,
        sender: Sender,
        priority: i32,
    },
    Back {
        sender: Sender,
        priority: i32,
    },
    PopUpTo {
        route: Route,
        inclusive: bool,
        sender: Sender,
        priority: i32,
    },
    ClearBackStack {
        sender: Sender,
        priority: i32,
    },
    InteractionTimeout {
        priority: i32,
    },
    DisplayDialog {
        overlay: Overlay,
        sender: Sender,
        priority: i32,
        /// Overlay to dismiss before showing this one, if any.
        dismiss_id: Option<DialogId>,
    },
    DismissOverlay {
        dialog_id: DialogId,
        sender: Sender,
        priority: i32,
    },
    CompleteNavTransaction {
        route: Route,
    },
}

impl Intent {
    pub fn sender(&self) -> Sender {
        match self {
            Intent::NavigateTo { sender, .. }
            | Intent::Back { sender, .. }
            | Intent::PopUpTo { sender, .. }
            | Intent::ClearBackStack { sender, .. }
            | Intent::DisplayDialog { sender, .. }
            | Intent::DismissOverlay { sender, .. } => *sender,
            Intent::InteractionTimeout { .. } | Intent::CompleteNavTransaction { .. } => {
                Sender::System
            }
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Intent::NavigateTo { priority, .. }
            | Intent::Back { priority, .. }
            | Intent::PopUpTo { priority, .. }
            | Intent::ClearBackStack { priority, .. }
            | Intent::InteractionTimeout { priority }
            | Intent::DisplayDialog { priority, .. }
            | Intent::DismissOverlay { priority, .. } => *priority,
            Intent::CompleteNavTransaction { .. } => 0,
        }
    }

    /// Stable variant label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::NavigateTo { .. } => "navigate_to",
            Intent::Back { .. } => "back",
            Intent::PopUpTo { .. } => "pop_up_to",
            Intent::ClearBackStack { .. } => "clear_back_stack",
            Intent::InteractionTimeout { .. } => "interaction_timeout",
            Intent::DisplayDialog { .. } => "display_dialog",
            Intent::DismissOverlay { .. } => "dismiss_overlay",
            Intent::CompleteNavTransaction { .. } => "complete_nav_transaction",
        }
    }

    /// Debounce equivalence. Written out per variant pair instead of leaning
    /// on derived `PartialEq` so the relation stays explicit: two intents are
    /// equivalent only when variant, payload, sender, and priority all agree.
    /// Heterogeneous variants are never equivalent.
    pub fn same_as(&self, other: &Intent) -> bool {
        use Intent::*;
        match (self, other) {
            (
                NavigateTo {
                    route: r1,
                    options: o1,
                    sender: s1,
                    priority: p1,
                },
                NavigateTo {
                    route: r2,
                    options: o2,
                    sender: s2,
                    priority: p2,
                },
            ) => r1 == r2 && o1 == o2 && s1 == s2 && p1 == p2,
            (
                Back {
                    sender: s1,
                    priority: p1,
                },
                Back {
                    sender: s2,
                    priority: p2,
                },
            ) => s1 == s2 && p1 == p2,
            (
                PopUpTo {
                    route: r1,
                    inclusive: i1,
                    sender: s1,
                    priority: p1,
                },
                PopUpTo {
                    route: r2,
                    inclusive: i2,
                    sender: s2,
                    priority: p2,
                },
            ) => r1 == r2 && i1 == i2 && s1 == s2 && p1 == p2,
            (
                ClearBackStack {
                    sender: s1,
                    priority: p1,
                },
                ClearBackStack {
                    sender: s2,
                    priority: p2,
                },
            ) => s1 == s2 && p1 == p2,
            (InteractionTimeout { priority: p1 }, InteractionTimeout { priority: p2 }) => p1 == p2,
            (
                DisplayDialog {
                    overlay: ov1,
                    sender: s1,
                    priority: p1,
                    dismiss_id: d1,
                },
                DisplayDialog {
                    overlay: ov2,
                    sender: s2,
                    priority: p2,
                    dismiss_id: d2,
                },
            ) => ov1 == ov2 && s1 == s2 && p1 == p2 && d1 == d2,
            (
                DismissOverlay {
                    dialog_id: d1,
                    sender: s1,
                    priority: p1,
                },
                DismissOverlay {
                    dialog_id: d2,
                    sender: s2,
                    priority: p2,
                },
            ) => d1 == d2 && s1 == s2 && p1 == p2,
            (CompleteNavTransaction { route: r1 }, CompleteNavTransaction { route: r2 }) => {
                r1 == r2
            }
            _ => false,
        }
    }

    /// View-facing command form. `CompleteNavTransaction` has none (it is
    /// consumed by the transaction manager); `InteractionTimeout` surfaces as
    /// the stack clear it performs.
    pub fn command(&self) -> Option<Command> {
        match self {
            Intent::NavigateTo { route, options, .. } => Some(Command::NavigateTo {
                route: route.clone(),
                options: *options,
            }),
            Intent::Back { .. } => Some(Command::Back),
            Intent::PopUpTo {
                route, inclusive, ..
            } => Some(Command::PopUpTo {
                route: route.clone(),
                inclusive: *inclusive,
            }),
            Intent::ClearBackStack { .. } | Intent::InteractionTimeout { .. } => {
                Some(Command::ClearBackStack)
            }
            Intent::DisplayDialog {
                overlay,
                dismiss_id,
                ..
            } => Some(Command::Dialog {
                overlay: overlay.clone(),
                prior_dismiss: *dismiss_id,
            }),
            Intent::DismissOverlay { dialog_id, .. } => Some(Command::DismissDialog(*dialog_id)),
            Intent::CompleteNavTransaction { .. } => None,
        }
    }
}

/// Validated view-layer action emitted by the choreographer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NavigateTo { route: Route, options: NavOptions },
    Back,
    PopUpTo { route: Route, inclusive: bool },
    ClearBackStack,
    Dialog {
        overlay: Overlay,
        prior_dismiss: Option<DialogId>,
    },
    DismissDialog(DialogId),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::NavigateTo { .. } => "navigate_to",
            Command::Back => "back",
            Command::PopUpTo { .. } => "pop_up_to",
            Command::ClearBackStack => "clear_back_stack",
            Command::Dialog { .. } => "dialog",
            Command::DismissDialog(_) => "dismiss_dialog",
        }
    }
}
