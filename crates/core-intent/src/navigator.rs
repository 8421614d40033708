//! User / system actors.
//!
//! A `Navigator` is the high-level handle components hold to request
//! navigation: it translates API calls into canonical intents, stamping its
//! sender tag and default priority, and queues them on the actor's own
//! bounded outbound channel. The paired `NavigatorSource` forwards that
//! queue into the choreographer's merge channel from a dedicated task, so
//! intents published through one handle reach the merge point in publish
//! order (per-actor FIFO).

use crate::{
    DialogId, INTENT_SEND_FAILURES, INTENTS_PUBLISHED, Intent, IntentSource, NavOptions, Overlay,
    Sender, count,
};
use core_route::Route;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default outbound queue depth per actor. Small: a stalled pipeline should
/// push back on producers quickly rather than buffer stale interactions.
pub const NAVIGATOR_QUEUE_CAP: usize = 32;

#[derive(Clone)]
pub struct Navigator {
    name: &'static str,
    sender: Sender,
    default_priority: i32,
    tx: mpsc::Sender<Intent>,
}

/// Forwarding half created alongside each `Navigator`.
pub struct NavigatorSource {
    name: &'static str,
    rx: mpsc::Receiver<Intent>,
}

impl Navigator {
    /// Actor publishing on behalf of direct user interaction.
    pub fn user(name: &'static str) -> (Self, NavigatorSource) {
        Self::with_queue(name, Sender::User, Sender::User.default_priority())
    }

    /// Actor publishing on behalf of background components.
    pub fn system(name: &'static str) -> (Self, NavigatorSource) {
        Self::with_queue(name, Sender::System, Sender::System.default_priority())
    }

    pub fn with_queue(
        name: &'static str,
        sender: Sender,
        default_priority: i32,
    ) -> (Self, NavigatorSource) {
        let (tx, rx) = mpsc::channel(NAVIGATOR_QUEUE_CAP);
        (
            Self {
                name,
                sender,
                default_priority,
                tx,
            },
            NavigatorSource { name, rx },
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    /// Navigate with default options (retained history push).
    pub async fn navigate(&self, route: Route) {
        self.navigate_with(route, NavOptions::push()).await;
    }

    pub async fn navigate_with(&self, route: Route, options: NavOptions) {
        self.navigate_with_priority(route, options, self.default_priority)
            .await;
    }

    pub async fn navigate_with_priority(&self, route: Route, options: NavOptions, priority: i32) {
        self.publish(Intent::NavigateTo {
            route,
            options,
            sender: self.sender,
            priority,
        })
        .await;
    }

    pub async fn navigate_back(&self) {
        self.publish(Intent::Back {
            sender: self.sender,
            priority: self.default_priority,
        })
        .await;
    }

    pub async fn pop_up_to(&self, route: Route, inclusive: bool) {
        self.publish(Intent::PopUpTo {
            route,
            inclusive,
            sender: self.sender,
            priority: self.default_priority,
        })
        .await;
    }

    pub async fn clear_back_stack(&self) {
        self.publish(Intent::ClearBackStack {
            sender: self.sender,
            priority: self.default_priority,
        })
        .await;
    }

    pub async fn show_dialog(&self, overlay: Overlay) {
        self.publish(Intent::DisplayDialog {
            overlay,
            sender: self.sender,
            priority: self.default_priority,
            dismiss_id: None,
        })
        .await;
    }

    /// Show `overlay`, instructing the view layer to dismiss `prior` first.
    pub async fn show_dialog_replacing(&self, overlay: Overlay, prior: DialogId) {
        self.publish(Intent::DisplayDialog {
            overlay,
            sender: self.sender,
            priority: self.default_priority,
            dismiss_id: Some(prior),
        })
        .await;
    }

    pub async fn dismiss_dialog(&self, dialog_id: DialogId) {
        self.publish(Intent::DismissOverlay {
            dialog_id,
            sender: self.sender,
            priority: self.default_priority,
        })
        .await;
    }

    /// Report that the in-flight redirect prefix reached `route` and the
    /// transaction may advance. Always system priority 0.
    pub async fn complete_transaction(&self, route: Route) {
        self.publish(Intent::CompleteNavTransaction { route }).await;
    }

    async fn publish(&self, intent: Intent) {
        debug!(
            target: "intent.source",
            actor = self.name,
            kind = intent.kind(),
            priority = intent.priority(),
            "publish"
        );
        if self.tx.send(intent).await.is_err() {
            count(&INTENT_SEND_FAILURES);
            warn!(target: "intent.source", actor = self.name, "publish_after_shutdown");
        } else {
            count(&INTENTS_PUBLISHED);
        }
    }
}

impl IntentSource for NavigatorSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn spawn(self: Box<Self>, tx: mpsc::Sender<Intent>) -> JoinHandle<()> {
        let mut rx = self.rx;
        let name = self.name;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // The pipeline dropped its receiver; stop even while the
                    // actor queue is idle.
                    _ = tx.closed() => break,
                    maybe = rx.recv() => {
                        let Some(intent) = maybe else { break };
                        if tx.send(intent).await.is_err() {
                            count(&INTENT_SEND_FAILURES);
                            break;
                        }
                    }
                }
            }
            debug!(target: "intent.source", actor = name, "forwarder_stopped");
        })
    }
}
