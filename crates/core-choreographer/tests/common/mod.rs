//! Shared pipeline harness for integration tests: a small demo graph, a
//! scripted validator, and fully wired choreographer instances driven over
//! paused tokio time.

use core_choreographer::Choreographer;
use core_config::PipelineConfig;
use core_intent::{
    Command, Intent, IntentSourceRegistry, Navigator,
};
use core_route::{Graph, Node, Requirement, Route, RouteKey};
use core_stack::StateHandler;
use core_timer::{ActivityHandle, InactivityTimer, TimerLock};
use core_transaction::TransactionManager;
use core_validate::{ValidationResult, Validator, ValidatorChain};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

pub const ROOT: RouteKey = RouteKey(0);
pub const HOME: RouteKey = RouteKey(1);
pub const SETTINGS: RouteKey = RouteKey(2);
pub const PROFILE: RouteKey = RouteKey(3);
pub const LOGIN: RouteKey = RouteKey(4);

pub fn route(key: RouteKey) -> Route {
    Route::new(key)
}

/// Root menu over four screens; `PROFILE` carries a requirement tag so
/// redirect tests have something to guard.
pub fn demo_graph(screen_timeout: Option<Duration>) -> Arc<Graph> {
    let home = Arc::new(Node::new(HOME, "home"));
    let settings = Arc::new(Node::new(SETTINGS, "settings"));
    let mut profile = Node::new(PROFILE, "profile").with_requirement(Requirement::new("session"));
    if let Some(t) = screen_timeout {
        profile = profile.with_timeout(t);
    }
    let profile = Arc::new(profile);
    let login = Arc::new(Node::new(LOGIN, "login"));
    Arc::new(
        Graph::builder()
            .root(Node::new(ROOT, "root").with_menu_children(vec![
                home.clone(),
                settings.clone(),
                profile.clone(),
            ]))
            .add_shared(home)
            .add_shared(settings)
            .add_shared(profile)
            .add_shared(login)
            .build()
            .expect("demo graph"),
    )
}

/// Validator scripted per route key. Anything without a script passes, and
/// every evaluated (intent kind, node key) pair is recorded in order.
pub struct Scripted {
    pub log: Arc<Mutex<Vec<(String, RouteKey)>>>,
    scripts: Vec<(RouteKey, ValidationResult)>,
    /// When set, a scripted verdict fires only for `NavigateTo` intents.
    navigate_only: bool,
}

impl Scripted {
    pub fn passing() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            scripts: Vec::new(),
            navigate_only: true,
        }
    }

    pub fn with_script(mut self, key: RouteKey, verdict: ValidationResult) -> Self {
        self.scripts.push((key, verdict));
        self
    }

    pub fn log_handle(&self) -> Arc<Mutex<Vec<(String, RouteKey)>>> {
        self.log.clone()
    }
}

#[async_trait::async_trait]
impl Validator for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn validate(
        &self,
        intent: &Intent,
        node: &Node,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<ValidationResult> {
        self.log
            .lock()
            .unwrap()
            .push((intent.kind().to_string(), node.route_key()));
        if self.navigate_only && !matches!(intent, Intent::NavigateTo { .. }) {
            return Ok(ValidationResult::Valid);
        }
        for (key, verdict) in &self.scripts {
            if *key == node.route_key() {
                return Ok(verdict.clone());
            }
        }
        Ok(ValidationResult::Valid)
    }
}

pub struct Harness {
    pub choreo: Arc<Choreographer>,
    pub user: Navigator,
    pub system: Navigator,
    pub commands: broadcast::Receiver<Command>,
    pub current: watch::Receiver<Arc<Node>>,
    pub log: Arc<Mutex<Vec<(String, RouteKey)>>>,
    pub activity: Option<ActivityHandle>,
    pub lock: Option<TimerLock>,
    pub cancel: CancellationToken,
}

pub struct HarnessBuilder {
    graph: Arc<Graph>,
    validator: Scripted,
    config: PipelineConfig,
    with_timer: bool,
    observers: Vec<Box<dyn core_intent::IntentObserver>>,
    extra_validators: Vec<Box<dyn Validator>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            graph: demo_graph(None),
            validator: Scripted::passing(),
            config: PipelineConfig::default(),
            with_timer: false,
            observers: Vec::new(),
            extra_validators: Vec::new(),
        }
    }

    /// Append a validator alongside the scripted one.
    pub fn extra_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.extra_validators.push(validator);
        self
    }

    pub fn observer<O: core_intent::IntentObserver>(mut self, observer: O) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn graph(mut self, graph: Arc<Graph>) -> Self {
        self.graph = graph;
        self
    }

    pub fn validator(mut self, validator: Scripted) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timer(mut self) -> Self {
        self.with_timer = true;
        self
    }

    pub fn build(self) -> Harness {
        let cancel = CancellationToken::new();
        let state = StateHandler::new(self.graph.clone());

        let mut registry = IntentSourceRegistry::new();
        let (user, user_source) = Navigator::user("test-user");
        let (system, system_source) = Navigator::system("test-system");
        registry.register(user_source);
        registry.register(system_source);

        let (activity, lock) = if self.with_timer {
            let (timer, activity, lock) = InactivityTimer::new(
                state.current(),
                self.config.default_screen_timeout,
                cancel.clone(),
            );
            registry.register(timer);
            (Some(activity), Some(lock))
        } else {
            (None, None)
        };

        let log = self.validator.log_handle();
        let mut validators: Vec<Box<dyn Validator>> = vec![Box::new(self.validator)];
        validators.extend(self.extra_validators);
        let mut chain = ValidatorChain::new(validators);
        if let Some(watchdog) = self.config.validation_watchdog {
            chain = chain.with_watchdog(watchdog);
        }
        let choreo = Arc::new(Choreographer::new(
            self.graph,
            state,
            chain,
            TransactionManager::new(),
            registry,
            self.config,
            cancel.clone(),
        ));

        let commands = choreo.subscribe();
        let current = choreo.current();
        for observer in self.observers {
            choreo.add_observer(observer);
        }
        choreo.initialize();

        Harness {
            choreo,
            user,
            system,
            commands,
            current,
            log,
            activity,
            lock,
            cancel,
        }
    }
}

impl Harness {
    /// Key of the current node as published by the state handler.
    pub fn current_key(&self) -> RouteKey {
        self.current.borrow().route_key()
    }
}

pub async fn next_command(rx: &mut broadcast::Receiver<Command>) -> Command {
    next_command_within(rx, Duration::from_secs(5)).await
}

pub async fn next_command_within(
    rx: &mut broadcast::Receiver<Command>,
    within: Duration,
) -> Command {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("expected a command in the window")
        .expect("command broadcast open")
}

pub async fn expect_silence(rx: &mut broadcast::Receiver<Command>, during: Duration) {
    if let Ok(result) = tokio::time::timeout(during, rx.recv()).await {
        panic!("expected no command, got {result:?}");
    }
}

/// Let every in-flight intent drain through the pipeline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
