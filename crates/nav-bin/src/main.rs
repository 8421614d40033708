//! Choreo entrypoint: wires a demo navigation graph to the intent pipeline
//! and drives it from stdin, printing the command stream a real view layer
//! would consume. One line, one interaction; `help` lists the verbs.

use anyhow::Result;
use clap::Parser;
use core_choreographer::Choreographer;
use core_config::{Config, PipelineConfig, load_from};
use core_intent::{
    Command, DialogId, IntentSourceRegistry, Navigator, Overlay, Severity,
};
use core_route::{Graph, Node, Requirement, Route};
use core_stack::StateHandler;
use core_timer::{ActivityHandle, InactivityTimer, TimerLock};
use core_transaction::TransactionManager;
use core_validate::{GrantSet, RequirementGate, ValidatorChain};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod routes {
    use core_route::RouteKey;

    pub const ROOT: RouteKey = RouteKey(0);
    pub const HOME: RouteKey = RouteKey(1);
    pub const SETTINGS: RouteKey = RouteKey(2);
    pub const PROFILE: RouteKey = RouteKey(3);
    pub const LOGIN: RouteKey = RouteKey(4);
    pub const ABOUT: RouteKey = RouteKey(5);
}

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "choreo", version, about = "Navigation choreographer demo")] // minimal metadata
struct Args {
    /// Optional configuration file path (overrides discovery of `choreo.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Log file (truncated at startup).
    #[arg(long = "log-file", default_value = "choreo.log")]
    pub log_file: PathBuf,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, log_path: &Path) -> Result<()> {
        if log_path.exists() {
            let _ = std::fs::remove_file(log_path);
        }
        let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
        let file = log_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "choreo.log".to_string());

        let file_appender = tracing_appender::rolling::never(dir, file);
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global tracing subscriber already installed; drop guard so
                // the writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Root menu over the demo screens. Profile is gated behind a session grant
/// and idles out after two minutes; About never times out.
fn build_graph() -> Result<Arc<Graph>> {
    let home = Arc::new(Node::new(routes::HOME, "home"));
    let settings = Arc::new(Node::new(routes::SETTINGS, "settings"));
    let profile = Arc::new(
        Node::new(routes::PROFILE, "profile")
            .with_requirement(Requirement::new("session"))
            .with_timeout(Duration::from_secs(120)),
    );
    let about = Arc::new(Node::new(routes::ABOUT, "about").without_timeout());

    let graph = Graph::builder()
        .root(Node::new(routes::ROOT, "root").with_menu_children(vec![
            home.clone(),
            settings.clone(),
            profile.clone(),
            about.clone(),
        ]))
        .add_shared(home)
        .add_shared(settings)
        .add_shared(profile)
        .add_shared(about)
        .add(Node::new(routes::LOGIN, "login"))
        .build()?;
    Ok(Arc::new(graph))
}

struct Wiring {
    choreo: Arc<Choreographer>,
    graph: Arc<Graph>,
    user: Navigator,
    system: Navigator,
    activity: ActivityHandle,
    lock: TimerLock,
    grants: GrantSet,
}

fn wire(graph: Arc<Graph>, effective: &PipelineConfig) -> Wiring {
    let cancel = CancellationToken::new();
    let state = StateHandler::new(graph.clone());

    let mut registry = IntentSourceRegistry::new();
    let (user, user_source) = Navigator::user("stdin");
    let (system, system_source) = Navigator::system("demo-system");
    registry.register(user_source);
    registry.register(system_source);

    let (timer, activity, lock) = InactivityTimer::new(
        state.current(),
        effective.default_screen_timeout,
        cancel.clone(),
    );
    registry.register(timer);

    let grants = GrantSet::new();
    let mut chain = ValidatorChain::new(vec![Box::new(RequirementGate::new(
        Route::new(routes::LOGIN),
        grants.clone(),
    ))]);
    if let Some(watchdog) = effective.validation_watchdog {
        chain = chain.with_watchdog(watchdog);
    }

    let choreo = Arc::new(Choreographer::new(
        graph.clone(),
        state,
        chain,
        TransactionManager::new(),
        registry,
        effective.clone(),
        cancel,
    ));

    Wiring {
        choreo,
        graph,
        user,
        system,
        activity,
        lock,
        grants,
    }
}

fn describe_command(graph: &Graph, command: &Command) -> String {
    match command {
        Command::NavigateTo { route, options } => {
            let name = graph
                .lookup(route.key())
                .map(|n| n.name().to_string())
                .unwrap_or_else(|| route.key().to_string());
            format!("show screen '{name}' (options {options:?})")
        }
        Command::Back => "go back one screen".to_string(),
        Command::PopUpTo { route, inclusive } => {
            let name = graph
                .lookup(route.key())
                .map(|n| n.name().to_string())
                .unwrap_or_else(|| route.key().to_string());
            format!("unwind to '{name}' (inclusive: {inclusive})")
        }
        Command::ClearBackStack => "reset to the root screen".to_string(),
        Command::Dialog { overlay, prior_dismiss } => {
            let prior = prior_dismiss
                .map(|id| format!(", dismissing {id} first"))
                .unwrap_or_default();
            format!(
                "open {:?} dialog {} '{}': {}{prior}",
                overlay.severity, overlay.id, overlay.title, overlay.message
            )
        }
        Command::DismissDialog(id) => format!("dismiss dialog {id}"),
    }
}

/// Consume the command broadcast the way a view layer would, remembering
/// the most recent dialog so `dismiss` has a target.
fn spawn_command_printer(
    choreo: &Choreographer,
    graph: Arc<Graph>,
    last_dialog: Arc<Mutex<Option<DialogId>>>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = choreo.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(command) => {
                    if let Command::Dialog { overlay, .. } = &command {
                        *last_dialog.lock().expect("dialog slot poisoned") = Some(overlay.id);
                    }
                    println!("view <- {}", describe_command(&graph, &command));
                    info!(target: "view", kind = command.kind(), "command_consumed");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(target: "view", missed, "command_stream_lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn find_route(graph: &Graph, name: &str) -> Option<Route> {
    graph
        .iter_nodes()
        .find(|n| n.name() == name)
        .map(|n| n.route())
}

fn print_help() {
    println!(
        "commands:\n  \
         go <screen>        navigate to a screen by name\n  \
         back               pop one screen\n  \
         up-to <screen>     unwind the stack to a screen\n  \
         clear              reset to the root screen\n  \
         dialog <message>   show an info dialog\n  \
         dismiss            dismiss the most recent dialog\n  \
         complete <screen>  report a redirect step as finished\n  \
         grant <tag>        satisfy a requirement (try 'grant session')\n  \
         revoke <tag>       drop a granted requirement\n  \
         lock <reason>      hold the inactivity timer\n  \
         unlock             release the inactivity timer\n  \
         screens            list the graph\n  \
         stats              print pipeline counters\n  \
         quit               shut down"
    );
}

fn print_screens(graph: &Graph) {
    for node in graph.iter_nodes() {
        let mut line = format!("  {} ({})", node.name(), node.route_key());
        if node.is_menu() {
            let children: Vec<&str> = node.menu_children().iter().map(|c| c.name()).collect();
            line.push_str(&format!(" menu -> {}", children.join(", ")));
        }
        if !node.requirements().is_empty() {
            let tags: Vec<&str> = node.requirements().iter().map(|r| r.tag()).collect();
            line.push_str(&format!(" requires [{}]", tags.join(", ")));
        }
        println!("{line}");
    }
}

fn print_stats() {
    let pipeline = core_intent::TelemetrySnapshot::capture();
    let timer = core_timer::TimerTelemetrySnapshot::capture();
    println!(
        "pipeline: published {}, debounced {}, commands {}, dialogs {}, \
         errors {}, retries {}",
        pipeline.intents_published,
        pipeline.intents_debounced,
        pipeline.commands_emitted,
        pipeline.error_dialogs_injected,
        pipeline.dispatch_errors,
        pipeline.dispatch_retries,
    );
    println!(
        "timer: fires {}, resets {}, suppressed-while-locked {}",
        timer.fires, timer.resets, timer.suppressed_locked
    );
}

async fn interact(wiring: &Wiring, last_dialog: &Arc<Mutex<Option<DialogId>>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Every typed line is a user interaction as far as the timer goes.
        wiring.activity.pulse();

        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match verb {
            "go" => match find_route(&wiring.graph, rest) {
                Some(route) => wiring.user.navigate(route).await,
                None => println!("no screen named '{rest}' (try 'screens')"),
            },
            "back" => wiring.user.navigate_back().await,
            "up-to" => match find_route(&wiring.graph, rest) {
                Some(route) => wiring.user.pop_up_to(route, false).await,
                None => println!("no screen named '{rest}' (try 'screens')"),
            },
            "clear" => wiring.user.clear_back_stack().await,
            "dialog" => {
                let message = if rest.is_empty() { "hello" } else { rest };
                wiring
                    .user
                    .show_dialog(Overlay::new(Severity::Info, "Demo", message))
                    .await;
            }
            "dismiss" => {
                let id = last_dialog.lock().expect("dialog slot poisoned").take();
                match id {
                    Some(id) => wiring.user.dismiss_dialog(id).await,
                    None => println!("no dialog on record"),
                }
            }
            "complete" => match find_route(&wiring.graph, rest) {
                Some(route) => wiring.system.complete_transaction(route).await,
                None => println!("no screen named '{rest}' (try 'screens')"),
            },
            "grant" if !rest.is_empty() => {
                wiring.grants.grant(rest);
                println!("granted '{rest}'");
            }
            "revoke" if !rest.is_empty() => {
                wiring.grants.revoke(rest);
                println!("revoked '{rest}'");
            }
            "lock" => {
                let reason = if rest.is_empty() { "manual" } else { rest };
                wiring.lock.acquire(reason);
                println!("timer locked ({reason})");
            }
            "unlock" => {
                wiring.lock.release();
                println!("timer unlocked");
            }
            "screens" => print_screens(&wiring.graph),
            "stats" => print_stats(),
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("unknown command '{other}' (try 'help')"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut startup = AppStartup::new();
    startup.configure_logging(&args.log_file)?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let config: Config = load_from(args.config.clone())?;
    info!(
        target: "runtime.startup",
        config_override = args.config.is_some(),
        debounce_ms = config.effective.debounce_window.as_millis() as u64,
        default_screen_secs = config.effective.default_screen_timeout.as_secs(),
        "bootstrap_complete"
    );

    let graph = build_graph()?;
    let wiring = wire(graph.clone(), &config.effective);

    let last_dialog = Arc::new(Mutex::new(None));
    let printer = spawn_command_printer(&wiring.choreo, graph, last_dialog.clone());
    wiring.choreo.initialize();

    if let Err(err) = interact(&wiring, &last_dialog).await {
        error!(target: "runtime", ?err, "stdin_loop_error");
    }

    info!(target: "runtime.shutdown", "shutdown");
    let snapshot = core_intent::TelemetrySnapshot::capture();
    info!(
        target: "runtime.shutdown",
        intents = snapshot.intents_published,
        commands = snapshot.commands_emitted,
        debounced = snapshot.intents_debounced,
        errors = snapshot.dispatch_errors,
        "final_counters"
    );
    wiring.choreo.shutdown().await;
    // The broadcast sender lives inside the choreographer, so the printer
    // never observes Closed on its own; stop it explicitly.
    printer.abort();
    let _ = printer.await;

    drop(startup);
    Ok(())
}
