//! End-to-end pipeline tests over paused time: navigation, debounce,
//! redirect transactions, rejection dialogs, and failure containment.

mod common;

use common::*;
use core_intent::{Command, Intent, NavOptions, Sender, Severity, priority};
use core_route::{Route, RouteKey};
use core_validate::ValidationResult;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn user_navigate_intent(key: RouteKey) -> Intent {
    Intent::NavigateTo {
        route: route(key),
        options: NavOptions::push(),
        sender: Sender::User,
        priority: priority::USER_DEFAULT,
    }
}

fn login_prefix() -> Intent {
    Intent::NavigateTo {
        route: route(LOGIN),
        options: NavOptions::push() | NavOptions::SINGLE_TOP,
        sender: Sender::System,
        priority: priority::USER_HIGH,
    }
}

#[tokio::test(start_paused = true)]
async fn simple_navigation_emits_one_command_and_updates_current() {
    let mut h = HarnessBuilder::new().build();

    h.user
        .navigate_with(
            route(SETTINGS),
            NavOptions::push() | NavOptions::SINGLE_TOP,
        )
        .await;

    let cmd = next_command(&mut h.commands).await;
    match cmd {
        Command::NavigateTo { route, options } => {
            assert_eq!(route.key(), SETTINGS);
            assert!(options.single_top());
            assert!(options.add_to_back_stack());
        }
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    assert_eq!(h.current_key(), SETTINGS);

    // Exactly one retained entry above the root: one back lands on root.
    h.user.navigate_back().await;
    assert_eq!(next_command(&mut h.commands).await, Command::Back);
    settle().await;
    assert_eq!(h.current_key(), ROOT);
}

#[tokio::test(start_paused = true)]
async fn redirect_chain_runs_prefix_then_original_unvalidated() {
    let validator = Scripted::passing().with_script(
        PROFILE,
        ValidationResult::Redirect {
            original: user_navigate_intent(PROFILE),
            chain: vec![login_prefix()],
        },
    );
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(PROFILE)).await;

    // The prefix is validated and emitted first.
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), LOGIN),
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    assert_eq!(h.current_key(), LOGIN);

    // Completion drains the chain; the original executes without another
    // validation pass.
    h.system.complete_transaction(route(LOGIN)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, options } => {
            assert_eq!(route.key(), PROFILE);
            assert_eq!(options, NavOptions::push());
        }
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    assert_eq!(h.current_key(), PROFILE);

    let validated: Vec<RouteKey> = h
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| kind == "navigate_to")
        .map(|(_, key)| *key)
        .collect();
    assert_eq!(validated, vec![PROFILE, LOGIN], "no re-validation after completion");
}

#[tokio::test(start_paused = true)]
async fn debounce_collapses_identical_burst_to_one_command() {
    let mut h = HarnessBuilder::new().build();

    for _ in 0..3 {
        h.user.navigate(route(SETTINGS)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), SETTINGS),
        other => panic!("unexpected command {other:?}"),
    }
    expect_silence(&mut h.commands, Duration::from_millis(500)).await;

    let validations = h
        .log
        .lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| kind == "navigate_to")
        .count();
    assert_eq!(validations, 1, "suppressed intents never reach validation");
}

#[tokio::test(start_paused = true)]
async fn identical_intents_outside_window_produce_two_commands() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(SETTINGS)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.user.navigate(route(SETTINGS)).await;

    for _ in 0..2 {
        match next_command(&mut h.commands).await {
            Command::NavigateTo { route, .. } => assert_eq!(route.key(), SETTINGS),
            other => panic!("unexpected command {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn back_on_bottomed_out_stack_emits_root_benignly() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate_back().await;
    assert_eq!(next_command(&mut h.commands).await, Command::Back);
    settle().await;
    assert_eq!(h.current_key(), ROOT);
}

#[tokio::test(start_paused = true)]
async fn clear_back_stack_resets_to_root() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(SETTINGS)).await;
    let _ = next_command(&mut h.commands).await;

    h.system.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;
    h.user.clear_back_stack().await;
    assert_eq!(next_command(&mut h.commands).await, Command::ClearBackStack);
    settle().await;
    assert_eq!(h.current_key(), ROOT);
}

#[tokio::test(start_paused = true)]
async fn invalid_verdict_surfaces_error_dialog_without_navigation() {
    let validator =
        Scripted::passing().with_script(SETTINGS, ValidationResult::invalid("maintenance window"));
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(SETTINGS)).await;

    match next_command(&mut h.commands).await {
        Command::Dialog { overlay, prior_dismiss } => {
            assert_eq!(overlay.severity, Severity::Error);
            assert_eq!(overlay.message, "maintenance window");
            assert_eq!(prior_dismiss, None);
        }
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    // State untouched by the rejected navigation.
    assert_eq!(h.current_key(), ROOT);
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
}

#[tokio::test(start_paused = true)]
async fn ignore_verdict_drops_silently() {
    let validator = Scripted::passing().with_script(SETTINGS, ValidationResult::Ignore);
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(SETTINGS)).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
    assert_eq!(h.current_key(), ROOT);

    // The pipeline keeps serving afterwards.
    h.user.navigate(route(HOME)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), HOME),
        other => panic!("unexpected command {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_route_is_dropped_and_pipeline_survives() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(Route::new(RouteKey(99))).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
    assert_eq!(h.current_key(), ROOT);

    h.user.navigate(route(HOME)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), HOME),
        other => panic!("unexpected command {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn back_cancels_pending_transaction() {
    let validator = Scripted::passing().with_script(
        PROFILE,
        ValidationResult::Redirect {
            original: user_navigate_intent(PROFILE),
            chain: vec![login_prefix()],
        },
    );
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(PROFILE)).await;
    let _login_cmd = next_command(&mut h.commands).await;

    h.user.navigate_back().await;
    assert_eq!(next_command(&mut h.commands).await, Command::Back);

    // The completion now references a transaction that no longer exists.
    h.system.complete_transaction(route(LOGIN)).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
    settle().await;
    assert_eq!(h.current_key(), ROOT);
}

#[tokio::test(start_paused = true)]
async fn completion_without_transaction_is_dropped() {
    let mut h = HarnessBuilder::new().build();

    h.system.complete_transaction(route(LOGIN)).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;

    h.user.navigate(route(HOME)).await;
    assert!(matches!(
        next_command(&mut h.commands).await,
        Command::NavigateTo { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn empty_redirect_chain_executes_original_immediately() {
    let validator = Scripted::passing().with_script(
        SETTINGS,
        ValidationResult::Redirect {
            original: user_navigate_intent(SETTINGS),
            chain: vec![],
        },
    );
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(SETTINGS)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), SETTINGS),
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    assert_eq!(h.current_key(), SETTINGS);
}

#[tokio::test(start_paused = true)]
async fn fresh_redirect_supersedes_pending_transaction() {
    let validator = Scripted::passing()
        .with_script(
            PROFILE,
            ValidationResult::Redirect {
                original: user_navigate_intent(PROFILE),
                chain: vec![
                    login_prefix(),
                    Intent::NavigateTo {
                        route: route(HOME),
                        options: NavOptions::push(),
                        sender: Sender::System,
                        priority: priority::SYSTEM_DEFAULT,
                    },
                ],
            },
        )
        .with_script(
            SETTINGS,
            ValidationResult::Redirect {
                original: user_navigate_intent(SETTINGS),
                chain: vec![Intent::NavigateTo {
                    route: route(HOME),
                    options: NavOptions::push(),
                    sender: Sender::System,
                    priority: priority::SYSTEM_DEFAULT,
                }],
            },
        )
        .with_script(HOME, ValidationResult::Valid);
    let mut h = HarnessBuilder::new().validator(validator).build();

    // First redirect: prefix 1 of 2 goes out, transaction stays pending.
    h.user.navigate(route(PROFILE)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), LOGIN),
        other => panic!("unexpected command {other:?}"),
    }

    // Second redirect supersedes the pending one.
    h.user.navigate(route(SETTINGS)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), HOME),
        other => panic!("unexpected command {other:?}"),
    }

    h.system.complete_transaction(route(HOME)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), SETTINGS),
        other => panic!("unexpected command {other:?}"),
    }

    // Completing the superseded chain's prefix leads nowhere.
    h.system.complete_transaction(route(LOGIN)).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
}

#[tokio::test(start_paused = true)]
async fn initialize_is_idempotent() {
    let mut h = HarnessBuilder::new().build();
    h.choreo.initialize();
    h.choreo.initialize();
    assert!(h.choreo.is_running());

    h.user.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;
    // One pipeline: no duplicated dispatch of the same intent.
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_pipeline() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;

    h.choreo.shutdown().await;
    assert!(!h.choreo.is_running());

    h.user.navigate(route(SETTINGS)).await;
    expect_silence(&mut h.commands, Duration::from_millis(300)).await;
}

#[tokio::test(start_paused = true)]
async fn single_top_navigation_keeps_stack_shallow() {
    let mut h = HarnessBuilder::new().build();
    let opts = NavOptions::push() | NavOptions::SINGLE_TOP;

    h.user.navigate_with(route(SETTINGS), opts).await;
    let _ = next_command(&mut h.commands).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.user.navigate_with(route(SETTINGS), opts).await;
    let _ = next_command(&mut h.commands).await;

    // The duplicate push was suppressed: one back reaches the root.
    h.user.navigate_back().await;
    assert_eq!(next_command(&mut h.commands).await, Command::Back);
    settle().await;
    assert_eq!(h.current_key(), ROOT);
}

#[tokio::test(start_paused = true)]
async fn dialog_round_trip_without_state_mutation() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;

    let overlay = core_intent::Overlay::new(Severity::Info, "About", "version 0.3.0");
    let overlay_id = overlay.id;
    h.user.show_dialog(overlay.clone()).await;
    match next_command(&mut h.commands).await {
        Command::Dialog { overlay: shown, prior_dismiss } => {
            assert_eq!(shown, overlay);
            assert_eq!(prior_dismiss, None);
        }
        other => panic!("unexpected command {other:?}"),
    }

    h.user.dismiss_dialog(overlay_id).await;
    assert_eq!(
        next_command(&mut h.commands).await,
        Command::DismissDialog(overlay_id)
    );
    settle().await;
    assert_eq!(h.current_key(), HOME, "overlays never touch the stack");
}

#[tokio::test(start_paused = true)]
async fn back_is_validated_against_the_node_that_becomes_current() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(SETTINGS)).await;
    let _ = next_command(&mut h.commands).await;
    h.user.navigate_back().await;
    let _ = next_command(&mut h.commands).await;

    let back_validated = h
        .log
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|(kind, _)| kind == "back")
        .map(|(_, key)| *key);
    assert_eq!(back_validated, Some(ROOT), "pop happens before validation");
}

#[tokio::test(start_paused = true)]
async fn merged_chain_priorities_order_the_prefixes() {
    // Insertion order low-then-high; the handed-out order must be
    // high-then-low.
    let low = Intent::NavigateTo {
        route: route(HOME),
        options: NavOptions::push(),
        sender: Sender::System,
        priority: priority::SYSTEM_DEFAULT,
    };
    let validator = Scripted::passing().with_script(
        PROFILE,
        ValidationResult::Redirect {
            original: user_navigate_intent(PROFILE),
            chain: vec![low, login_prefix()],
        },
    );
    let mut h = HarnessBuilder::new().validator(validator).build();

    h.user.navigate(route(PROFILE)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), LOGIN),
        other => panic!("unexpected command {other:?}"),
    }

    h.system.complete_transaction(route(LOGIN)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), HOME),
        other => panic!("unexpected command {other:?}"),
    }

    h.system.complete_transaction(route(HOME)).await;
    match next_command(&mut h.commands).await {
        Command::NavigateTo { route, .. } => assert_eq!(route.key(), PROFILE),
        other => panic!("unexpected command {other:?}"),
    }
}

struct Counting {
    intents: std::sync::Arc<std::sync::atomic::AtomicU64>,
    commands: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl core_intent::IntentObserver for Counting {
    fn on_intent(&self, _intent: &Intent) {
        self.intents.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    fn on_command(&self, _command: &Command) {
        self.commands
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

#[tokio::test(start_paused = true)]
async fn observers_see_dispatched_intents_and_emitted_commands() {
    let intents = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let commands = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let mut h = HarnessBuilder::new()
        .observer(Counting {
            intents: intents.clone(),
            commands: commands.clone(),
        })
        .build();

    h.user.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;
    settle().await;

    assert_eq!(intents.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(commands.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn pop_up_to_validates_new_top() {
    let mut h = HarnessBuilder::new().build();

    h.user.navigate(route(HOME)).await;
    let _ = next_command(&mut h.commands).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.user.navigate(route(SETTINGS)).await;
    let _ = next_command(&mut h.commands).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.user.navigate(route(PROFILE)).await;
    let _ = next_command(&mut h.commands).await;

    h.user.pop_up_to(route(HOME), false).await;
    match next_command(&mut h.commands).await {
        Command::PopUpTo { route, inclusive } => {
            assert_eq!(route.key(), HOME);
            assert!(!inclusive);
        }
        other => panic!("unexpected command {other:?}"),
    }
    settle().await;
    assert_eq!(h.current_key(), HOME);

    // The new top went through validation.
    let last_validated = h
        .log
        .lock()
        .unwrap()
        .iter()
        .rev()
        .find(|(kind, _)| kind == "pop_up_to")
        .map(|(_, key)| *key);
    assert_eq!(last_validated, Some(HOME));
}
