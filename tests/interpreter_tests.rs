//! Scenario tests for the interpreter: effects, timers, services,
//! activities, listeners and checkpoints.

mod common;

use common::Recorder;
use harel::builder::{InvokeConfig, MachineBuilder, MachineOptions, StateNodeConfig, TransitionConfig};
use harel::checkpoint::Checkpoint;
use harel::core::{Disposer, GuardError};
use harel::engine::StepError;
use harel::interpreter::{Interpreter, InterpreterError, InterpreterOptions, InterpreterStatus, ServiceError};
use harel::machine::Machine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Paused time advances in whole milliseconds.
fn assert_elapsed(since: Instant, millis: u64) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= Duration::from_millis(millis) && elapsed < Duration::from_millis(millis + 5),
        "expected ~{millis}ms, got {elapsed:?}"
    );
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Crossing {
    cycles: u32,
    wait_ms: u64,
}

/// green → yellow after 1s, yellow → red after 500ms, red → green on TIMER.
fn timed_light(log: Recorder) -> Machine<Crossing> {
    let config = StateNodeConfig::compound("green")
        .state(
            "green",
            StateNodeConfig::atomic()
                .entry("countCycle")
                .exit("leaveGreen")
                .after_ms(1000, "yellow"),
        )
        .state("yellow", StateNodeConfig::atomic().after_ms(500, "red"))
        .state(
            "red",
            StateNodeConfig::compound("walk")
                .state("walk", StateNodeConfig::atomic().entry("signalWalk"))
                .after("PATIENCE", "green"),
        )
        .into_machine("light");

    let exit_log = log.clone();
    let options = MachineOptions::new()
        .assign("countCycle", |ctx: &mut Crossing, _| ctx.cycles += 1)
        .action("leaveGreen", move |_, _| exit_log.push("leaveGreen"))
        .action("signalWalk", move |ctx: &Crossing, _| log.push(format!("walk after {} cycles", ctx.cycles)))
        .delay("PATIENCE", |ctx: &Crossing, _| Duration::from_millis(ctx.wait_ms));
    MachineBuilder::new(config)
        .options(options)
        .context(Crossing {
            cycles: 0,
            wait_ms: 2000,
        })
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn delayed_transitions_fire_after_their_delay() {
    common::init_tracing();
    let log = Recorder::default();
    let mut light = Interpreter::new(timed_light(log.clone()));
    let started = Instant::now();
    light.start().unwrap();
    assert_eq!(light.pending_timers(), 1);

    light.run_next().await.unwrap().unwrap();
    assert!(light.snapshot().unwrap().matches("yellow"));
    assert_elapsed(started, 1000);

    light.run_next().await.unwrap().unwrap();
    assert!(light.snapshot().unwrap().matches("red.walk"));
    assert_elapsed(started, 1500);

    light.run_next().await.unwrap().unwrap();
    let state = light.snapshot().unwrap();
    assert!(state.matches("green"));
    assert_eq!(state.context.cycles, 2);
    assert_elapsed(started, 3500);
    assert_eq!(log.entries(), vec!["leaveGreen", "walk after 1 cycles"]);
}

#[tokio::test(start_paused = true)]
async fn timers_are_cancelled_when_their_state_is_exited() {
    let config = StateNodeConfig::compound("waiting")
        .state(
            "waiting",
            StateNodeConfig::atomic()
                .after_ms(1000, "timedOut")
                .on("RESPOND", "answered"),
        )
        .state("timedOut", StateNodeConfig::atomic())
        .state("answered", StateNodeConfig::atomic())
        .into_machine("request");
    let machine = MachineBuilder::<()>::new(config).build().unwrap();

    let mut request = Interpreter::new(machine);
    request.start().unwrap();
    request.send("RESPOND").unwrap();
    assert_eq!(request.pending_timers(), 0);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(request.process_mailbox().unwrap(), 0);
    assert!(request.run_next().await.is_none());
    assert!(request.snapshot().unwrap().matches("answered"));
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Download {
    progress: u32,
    bytes: Option<u64>,
    error: Option<String>,
}

fn downloader(options: MachineOptions<Download>) -> Machine<Download> {
    let config = StateNodeConfig::compound("loading")
        .state(
            "loading",
            StateNodeConfig::atomic()
                .invoke(
                    InvokeConfig::new("download")
                        .id("dl")
                        .on_done(TransitionConfig::to("loaded").action("storeBytes"))
                        .on_error(TransitionConfig::to("failed").action("storeError")),
                )
                .on("PROGRESS", TransitionConfig::targetless().action("bump"))
                .on("CANCEL", "cancelled"),
        )
        .state("loaded", StateNodeConfig::final_state())
        .state("failed", StateNodeConfig::final_state())
        .state("cancelled", StateNodeConfig::atomic())
        .into_machine("downloader");
    let base = MachineOptions::new()
        .assign("bump", |ctx: &mut Download, _| ctx.progress += 1)
        .assign("storeBytes", |ctx: &mut Download, event| {
            ctx.bytes = event.data["bytes"].as_u64();
        })
        .assign("storeError", |ctx: &mut Download, event| {
            ctx.error = event.data.as_str().map(String::from);
        });
    MachineBuilder::new(config)
        .options(base.merge(options))
        .context(Download::default())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn service_results_and_emissions_reach_the_machine() {
    let options = MachineOptions::new().service("download", |_: &Download, _, handle| async move {
        for _ in 0..3 {
            handle.send("PROGRESS");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(json!({ "bytes": 42 }))
    });
    let mut interpreter = Interpreter::new(downloader(options));
    interpreter.start().unwrap();
    assert_eq!(interpreter.running_services(), 1);

    interpreter.run_until_done().await.unwrap();
    let state = interpreter.snapshot().unwrap();
    assert!(state.matches("loaded"));
    assert_eq!(state.context.progress, 3);
    assert_eq!(state.context.bytes, Some(42));
    assert_eq!(interpreter.status(), InterpreterStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn service_failures_become_error_events() {
    let options = MachineOptions::new().service("download", |_: &Download, _, _| async {
        Err::<serde_json::Value, _>(ServiceError::new("offline"))
    });
    let mut interpreter = Interpreter::new(downloader(options));
    interpreter.start().unwrap();
    interpreter.run_until_done().await.unwrap();

    let state = interpreter.snapshot().unwrap();
    assert!(state.matches("failed"));
    assert_eq!(state.context.error.as_deref(), Some("offline"));
}

#[tokio::test(start_paused = true)]
async fn leaving_the_invoking_state_cancels_the_service() {
    let options = MachineOptions::new().service("download", |_: &Download, _, _| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({ "bytes": 1 }))
    });
    let mut interpreter = Interpreter::new(downloader(options));
    interpreter.start().unwrap();
    interpreter.send("CANCEL").unwrap();

    assert_eq!(interpreter.running_services(), 0);
    assert!(interpreter.run_next().await.is_none());
    assert!(interpreter.snapshot().unwrap().matches("cancelled"));
    assert_eq!(interpreter.snapshot().unwrap().context.bytes, None);
}

#[test]
fn activities_run_while_their_state_is_active() {
    let running = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&running);
    let config = StateNodeConfig::compound("idle")
        .state("idle", StateNodeConfig::atomic().on("ALARM", "beeping"))
        .state(
            "beeping",
            StateNodeConfig::atomic().activity("beep").on("SNOOZE", "idle"),
        )
        .into_machine("alarm");
    let options = MachineOptions::<()>::new().activity("beep", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&counter);
        Box::new(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        }) as Disposer
    });
    let machine = MachineBuilder::new(config).options(options).build().unwrap();

    let mut alarm = Interpreter::new(machine);
    alarm.start().unwrap();
    alarm.send("ALARM").unwrap();
    assert_eq!(running.load(Ordering::SeqCst), 1);
    alarm.send("SNOOZE").unwrap();
    assert_eq!(running.load(Ordering::SeqCst), 0);

    alarm.send("ALARM").unwrap();
    alarm.stop();
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[test]
fn effects_see_the_context_of_the_whole_step() {
    let seen = Recorder::default();
    let sink = seen.clone();
    let config = StateNodeConfig::compound("a")
        .state(
            "a",
            StateNodeConfig::atomic()
                .on("GO", TransitionConfig::to("b").action("report").action("inc")),
        )
        .state("b", StateNodeConfig::atomic())
        .into_machine("order");
    let options = MachineOptions::new()
        .action("report", move |ctx: &u32, _| sink.push(ctx.to_string()))
        .assign("inc", |ctx: &mut u32, _| *ctx += 1);
    let machine = MachineBuilder::new(config).options(options).context(0u32).build().unwrap();

    let mut interpreter = Interpreter::new(machine);
    interpreter.start().unwrap();
    interpreter.send("GO").unwrap();
    assert_eq!(seen.entries(), vec!["1"]);
}

#[test]
fn effects_are_skipped_when_execution_is_disabled() {
    let seen = Recorder::default();
    let sink = seen.clone();
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("GO", TransitionConfig::to("b").action("report")))
        .state("b", StateNodeConfig::atomic())
        .into_machine("quiet");
    let options = MachineOptions::<()>::new().action("report", move |_, _| sink.push("ran"));
    let machine = MachineBuilder::new(config).options(options).build().unwrap();

    let mut interpreter =
        Interpreter::with_options(machine, InterpreterOptions::new().execute_actions(false));
    interpreter.start().unwrap();
    interpreter.send("GO").unwrap();
    assert!(interpreter.snapshot().unwrap().matches("b"));
    assert_eq!(seen.len(), 0);
}

#[test]
fn failed_steps_are_rolled_back_and_reported() {
    let config = StateNodeConfig::compound("a")
        .state(
            "a",
            StateNodeConfig::atomic()
                .on("GO", TransitionConfig::to("b").guard("flaky"))
                .on("SAFE", "c"),
        )
        .state("b", StateNodeConfig::atomic())
        .state("c", StateNodeConfig::atomic())
        .into_machine("flaky");
    let options = MachineOptions::<()>::new().try_guard("flaky", |_, _| Err(GuardError::new("db down")));
    let machine = MachineBuilder::new(config).options(options).build().unwrap();

    let errors = Recorder::default();
    let sink = errors.clone();
    let mut interpreter = Interpreter::new(machine);
    interpreter.on_error(move |error| sink.push(error.to_string()));
    interpreter.start().unwrap();

    let err = interpreter.send("GO").unwrap_err();
    assert!(matches!(err, InterpreterError::Step(StepError::Evaluation(_))));
    assert_eq!(errors.len(), 1);
    assert!(interpreter.snapshot().unwrap().matches("a"));
    assert_eq!(interpreter.status(), InterpreterStatus::Running);

    interpreter.send("SAFE").unwrap();
    assert!(interpreter.snapshot().unwrap().matches("c"));
}

#[test]
fn runaway_eventless_cycles_are_rejected() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("LOOP", "b"))
        .state("b", StateNodeConfig::atomic().always("c"))
        .state("c", StateNodeConfig::atomic().always("b"))
        .into_machine("spin");
    let machine = MachineBuilder::<()>::new(config).build().unwrap();

    let mut interpreter =
        Interpreter::with_options(machine, InterpreterOptions::new().max_microsteps(20));
    interpreter.start().unwrap();
    let err = interpreter.send("LOOP").unwrap_err();
    assert!(matches!(err, InterpreterError::Step(StepError::InfiniteLoop(_))));
    assert!(interpreter.snapshot().unwrap().matches("a"));
}

#[test]
fn subscribers_receive_the_current_state_immediately() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("GO", "b"))
        .state("b", StateNodeConfig::atomic())
        .into_machine("sub");
    let machine = MachineBuilder::<()>::new(config).build().unwrap();

    let mut interpreter = Interpreter::new(machine);
    interpreter.start().unwrap();
    let seen = Recorder::default();
    let sink = seen.clone();
    interpreter.subscribe(move |state| sink.push(state.value.to_string()));
    assert_eq!(seen.entries(), vec!["a"]);

    interpreter.send("GO").unwrap();
    assert_eq!(seen.entries(), vec!["a", "b"]);
}

#[test]
fn final_output_is_exposed_on_the_last_snapshot() {
    let config = StateNodeConfig::compound("working")
        .state("working", StateNodeConfig::atomic().on("FINISH", "done"))
        .state("done", StateNodeConfig::final_state().data("result"))
        .into_machine("job");
    let options = MachineOptions::new().data("result", |ctx: &u32, _| json!({ "total": ctx }));
    let machine = MachineBuilder::new(config).options(options).context(7u32).build().unwrap();

    let mut interpreter = Interpreter::new(machine);
    interpreter.start().unwrap();
    interpreter.send("FINISH").unwrap();
    let state = interpreter.snapshot().unwrap();
    assert!(state.done);
    assert_eq!(state.output, Some(json!({ "total": 7 })));
    assert_eq!(interpreter.status(), InterpreterStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn restored_interpreters_resume_timers_without_reentering() {
    let log = Recorder::default();
    let machine = Arc::new(timed_light(log.clone()));

    let mut light = Interpreter::new(Arc::clone(&machine));
    light.start().unwrap();
    light.run_next().await.unwrap().unwrap();
    assert!(light.snapshot().unwrap().matches("yellow"));
    let json = light.checkpoint().unwrap().to_json().unwrap();
    light.stop();

    let checkpoint: Checkpoint<Crossing> = Checkpoint::from_json(&json).unwrap();
    let started = Instant::now();
    let mut restored =
        Interpreter::restore(Arc::clone(&machine), &checkpoint, InterpreterOptions::default()).unwrap();
    assert_eq!(restored.status(), InterpreterStatus::Running);
    assert_eq!(restored.pending_timers(), 1);
    assert_eq!(restored.snapshot().unwrap().context.cycles, 1);
    assert_eq!(restored.transitions().len(), light.transitions().len());

    restored.run_next().await.unwrap().unwrap();
    assert!(restored.snapshot().unwrap().matches("red.walk"));
    assert_elapsed(started, 500);
    assert_eq!(log.entries(), vec!["leaveGreen", "walk after 1 cycles"]);
}

#[tokio::test]
async fn checkpoints_of_other_machines_are_refused() {
    let machine = timed_light(Recorder::default());
    let mut light = Interpreter::new(machine.clone());
    light.start().unwrap();
    let mut checkpoint = light.checkpoint().unwrap();
    checkpoint.machine_id = "elsewhere".into();

    assert!(matches!(
        Interpreter::restore(machine, &checkpoint, InterpreterOptions::default()),
        Err(InterpreterError::Checkpoint(_))
    ));
}

fn editor() -> Machine<()> {
    let config = StateNodeConfig::parallel()
        .state(
            "bold",
            StateNodeConfig::compound("off")
                .state("off", StateNodeConfig::atomic().on("BOLD", "on"))
                .state("on", StateNodeConfig::atomic().on("BOLD", "off")),
        )
        .state(
            "cursor",
            StateNodeConfig::compound("idle")
                .state("idle", StateNodeConfig::atomic().on("TYPE", "typing"))
                .state("typing", StateNodeConfig::atomic()),
        )
        .into_machine("editor");
    MachineBuilder::new(config).build().unwrap()
}

#[test]
fn parallel_configurations_survive_a_checkpoint() {
    let machine = Arc::new(editor());
    let mut session = Interpreter::new(Arc::clone(&machine));
    session.start().unwrap();
    session.send("BOLD").unwrap();
    session.send("TYPE").unwrap();
    let json = session.checkpoint().unwrap().to_json().unwrap();

    let checkpoint: Checkpoint<()> = Checkpoint::from_json(&json).unwrap();
    checkpoint.validate(&machine).unwrap();
    let mut restored =
        Interpreter::restore(Arc::clone(&machine), &checkpoint, InterpreterOptions::default()).unwrap();
    let state = restored.snapshot().unwrap();
    assert!(state.matches("bold.on"));
    assert!(!state.matches("bold.off"));
    assert!(state.matches("cursor.typing"));
    assert_eq!(state.to_strings(), session.snapshot().unwrap().to_strings());

    restored.send("BOLD").unwrap();
    assert!(restored.snapshot().unwrap().matches("bold.off"));
}
