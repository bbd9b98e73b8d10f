//! Scenario tests for the pure engine: configurations, history, parallel
//! regions, priorities and error rollback, without an interpreter.

mod common;

use harel::builder::{HistoryKind, MachineBuilder, MachineOptions, StateNodeConfig, TransitionConfig};
use harel::core::{Event, GuardError, State};
use harel::engine::StepError;
use harel::machine::Machine;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    count: u32,
}

fn build<C: harel::core::Context>(
    config: harel::builder::MachineConfig,
    options: MachineOptions<C>,
    context: C,
) -> Machine<C> {
    MachineBuilder::new(config)
        .options(options)
        .context(context)
        .build()
        .unwrap()
}

fn traffic_light() -> Machine<Counter> {
    let config = StateNodeConfig::compound("green")
        .state(
            "green",
            StateNodeConfig::atomic().exit("leaveGreen").on("TIMER", "red"),
        )
        .state(
            "red",
            StateNodeConfig::compound("walk")
                .state(
                    "walk",
                    StateNodeConfig::atomic().entry("signalWalk").on("PED_TIMER", "wait"),
                )
                .state("wait", StateNodeConfig::atomic())
                .on("TIMER", "green"),
        )
        .into_machine("light");
    let options = MachineOptions::new()
        .action("leaveGreen", |_, _| {})
        .assign("signalWalk", |ctx: &mut Counter, _| ctx.count += 1);
    build(config, options, Counter::default())
}

#[test]
fn entering_a_compound_state_enters_its_initial_child() {
    common::init_tracing();
    let machine = traffic_light();
    let state = machine.initial_state().unwrap();
    let next = machine.transition_state(&state, "TIMER").unwrap();

    assert_eq!(next.to_strings(), vec!["red", "red.walk"]);
    assert_eq!(next.actions, vec!["leaveGreen", "signalWalk"]);
    assert_eq!(next.context.count, 1);
    assert!(next.changed);
}

#[test]
fn parent_transitions_apply_from_any_child() {
    let machine = traffic_light();
    let mut state = machine.initial_state().unwrap();
    for event in ["TIMER", "PED_TIMER", "TIMER"] {
        state = machine.transition_state(&state, event).unwrap();
    }
    assert_eq!(state.to_strings(), vec!["green"]);
}

#[test]
fn states_round_trip_through_json() {
    let machine = traffic_light();
    let state = machine.initial_state().unwrap();
    let state = machine.transition_state(&state, "TIMER").unwrap();

    let json = serde_json::to_string(&state).unwrap();
    let decoded: State<Counter> = serde_json::from_str(&json).unwrap();
    let next = machine.transition_state(&decoded, "PED_TIMER").unwrap();
    assert!(next.matches("red.wait"));
}

fn upload() -> Machine<Counter> {
    let region = |name: &str| {
        StateNodeConfig::compound("pending")
            .state("pending", StateNodeConfig::atomic().on(name, "complete"))
            .state("complete", StateNodeConfig::final_state())
    };
    let config = StateNodeConfig::compound("uploading")
        .state(
            "uploading",
            StateNodeConfig::parallel()
                .state("file", region("FILE_DONE"))
                .state("thumbnail", region("THUMB_DONE"))
                .on_done(TransitionConfig::to("finished").action("count")),
        )
        .state("finished", StateNodeConfig::final_state().data("summary"))
        .into_machine("upload");
    let options = MachineOptions::new()
        .assign("count", |ctx: &mut Counter, _| ctx.count += 1)
        .data("summary", |ctx: &Counter, _| json!({ "uploads": ctx.count }));
    build(config, options, Counter::default())
}

#[test]
fn parallel_regions_are_entered_together() {
    let machine = upload();
    let state = machine.initial_state().unwrap();
    assert_eq!(
        state.to_strings(),
        vec![
            "uploading",
            "uploading.file",
            "uploading.file.pending",
            "uploading.thumbnail",
            "uploading.thumbnail.pending",
        ]
    );
}

#[test]
fn parallel_state_completes_when_every_region_is_final() {
    let machine = upload();
    let state = machine.initial_state().unwrap();

    let state = machine.transition_state(&state, "FILE_DONE").unwrap();
    assert!(state.matches("uploading.file.complete"));
    assert!(state.matches("uploading.thumbnail.pending"));
    assert!(!state.done);

    let state = machine.transition_state(&state, "THUMB_DONE").unwrap();
    assert_eq!(state.to_strings(), vec!["finished"]);
    assert!(state.done);
    assert_eq!(state.output, Some(json!({ "uploads": 1 })));
    assert_eq!(state.event.event_type, "THUMB_DONE");
}

#[test]
fn done_machines_ignore_further_events() {
    let machine = upload();
    let mut state = machine.initial_state().unwrap();
    for event in ["FILE_DONE", "THUMB_DONE"] {
        state = machine.transition_state(&state, event).unwrap();
    }
    let after = machine.transition_state(&state, "FILE_DONE").unwrap();
    assert!(!after.changed);
    assert_eq!(after.value, state.value);
}

fn player() -> Machine<()> {
    let config = StateNodeConfig::compound("stopped")
        .state(
            "stopped",
            StateNodeConfig::atomic()
                .on("PLAY", "playing")
                .on("RESUME_SHALLOW", "playing.shallow")
                .on("RESUME_DEEP", "playing.deep"),
        )
        .state(
            "playing",
            StateNodeConfig::compound("normal")
                .state("normal", StateNodeConfig::atomic().on("FAST", "fast"))
                .state(
                    "fast",
                    StateNodeConfig::compound("x2")
                        .state("x2", StateNodeConfig::atomic().on("BOOST", "x4"))
                        .state("x4", StateNodeConfig::atomic()),
                )
                .state("shallow", StateNodeConfig::history(HistoryKind::Shallow))
                .state("deep", StateNodeConfig::history(HistoryKind::Deep))
                .on("STOP", "stopped"),
        )
        .into_machine("player");
    build(config, MachineOptions::new(), ())
}

fn play(machine: &Machine<()>, events: &[&str]) -> State<()> {
    let mut state = machine.initial_state().unwrap();
    for event in events {
        state = machine.transition_state(&state, *event).unwrap();
    }
    state
}

#[test]
fn history_without_memory_enters_the_default() {
    let machine = player();
    let state = play(&machine, &["RESUME_SHALLOW"]);
    assert!(state.matches("playing.normal"));
}

#[test]
fn shallow_history_restores_the_child_but_not_below() {
    let machine = player();
    let state = play(&machine, &["PLAY", "FAST", "BOOST", "STOP", "RESUME_SHALLOW"]);
    assert!(state.matches("playing.fast.x2"));
}

#[test]
fn deep_history_restores_the_full_configuration() {
    let machine = player();
    let state = play(&machine, &["PLAY", "FAST", "BOOST", "STOP", "RESUME_DEEP"]);
    assert!(state.matches("playing.fast.x4"));
    assert_eq!(
        state.history.get("player.playing.deep"),
        Some(&vec!["player.playing.fast.x4".to_string()])
    );
}

#[test]
fn in_state_conditions_gate_transitions() {
    let config = StateNodeConfig::parallel()
        .state(
            "power",
            StateNodeConfig::compound("off")
                .state("off", StateNodeConfig::atomic().on("POWER", "on"))
                .state("on", StateNodeConfig::atomic()),
        )
        .state(
            "lamp",
            StateNodeConfig::compound("dark")
                .state(
                    "dark",
                    StateNodeConfig::atomic()
                        .on("TOGGLE", TransitionConfig::to("lit").in_state("#p.power.on")),
                )
                .state("lit", StateNodeConfig::atomic()),
        )
        .into_machine("p");
    let machine = build(config, MachineOptions::<()>::new(), ());

    let state = machine.initial_state().unwrap();
    let blocked = machine.transition_state(&state, "TOGGLE").unwrap();
    assert!(!blocked.changed);

    let state = machine.transition_state(&state, "POWER").unwrap();
    let state = machine.transition_state(&state, "TOGGLE").unwrap();
    assert!(state.matches("lamp.lit"));
}

#[test]
fn exact_event_transitions_win_over_wildcards() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("*", "other").on("GO", "b"))
        .state("b", StateNodeConfig::atomic())
        .state("other", StateNodeConfig::atomic())
        .into_machine("w");
    let machine = build(config, MachineOptions::<()>::new(), ());
    let state = machine.initial_state().unwrap();

    assert!(machine.transition_state(&state, "GO").unwrap().matches("b"));
    assert!(machine.transition_state(&state, "ANYTHING").unwrap().matches("other"));
}

#[test]
fn first_enabled_transition_in_document_order_wins() {
    let config = StateNodeConfig::compound("a")
        .state(
            "a",
            StateNodeConfig::atomic()
                .on("GO", TransitionConfig::to("b").guard("never"))
                .on("GO", "c")
                .on("GO", "b"),
        )
        .state("b", StateNodeConfig::atomic())
        .state("c", StateNodeConfig::atomic())
        .into_machine("order");
    let options = MachineOptions::new().guard("never", |_: &(), _| false);
    let machine = build(config, options, ());
    let state = machine.initial_state().unwrap();
    assert!(machine.transition_state(&state, "GO").unwrap().matches("c"));
}

#[test]
fn child_transitions_take_priority_over_ancestors() {
    let config = StateNodeConfig::compound("outer")
        .state(
            "outer",
            StateNodeConfig::compound("inner")
                .state("inner", StateNodeConfig::atomic().on("GO", "#n.child_won"))
                .on("GO", "parent_won"),
        )
        .state("child_won", StateNodeConfig::atomic())
        .state("parent_won", StateNodeConfig::atomic())
        .into_machine("n");
    let machine = build(config, MachineOptions::<()>::new(), ());
    let state = machine.initial_state().unwrap();
    assert!(machine.transition_state(&state, "GO").unwrap().matches("child_won"));
}

#[test]
fn raised_events_are_processed_within_the_same_step() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("GO", TransitionConfig::to("b").action("next")))
        .state("b", StateNodeConfig::atomic().on("NEXT", "c"))
        .state("c", StateNodeConfig::atomic())
        .into_machine("raise");
    let options = MachineOptions::<()>::new().raise("next", "NEXT");
    let machine = build(config, options, ());

    let initial = machine.initial_step().unwrap().state;
    let step = machine.transition(&initial, "GO").unwrap();
    let state = machine.state_of(&step);
    assert!(state.matches("c"));
    assert_eq!(step.microsteps, 2);
    assert!(step.actions.is_empty());
}

#[test]
fn eventless_transitions_follow_guards_on_the_new_context() {
    let config = StateNodeConfig::compound("counting")
        .state(
            "counting",
            StateNodeConfig::atomic()
                .on("INC", TransitionConfig::targetless().action("inc"))
                .always(TransitionConfig::to("full").guard("isFull")),
        )
        .state("full", StateNodeConfig::final_state())
        .into_machine("cap");
    let options = MachineOptions::new()
        .assign("inc", |ctx: &mut Counter, _| ctx.count += 1)
        .guard("isFull", |ctx: &Counter, _| ctx.count >= 3);
    let machine = build(config, options, Counter::default());

    let mut state = machine.initial_state().unwrap();
    for _ in 0..2 {
        state = machine.transition_state(&state, "INC").unwrap();
        assert!(state.matches("counting"));
    }
    let state = machine.transition_state(&state, "INC").unwrap();
    assert!(state.matches("full"));
    assert!(state.done);
}

#[test]
fn guard_errors_roll_the_step_back() {
    let config = StateNodeConfig::compound("a")
        .state(
            "a",
            StateNodeConfig::atomic()
                .on("GO", TransitionConfig::to("b").guard("flaky").action("inc")),
        )
        .state("b", StateNodeConfig::atomic())
        .into_machine("rollback");
    let options = MachineOptions::new()
        .assign("inc", |ctx: &mut Counter, _| ctx.count += 1)
        .try_guard("flaky", |_: &Counter, _| Err(GuardError::new("db down")));
    let machine = build(config, options, Counter::default());

    let initial = machine.initial_step().unwrap().state;
    let err = machine.transition(&initial, "GO").unwrap_err();
    assert!(matches!(err, StepError::Evaluation(_)));
    assert!(err.to_string().contains("db down"));
    assert_eq!(initial.context.count, 0);
}

#[test]
fn eventless_cycles_hit_the_microstep_limit() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("LOOP", "b"))
        .state("b", StateNodeConfig::atomic().always("c"))
        .state("c", StateNodeConfig::atomic().always("b"))
        .into_machine("spin");
    let machine = build(config, MachineOptions::<()>::new(), ());

    let initial = machine.initial_step().unwrap().state;
    let err = machine.transition(&initial, "LOOP").unwrap_err();
    assert!(matches!(err, StepError::InfiniteLoop(_)));
}

#[test]
fn strict_machines_reject_unknown_events() {
    let config = StateNodeConfig::compound("a")
        .state("a", StateNodeConfig::atomic().on("GO", "b"))
        .state("b", StateNodeConfig::atomic())
        .into_machine("strict")
        .strict(true);
    let machine = build(config, MachineOptions::<()>::new(), ());
    let initial = machine.initial_step().unwrap().state;

    let err = machine.transition(&initial, "NOPE").unwrap_err();
    assert_eq!(
        err,
        StepError::UnknownEvent {
            machine: "strict".into(),
            event: "NOPE".into()
        }
    );
    // Accepted events that no active state handles are still fine.
    let b = machine.transition(&initial, "GO").unwrap().state;
    assert!(!machine.transition(&b, "GO").unwrap().changed);
}

#[test]
fn meta_of_active_states_is_collected() {
    let config = StateNodeConfig::compound("loading")
        .state(
            "loading",
            StateNodeConfig::atomic()
                .meta(json!({ "message": "Loading..." }))
                .on("LOADED", "ready"),
        )
        .state("ready", StateNodeConfig::atomic())
        .into_machine("fetch");
    let machine = build(config, MachineOptions::<()>::new(), ());
    let state = machine.initial_state().unwrap();

    assert_eq!(state.meta.get("fetch.loading"), Some(&json!({ "message": "Loading..." })));
    assert!(state.can("LOADED"));
    let state = machine.transition_state(&state, Event::new("LOADED")).unwrap();
    assert!(state.meta.is_empty());
}

fn clash(both_escape: bool) -> Machine<()> {
    let mut l1 = StateNodeConfig::atomic().exit("exitL1");
    if both_escape {
        l1 = l1.on("ESCAPE", TransitionConfig::to("#clash.north").action("leftWins"));
    }
    let mut both = StateNodeConfig::parallel()
        .exit("exitBoth")
        .state("left", StateNodeConfig::compound("l1").state("l1", l1))
        .state(
            "right",
            StateNodeConfig::compound("r1").state(
                "r1",
                StateNodeConfig::atomic().exit("exitR1").on(
                    "ESCAPE",
                    TransitionConfig::to("#clash.south").action("rightWins"),
                ),
            ),
        );
    if !both_escape {
        // The left region falls back to the parallel node's own handler.
        both = both.on("ESCAPE", TransitionConfig::to("north").action("parentWins"));
    }
    let config = StateNodeConfig::compound("both")
        .state("both", both)
        .state("north", StateNodeConfig::atomic())
        .state("south", StateNodeConfig::atomic())
        .into_machine("clash");
    let options = ["exitBoth", "exitL1", "exitR1", "leftWins", "rightWins", "parentWins"]
        .into_iter()
        .fold(MachineOptions::<()>::new(), |options, name| {
            options.action(name, |_, _| {})
        });
    build(config, options, ())
}

#[test]
fn conflicting_region_transitions_keep_the_earlier_one() {
    let machine = clash(true);
    let state = machine.initial_state().unwrap();
    assert!(state.matches("both.left.l1"));
    assert!(state.matches("both.right.r1"));

    let next = machine.transition_state(&state, "ESCAPE").unwrap();
    assert_eq!(next.to_strings(), vec!["north"]);
    assert_eq!(next.actions, vec!["exitR1", "exitL1", "exitBoth", "leftWins"]);
}

#[test]
fn transitions_from_a_descendant_preempt_their_ancestor() {
    let machine = clash(false);
    let state = machine.initial_state().unwrap();

    let next = machine.transition_state(&state, "ESCAPE").unwrap();
    assert_eq!(next.to_strings(), vec!["south"]);
    assert_eq!(next.actions, vec!["exitR1", "exitL1", "exitBoth", "rightWins"]);
}
