//! Traffic Light Statechart
//!
//! This example drives a pedestrian crossing with timers.
//!
//! Key concepts:
//! - Compound states (red has walk/wait children)
//! - Delayed transitions, fixed and named
//! - Assign actions updating context inside a step
//! - Effect actions running once the step has settled
//! - Checkpointing a running interpreter
//!
//! Run with: cargo run --example traffic_light

use harel::builder::{MachineBuilder, MachineOptions, StateNodeConfig};
use harel::interpreter::Interpreter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Crossing {
    cycles: u32,
    walk_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== Traffic Light Statechart ===\n");

    let config = StateNodeConfig::compound("green")
        .state(
            "green",
            StateNodeConfig::atomic()
                .entry("countCycle")
                .after_ms(300, "yellow")
                .on("EMERGENCY", "red"),
        )
        .state("yellow", StateNodeConfig::atomic().after_ms(100, "red"))
        .state(
            "red",
            StateNodeConfig::compound("walk")
                .state(
                    "walk",
                    StateNodeConfig::atomic()
                        .entry("announceWalk")
                        .after("WALK", "wait"),
                )
                .state("wait", StateNodeConfig::atomic().after_ms(100, "#light.green")),
        )
        .into_machine("light");

    let options = MachineOptions::new()
        .assign("countCycle", |ctx: &mut Crossing, _| ctx.cycles += 1)
        .action("announceWalk", |ctx: &Crossing, _| {
            println!("  (pedestrians may cross, cycle {})", ctx.cycles)
        })
        .delay("WALK", |ctx: &Crossing, _| Duration::from_millis(ctx.walk_ms));

    let machine = MachineBuilder::new(config)
        .options(options)
        .context(Crossing {
            cycles: 0,
            walk_ms: 200,
        })
        .build()
        .unwrap();

    println!("Machine '{}' with states:", machine.id());
    for path in machine.state_paths() {
        println!("  {path}");
    }
    println!();

    let mut light = Interpreter::new(machine);
    light.subscribe(|state| println!("-> {}", state.value));
    light.start().unwrap();

    // Two full cycles: green, yellow, red.walk, red.wait, green, ...
    for _ in 0..8 {
        if let Some(Err(error)) = light.run_next().await {
            println!("step failed: {error}");
        }
    }

    println!("\nEmergency stop:");
    light.send("EMERGENCY").unwrap();

    let checkpoint = light.checkpoint().unwrap();
    println!("\nCheckpoint after {} transitions:", checkpoint.transitions.len());
    println!("{}", checkpoint.to_json().unwrap());

    light.stop();
    println!("\n=== Example Complete ===");
}
