//! Harel: a hierarchical state machine engine
//!
//! Harel is built on the "pure core, imperative shell" split. Resolving
//! configurations and computing transitions are pure functions over an
//! immutable machine definition; timers, invoked services, effect actions and
//! subscribers live in an interpreter that owns one running instance.
//!
//! # Core Concepts
//!
//! - **Machine**: validated tree of atomic, compound, parallel, final and
//!   history states, built from a declarative configuration
//! - **Configuration**: the set of active states, always closed under
//!   ancestors, initial children and parallel regions
//! - **Step**: one event processed to completion, as data
//! - **Interpreter**: runs steps, effects, timers and services
//!
//! # Example
//!
//! ```rust
//! use harel::builder::{MachineBuilder, MachineOptions, StateNodeConfig};
//! use harel::interpreter::Interpreter;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Default, Serialize, Deserialize)]
//! struct Crossing {
//!     walk_signals: u32,
//! }
//!
//! let config = StateNodeConfig::compound("green")
//!     .state("green", StateNodeConfig::atomic().on("TIMER", "yellow"))
//!     .state("yellow", StateNodeConfig::atomic().on("TIMER", "red"))
//!     .state(
//!         "red",
//!         StateNodeConfig::compound("walk")
//!             .state("walk", StateNodeConfig::atomic().entry("signalWalk").on("PED_TIMER", "wait"))
//!             .state("wait", StateNodeConfig::atomic())
//!             .on("TIMER", "green"),
//!     )
//!     .into_machine("light");
//!
//! let options = MachineOptions::<Crossing>::new()
//!     .assign("signalWalk", |ctx, _| ctx.walk_signals += 1);
//! let machine = MachineBuilder::new(config)
//!     .options(options)
//!     .context(Crossing::default())
//!     .build()
//!     .unwrap();
//!
//! let mut light = Interpreter::new(machine);
//! light.start().unwrap();
//! for _ in 0..2 {
//!     light.send("TIMER").unwrap();
//! }
//!
//! let state = light.snapshot().unwrap();
//! assert!(state.matches("red.walk"));
//! assert_eq!(state.context.walk_signals, 1);
//! ```

pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod engine;
pub mod interpreter;
pub mod machine;
pub mod registry;

// Re-export commonly used types
pub use builder::{DefinitionError, MachineBuilder, MachineConfig, MachineOptions, StateNodeConfig};
pub use core::{Event, State, StateValue};
pub use interpreter::{Interpreter, InterpreterError, InterpreterOptions};
pub use machine::Machine;
