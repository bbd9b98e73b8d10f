//! Machine definitions: configuration, named implementations and validation.
//!
//! A machine is described by a [`MachineConfig`] (built fluently or parsed
//! from JSON) that only *names* guards, actions, services and so on. The
//! code behind those names is supplied through [`MachineOptions`], and
//! [`MachineBuilder`] links the two into an immutable, validated
//! [`Machine`](crate::machine::Machine).
//!
//! # Example
//!
//! ```rust
//! use harel::builder::{MachineBuilder, MachineOptions, StateNodeConfig, TransitionConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Default, Serialize, Deserialize)]
//! struct Door {
//!     locked: bool,
//! }
//!
//! let config = StateNodeConfig::compound("closed")
//!     .state(
//!         "closed",
//!         StateNodeConfig::atomic()
//!             .on("OPEN", TransitionConfig::to("opened").guard("unlocked"))
//!             .on("LOCK", TransitionConfig::targetless().action("lock")),
//!     )
//!     .state("opened", StateNodeConfig::atomic().on("CLOSE", "closed"))
//!     .into_machine("door");
//!
//! let options = MachineOptions::<Door>::new()
//!     .guard("unlocked", |door, _| !door.locked)
//!     .assign("lock", |door, _| door.locked = true);
//!
//! let machine = MachineBuilder::new(config)
//!     .options(options)
//!     .context(Door::default())
//!     .build()
//!     .unwrap();
//!
//! let state = machine.initial_state().unwrap();
//! let state = machine.transition_state(&state, "LOCK").unwrap();
//! let state = machine.transition_state(&state, "OPEN").unwrap();
//! assert!(state.matches("closed"));
//! ```

pub mod config;
pub mod error;
pub mod machine;
pub mod options;

pub use config::{
    HistoryConfig, HistoryKind, InvokeConfig, MachineConfig, NodeType, OrderedMap,
    StateNodeConfig, TransitionConfig, Transitions,
};
pub use error::DefinitionError;
pub use machine::{MachineBuilder, DEFAULT_MACHINE_ID};
pub use options::{Delay, MachineOptions};
