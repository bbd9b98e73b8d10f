//! Pure core: the state resolver and the transition engine.
//!
//! Nothing in this module performs I/O, spawns work or runs side effects.
//! A step returns everything the interpreter has to do as data: the next
//! state, the effect actions to run, and the nodes whose services, activities
//! and timers have to be started or stopped.

pub mod error;
pub mod resolver;
pub mod state;
pub mod step;
pub mod transition;

pub use error::{EvaluationError, InfiniteLoopError, StepError};
pub use resolver::{
    configuration_from_value, is_descendant, is_in_final_state, resolve, state_value,
};
pub use state::{Configuration, HistoryMemory, MachineState};
pub use step::{Lifecycle, PendingAction, Step};
pub use transition::{exit_all, initial_step, step, DEFAULT_MAX_MICROSTEPS};
