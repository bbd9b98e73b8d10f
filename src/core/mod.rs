//! Core value types shared by every layer of the engine.
//!
//! - Events and the selectors transitions listen on
//! - Guards, actions, activities and data mappers
//! - State values and the `State` snapshot handed to subscribers
//! - The immutable transition log
//!
//! Nothing in this module performs I/O or keeps mutable global state.

mod action;
mod context;
mod event;
mod guard;
mod history;
mod state;
mod value;

pub use action::{Action, ActionError, Activity, DataMapper, Disposer};
pub use context::Context;
pub use event::{
    Event, EventSelector, AFTER_PREFIX, DONE_INVOKE_PREFIX, DONE_STATE_PREFIX,
    ERROR_INVOKE_PREFIX, INIT_EVENT, STOP_EVENT,
};
pub use guard::{Guard, GuardError};
pub use history::{TransitionLog, TransitionRecord};
pub use state::State;
pub use value::{StateValue, DEFAULT_DELIMITER};

pub(crate) use event::{is_generated_type, parse_delay_millis};
