//! Errors raised while computing a step.
//!
//! A failed step never commits anything: configuration, context and history
//! stay exactly as they were before the event.

use crate::core::{ActionError, GuardError};
use thiserror::Error;

/// A guard, action or data mapper failed during a step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("Guard '{guard}' on a transition from '{state}' failed: {source}")]
    Guard {
        state: String,
        guard: String,
        source: GuardError,
    },

    #[error("Action '{action}' in '{state}' failed: {source}")]
    Action {
        state: String,
        action: String,
        source: ActionError,
    },

    #[error("Done data of final state '{state}' could not be computed: {source}")]
    DoneData { state: String, source: ActionError },
}

/// Eventless transitions or raised events did not settle within the bound.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Event '{event}' did not settle within {limit} microsteps")]
pub struct InfiniteLoopError {
    pub event: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    InfiniteLoop(#[from] InfiniteLoopError),

    /// Strict machines only accept event types some node listens on.
    #[error("Machine '{machine}' does not accept event '{event}'")]
    UnknownEvent { machine: String, event: String },

    #[error("Machine '{machine}' has no state with id '{state}'")]
    UnknownState { machine: String, state: String },
}
