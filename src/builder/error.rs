//! Errors raised while building a machine from its configuration.

use thiserror::Error;

/// Errors that make a machine configuration invalid.
///
/// Construction either yields a fully validated machine or fails; there is
/// never a partial machine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Transition target '{target}' from state '{state}' does not resolve to any state")]
    UnresolvedTarget { state: String, target: String },

    #[error("Compound state '{state}' has no initial state. Set `initial` to one of its children")]
    MissingInitial { state: String },

    #[error("Initial state '{initial}' of '{state}' is not a child of it")]
    InvalidInitial { state: String, initial: String },

    #[error("Id '{id}' is used by more than one state or invocation")]
    DuplicateId { id: String },

    #[error("State '{state}' is declared {kind} but has child states")]
    LeafWithChildren { state: String, kind: String },

    #[error("History state '{state}' is invalid: {reason}")]
    InvalidHistory { state: String, reason: String },

    #[error("State '{state}' references unknown guard '{guard}'")]
    UnknownGuard { state: String, guard: String },

    #[error("State '{state}' references unknown action '{action}'")]
    UnknownAction { state: String, action: String },

    #[error("State '{state}' invokes unknown service '{service}'")]
    UnknownService { state: String, service: String },

    #[error("State '{state}' references unknown activity '{activity}'")]
    UnknownActivity { state: String, activity: String },

    #[error("State '{state}' references unknown delay '{delay}'")]
    UnknownDelay { state: String, delay: String },

    #[error("State '{state}' references unknown data mapper '{mapper}'")]
    UnknownDataMapper { state: String, mapper: String },

    #[error("Condition `in: {descriptor}` on a transition from '{state}' does not resolve to any state")]
    UnresolvedInState { state: String, descriptor: String },

    #[error("Initial context could not be decoded: {0}")]
    InvalidContext(String),

    #[error("Machine configuration could not be parsed: {0}")]
    Parse(String),

    #[error("{} problems in machine definition: {}", .0.len(), join(.0))]
    Multiple(Vec<DefinitionError>),
}

fn join(errors: &[DefinitionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DefinitionError {
    /// Every individual problem, flattening `Multiple`.
    pub fn errors(&self) -> Vec<&DefinitionError> {
        match self {
            DefinitionError::Multiple(errors) => errors.iter().flat_map(|e| e.errors()).collect(),
            other => vec![other],
        }
    }

    pub(crate) fn from_many(mut errors: Vec<DefinitionError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            DefinitionError::Multiple(errors)
        }
    }
}
