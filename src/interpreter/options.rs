//! Interpreter settings.

use crate::engine::DEFAULT_MAX_MICROSTEPS;
use serde::{Deserialize, Serialize};

/// Settings of one interpreter.
///
/// Every field has a default, so partial JSON is accepted.
///
/// # Example
///
/// ```rust
/// use harel::interpreter::InterpreterOptions;
///
/// let options: InterpreterOptions = serde_json::from_str(r#"{ "deferEvents": false }"#).unwrap();
/// assert!(!options.defer_events);
/// assert_eq!(options.max_microsteps, 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterpreterOptions {
    /// Bound on microsteps per processed event
    pub max_microsteps: usize,
    /// Queue events sent before `start` instead of rejecting them
    pub defer_events: bool,
    /// Keep a transition log of every committed change
    pub record_transitions: bool,
    /// Run effect, send and log actions; when off, only assign and raise
    /// actions (part of the step itself) have any effect
    pub execute_actions: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_microsteps: DEFAULT_MAX_MICROSTEPS,
            defer_events: true,
            record_transitions: true,
            execute_actions: true,
        }
    }
}

impl InterpreterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_microsteps(mut self, limit: usize) -> Self {
        self.max_microsteps = limit;
        self
    }

    pub fn defer_events(mut self, defer: bool) -> Self {
        self.defer_events = defer;
        self
    }

    pub fn record_transitions(mut self, record: bool) -> Self {
        self.record_transitions = record;
        self
    }

    pub fn execute_actions(mut self, execute: bool) -> Self {
        self.execute_actions = execute;
        self
    }
}
