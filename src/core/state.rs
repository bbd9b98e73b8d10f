//! Snapshot of a running machine, as handed to subscribers.

use super::context::Context;
use super::event::Event;
use super::value::StateValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Immutable view of a machine after a step.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, StateNodeConfig};
///
/// let config = StateNodeConfig::compound("green")
///     .state("green", StateNodeConfig::atomic().on("TIMER", "red"))
///     .state(
///         "red",
///         StateNodeConfig::compound("walk").state("walk", StateNodeConfig::atomic()),
///     )
///     .into_machine("light");
/// let machine = MachineBuilder::<()>::new(config).build().unwrap();
///
/// let state = machine.initial_state().unwrap();
/// assert!(state.matches("green"));
/// assert!(state.can("TIMER"));
///
/// let next = machine.transition_state(&state, "TIMER").unwrap();
/// assert!(next.matches("red"));
/// assert!(next.matches("red.walk"));
/// assert_eq!(next.to_strings(), vec!["red", "red.walk"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct State<C: Context> {
    /// Nested form of the active configuration
    pub value: StateValue,
    /// Context after the step
    pub context: C,
    /// Event that produced this state
    pub event: Event,
    /// Ids of every active node, in document order
    pub configuration: Vec<String>,
    /// Whether the step changed configuration or context
    pub changed: bool,
    /// Whether the root reached a final configuration
    pub done: bool,
    /// Data of the final node that completed the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Names of the actions executed by the step
    pub actions: Vec<String>,
    /// Event types accepted by the active nodes
    pub next_events: Vec<String>,
    /// `meta` of every active node that declares one, by node id
    pub meta: BTreeMap<String, Value>,
    /// History node id → ids it remembers
    #[serde(default)]
    pub history: BTreeMap<String, Vec<String>>,
    /// Delimiter used by state descriptors
    pub delimiter: String,
}

impl<C: Context> State<C> {
    /// Whether the delimited descriptor (e.g. `red.walk`) is active.
    pub fn matches(&self, descriptor: &str) -> bool {
        self.value
            .contains(&StateValue::from_descriptor(descriptor, &self.delimiter))
    }

    /// Whether every state described by `value` is active.
    pub fn matches_value(&self, value: &StateValue) -> bool {
        self.value.contains(value)
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether some active node has a transition for this event type.
    pub fn can(&self, event_type: &str) -> bool {
        self.next_events.iter().any(|e| e == event_type)
    }

    /// Every active state descriptor, parents before children.
    pub fn to_strings(&self) -> Vec<String> {
        self.value.paths(&self.delimiter)
    }
}
