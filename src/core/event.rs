//! Events and the selectors that transitions listen on.
//!
//! An event is a tagged value: a `type` discriminator plus an arbitrary JSON
//! payload. Events are transient; each one is consumed by exactly one
//! evaluation of the transition engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Event type used for the step that enters the initial configuration.
pub const INIT_EVENT: &str = "machine.init";

/// Event type used for the step that exits every state when an interpreter stops.
pub const STOP_EVENT: &str = "machine.stop";

/// Prefix of the events raised when a compound or parallel node completes.
pub const DONE_STATE_PREFIX: &str = "done.state.";

/// Prefix of the events raised when an invoked service completes.
pub const DONE_INVOKE_PREFIX: &str = "done.invoke.";

/// Prefix of the events raised when an invoked service fails.
pub const ERROR_INVOKE_PREFIX: &str = "error.invoke.";

/// Prefix of the events posted by delayed-transition timers.
pub const AFTER_PREFIX: &str = "after.";

/// A tagged event value.
///
/// # Example
///
/// ```rust
/// use harel::core::Event;
/// use serde_json::json;
///
/// let event = Event::with_data("PED_COUNTDOWN", json!({ "duration": 5 }));
/// assert_eq!(event.event_type(), "PED_COUNTDOWN");
/// assert_eq!(event.data["duration"], 5);
///
/// let parsed: Event = serde_json::from_str(r#"{"type":"TIMER"}"#).unwrap();
/// assert_eq!(parsed, Event::new("TIMER"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event discriminator
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Event {
    /// Create an event without payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Value::Null,
        }
    }

    /// Create an event carrying a payload.
    pub fn with_data(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub(crate) fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    pub(crate) fn stop() -> Self {
        Self::new(STOP_EVENT)
    }

    /// Event raised when the node with `id` reaches a final configuration.
    pub fn done_state(id: &str, data: Value) -> Self {
        Self::with_data(format!("{DONE_STATE_PREFIX}{id}"), data)
    }

    /// Event delivered when the service invoked as `invoke_id` resolves.
    pub fn done_invoke(invoke_id: &str, data: Value) -> Self {
        Self::with_data(format!("{DONE_INVOKE_PREFIX}{invoke_id}"), data)
    }

    /// Event delivered when the service invoked as `invoke_id` fails.
    pub fn error_invoke(invoke_id: &str, message: impl Into<String>) -> Self {
        Self::with_data(
            format!("{ERROR_INVOKE_PREFIX}{invoke_id}"),
            Value::String(message.into()),
        )
    }

    /// Event posted by the timer of a delayed transition.
    pub(crate) fn after_type(delay_key: &str, node_id: &str) -> String {
        format!("{AFTER_PREFIX}{delay_key}#{node_id}")
    }

    /// Whether this event type is one the engine generates itself.
    pub fn is_generated(&self) -> bool {
        is_generated_type(&self.event_type)
    }
}

pub(crate) fn is_generated_type(event_type: &str) -> bool {
    event_type == INIT_EVENT
        || event_type == STOP_EVENT
        || event_type.starts_with(DONE_STATE_PREFIX)
        || event_type.starts_with(DONE_INVOKE_PREFIX)
        || event_type.starts_with(ERROR_INVOKE_PREFIX)
        || event_type.starts_with(AFTER_PREFIX)
}

impl From<&str> for Event {
    fn from(event_type: &str) -> Self {
        Event::new(event_type)
    }
}

impl From<String> for Event {
    fn from(event_type: String) -> Self {
        Event::new(event_type)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_type)
    }
}

/// What a transition listens on.
///
/// Exact selectors take priority over the wildcard within a node; eventless
/// selectors are only considered while the engine settles after a transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventSelector {
    /// Matches one event type
    Exact(String),
    /// `*`: matches any event
    Wildcard,
    /// `""`: eventless, evaluated after every settled transition
    Eventless,
}

impl EventSelector {
    /// Parse the key used in an `on` map.
    pub fn parse(key: &str) -> Self {
        match key {
            "" => Self::Eventless,
            "*" => Self::Wildcard,
            other => Self::Exact(other.to_string()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Exact(t) => *t == event.event_type,
            Self::Wildcard => true,
            Self::Eventless => false,
        }
    }

    pub fn is_eventless(&self) -> bool {
        matches!(self, Self::Eventless)
    }
}

impl fmt::Display for EventSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => f.write_str(t),
            Self::Wildcard => f.write_str("*"),
            Self::Eventless => f.write_str("\"\""),
        }
    }
}

/// Parse a delay key that is a literal number of milliseconds.
pub(crate) fn parse_delay_millis(key: &str) -> Option<Duration> {
    key.trim().parse::<u64>().ok().map(Duration::from_millis)
}
