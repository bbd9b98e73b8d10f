//! Transition log.
//!
//! Records which configuration each processed event moved the machine from and
//! to. The log is immutable: `record` returns a new log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of one processed event that changed the machine.
///
/// Configurations are stored as the delimited paths of their atomic states.
///
/// # Example
///
/// ```rust
/// use harel::core::TransitionRecord;
/// use chrono::Utc;
///
/// let record = TransitionRecord {
///     from: vec!["green".to_string()],
///     to: vec!["red.walk".to_string()],
///     event: "TIMER".to_string(),
///     timestamp: Utc::now(),
///     microsteps: 1,
/// };
/// assert_eq!(record.event, "TIMER");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Atomic states active before the event
    pub from: Vec<String>,
    /// Atomic states active after the event
    pub to: Vec<String>,
    /// Type of the event that caused the change
    pub event: String,
    /// When the change was committed
    pub timestamp: DateTime<Utc>,
    /// Number of microsteps the change took
    pub microsteps: usize,
}

/// Ordered log of committed transitions.
///
/// # Example
///
/// ```rust
/// use harel::core::{TransitionLog, TransitionRecord};
/// use chrono::Utc;
///
/// let log = TransitionLog::new();
/// let log = log.record(TransitionRecord {
///     from: vec!["green".into()],
///     to: vec!["yellow".into()],
///     event: "TIMER".into(),
///     timestamp: Utc::now(),
///     microsteps: 1,
/// });
///
/// assert_eq!(log.path().len(), 2); // green -> yellow
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionLog {
    records: Vec<TransitionRecord>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Record a transition, returning a new log.
    ///
    /// The existing log is left untouched.
    pub fn record(&self, record: TransitionRecord) -> Self {
        let mut records = self.records.clone();
        records.push(record);
        Self { records }
    }

    /// Configurations traversed: the first `from`, then every `to`.
    pub fn path(&self) -> Vec<&[String]> {
        let mut path = Vec::new();
        if let Some(first) = self.records.first() {
            path.push(first.from.as_slice());
        }
        for record in &self.records {
            path.push(record.to.as_slice());
        }
        path
    }

    /// Time between the first and last recorded transition.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
            let duration = last.timestamp.signed_duration_since(first.timestamp);
            duration.to_std().ok()
        } else {
            None
        }
    }

    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
