//! Checkpoint and resume functionality for interpreters.
//!
//! A checkpoint captures what cannot be recomputed from the machine
//! definition: the active configuration, the context, the history memory and
//! the transition log. Timers and services are not captured; a restored
//! interpreter restarts them for the active states.
//!
//! Checkpoints encode to JSON (`serde_json`) or to a compact binary form
//! (`bincode`). The binary form needs a context type that does not rely on
//! self-describing formats (no `serde_json::Value`, no skipped fields).

use crate::core::{Context, TransitionLog};
use crate::engine::{self, HistoryMemory, MachineState};
use crate::machine::{Machine, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Bookkeeping about the interpreter a checkpoint was taken from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// When the interpreter was started
    pub created_at: DateTime<Utc>,

    /// When the last event was committed
    pub updated_at: DateTime<Utc>,

    /// Events processed since start, including ones that changed nothing
    pub events_processed: usize,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            events_processed: 0,
        }
    }
}

/// Serializable checkpoint of a running interpreter.
/// Does NOT include guards, actions or services (not serializable).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Checkpoint<C: Context> {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: String,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Id of the machine the interpreter ran
    pub machine_id: String,

    /// Version of that machine, if it declares one
    pub machine_version: Option<String>,

    /// Ids of every active node, in document order
    pub configuration: Vec<String>,

    /// Context at checkpoint time
    pub context: C,

    /// History node id → ids it remembers
    pub history: BTreeMap<String, Vec<String>>,

    /// Type of the last processed event
    pub event: String,

    /// Transitions committed so far
    pub transitions: TransitionLog,

    pub metadata: CheckpointMetadata,
}

impl<C: Context> Checkpoint<C> {
    /// Encode as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    /// Decode from JSON, rejecting other format versions.
    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }

    /// Encode with bincode.
    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
    }

    /// Decode from bincode, rejecting other format versions.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: Self = bincode::deserialize(bytes)
            .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }

    fn check_version(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        Ok(())
    }

    /// Check that this checkpoint can resume `machine`.
    ///
    /// Every problem with the recorded states is reported, not only the
    /// first one.
    pub fn validate(&self, machine: &Machine<C>) -> Result<(), CheckpointError> {
        self.check_version()?;
        if self.machine_id != machine.id() || self.machine_version.as_deref() != machine.version() {
            return Err(CheckpointError::MachineMismatch {
                expected: label(machine.id(), machine.version()),
                found: label(&self.machine_id, self.machine_version.as_deref()),
            });
        }

        let mut checks: Vec<Validation<(), NonEmptyVec<String>>> = Vec::new();
        if self.configuration.is_empty() {
            checks.push(Validation::fail("configuration is empty".to_string()));
        }
        let known = |id: &String| match machine.find(id) {
            Some(_) => Validation::success(()),
            None => Validation::fail(format!("unknown state '{id}'")),
        };
        checks.extend(self.configuration.iter().map(known));
        for (history, remembered) in &self.history {
            checks.push(known(history));
            checks.extend(remembered.iter().map(known));
        }
        if let Validation::Failure(problems) = Validation::all_vec(checks).map(|_| ()) {
            let problems: Vec<String> = problems.iter().cloned().collect();
            return Err(CheckpointError::ValidationFailed(problems.join("; ")));
        }

        let state = self.machine_state(machine)?;
        let resolved =
            engine::resolve(machine, state.configuration.iter(), &HistoryMemory::new());
        if resolved != state.configuration {
            return Err(CheckpointError::ValidationFailed(format!(
                "configuration {:?} is not a consistent configuration",
                self.configuration
            )));
        }
        Ok(())
    }

    /// Engine state recorded in this checkpoint.
    pub fn machine_state(&self, machine: &Machine<C>) -> Result<MachineState<C>, CheckpointError> {
        let lookup = |id: &String| {
            machine
                .find(id)
                .ok_or_else(|| CheckpointError::ValidationFailed(format!("unknown state '{id}'")))
        };
        let configuration = self
            .configuration
            .iter()
            .map(lookup)
            .collect::<Result<BTreeSet<NodeId>, _>>()?;

        let mut history = HistoryMemory::new();
        for (node, remembered) in &self.history {
            let remembered = remembered.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;
            history.record(lookup(node)?, remembered);
        }

        Ok(MachineState::new(configuration.into_iter().collect(), self.context.clone())
            .with_history(history))
    }
}

fn label(id: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{id}@{version}"),
        None => id.to_string(),
    }
}
