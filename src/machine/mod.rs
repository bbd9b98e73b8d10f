//! Validated, immutable machine definitions.
//!
//! A `Machine` is produced once by [`MachineBuilder`](crate::builder::MachineBuilder)
//! and never changes afterwards. Any number of interpreters can share it
//! through an `Arc`; each one owns its own configuration and context.

mod node;

pub use node::{
    DelaySpec, DelayedTransition, Invocation, NamedAction, NamedActivity, NamedGuard, NodeId,
    NodeKind, StateNode, Transition, TransitionId,
};

use crate::core::{Context, Event, EventSelector, State, StateValue};
use crate::engine::{self, Configuration, HistoryMemory, MachineState, Step, StepError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Structural description of a machine, for tools generating typed facades.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, MachineConfig};
///
/// let config = MachineConfig::from_json(r#"{
///     "id": "light",
///     "version": "2",
///     "initial": "green",
///     "states": {
///         "green": { "on": { "TIMER": "yellow" } },
///         "yellow": { "after": { "1000": "red" } },
///         "red": { "on": { "TIMER": "green" } }
///     }
/// }"#).unwrap();
/// let machine = MachineBuilder::<()>::new(config).build().unwrap();
///
/// let schema = machine.schema();
/// assert_eq!(schema.id, "light");
/// assert_eq!(schema.version.as_deref(), Some("2"));
/// assert_eq!(schema.states, vec!["green", "yellow", "red"]);
/// assert_eq!(schema.events, vec!["TIMER"]);
/// assert_eq!(schema.delays, vec!["1000"]);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineSchema {
    pub id: String,
    pub version: Option<String>,
    pub delimiter: String,
    /// Every state descriptor, in document order
    pub states: Vec<String>,
    /// Explicit node ids usable as `#id` targets
    pub ids: Vec<String>,
    pub guards: Vec<String>,
    pub actions: Vec<String>,
    pub services: Vec<String>,
    pub activities: Vec<String>,
    pub data: Vec<String>,
    /// Event types some node declares a transition for
    pub events: Vec<String>,
    /// Delay keys: literal milliseconds or named delays
    pub delays: Vec<String>,
}

/// Names of the implementations a machine references.
#[derive(Clone, Debug, Default)]
pub(crate) struct References {
    pub(crate) guards: BTreeSet<String>,
    pub(crate) actions: BTreeSet<String>,
    pub(crate) services: BTreeSet<String>,
    pub(crate) activities: BTreeSet<String>,
    pub(crate) data: BTreeSet<String>,
    pub(crate) delays: BTreeSet<String>,
}

/// An immutable, validated state machine.
pub struct Machine<C> {
    pub(crate) id: String,
    pub(crate) version: Option<String>,
    pub(crate) delimiter: String,
    pub(crate) strict: bool,
    pub(crate) nodes: Vec<StateNode<C>>,
    pub(crate) ids: HashMap<String, NodeId>,
    pub(crate) explicit_ids: Vec<String>,
    pub(crate) context: C,
    pub(crate) references: References,
}

impl<C: Clone> Clone for Machine<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version.clone(),
            delimiter: self.delimiter.clone(),
            strict: self.strict,
            nodes: self.nodes.clone(),
            ids: self.ids.clone(),
            explicit_ids: self.explicit_ids.clone(),
            context: self.context.clone(),
            references: self.references.clone(),
        }
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("nodes", &self.nodes.len())
            .field("context", &self.context)
            .finish()
    }
}

impl<C> Machine<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Initial context of every interpreter started from this machine.
    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn root(&self) -> &StateNode<C> {
        &self.nodes[NodeId::ROOT.0]
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node; `None` for ids that do not belong to this machine.
    pub fn get(&self, node: NodeId) -> Option<&StateNode<C>> {
        self.nodes.get(node.0)
    }

    pub(crate) fn node(&self, node: NodeId) -> &StateNode<C> {
        &self.nodes[node.0]
    }

    pub(crate) fn transition_def(&self, id: TransitionId) -> &Transition<C> {
        &self.nodes[id.node.0].transitions[id.index]
    }

    /// Every node with its id, in document order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &StateNode<C>)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Find a node by its unique id.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// Find a node by its delimited path from the root, e.g. `red.walk`.
    pub fn find_descriptor(&self, descriptor: &str) -> Option<NodeId> {
        descriptor
            .split(self.delimiter.as_str())
            .filter(|s| !s.is_empty())
            .try_fold(NodeId::ROOT, |node, key| self.child(node, key))
    }

    pub(crate) fn child(&self, node: NodeId, key: &str) -> Option<NodeId> {
        self.node(node)
            .children
            .iter()
            .copied()
            .find(|c| self.node(*c).key == key)
    }

    /// Delimited path of a node; empty for the root.
    pub fn descriptor(&self, node: NodeId) -> String {
        self.node(node).path.join(&self.delimiter)
    }

    /// Every state descriptor, in document order.
    pub fn state_paths(&self) -> Vec<String> {
        self.nodes
            .iter()
            .skip(1)
            .map(|n| n.path.join(&self.delimiter))
            .collect()
    }

    /// Event types that some node declares a transition for.
    ///
    /// Events generated by the engine (`done.*`, `error.*`, `after.*`) are
    /// not included.
    pub fn event_types(&self) -> Vec<String> {
        let types: BTreeSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.transitions.iter())
            .filter_map(|t| match &t.selector {
                EventSelector::Exact(event) if !crate::core::is_generated_type(event) => {
                    Some(event.as_str())
                }
                _ => None,
            })
            .collect();
        types.into_iter().map(String::from).collect()
    }

    /// Whether some node could react to an event of this type.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.nodes.iter().flat_map(|n| n.transitions.iter()).any(|t| match &t.selector {
            EventSelector::Exact(event) => event == event_type,
            EventSelector::Wildcard => true,
            EventSelector::Eventless => false,
        })
    }

    /// Whether interpreting this machine needs an async runtime.
    pub fn needs_runtime(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| !n.delays.is_empty() || !n.invocations.is_empty())
    }

    pub fn schema(&self) -> MachineSchema {
        let names = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
        MachineSchema {
            id: self.id.clone(),
            version: self.version.clone(),
            delimiter: self.delimiter.clone(),
            states: self.state_paths(),
            ids: self.explicit_ids.clone(),
            guards: names(&self.references.guards),
            actions: names(&self.references.actions),
            services: names(&self.references.services),
            activities: names(&self.references.activities),
            data: names(&self.references.data),
            events: self.event_types(),
            delays: names(&self.references.delays),
        }
    }

    /// Nested state value of a configuration.
    pub fn state_value(&self, configuration: &Configuration) -> StateValue {
        engine::state_value(self, configuration)
    }

    /// Event types the given configuration has transitions for.
    pub fn next_events(&self, configuration: &Configuration) -> Vec<String> {
        let types: BTreeSet<&str> = configuration
            .iter()
            .flat_map(|n| self.node(n).transitions.iter())
            .filter_map(|t| match &t.selector {
                EventSelector::Exact(event) if !crate::core::is_generated_type(event) => {
                    Some(event.as_str())
                }
                EventSelector::Wildcard => Some("*"),
                _ => None,
            })
            .collect();
        types.into_iter().map(String::from).collect()
    }
}

impl<C: Context> Machine<C> {
    /// Same machine with a different initial context.
    pub fn with_context(&self, context: C) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    /// Enter the initial configuration with the machine's context.
    pub fn initial_step(&self) -> Result<Step<C>, StepError> {
        engine::initial_step(self, self.context.clone(), engine::DEFAULT_MAX_MICROSTEPS)
    }

    /// # Example
    ///
    /// ```rust
    /// use harel::builder::{MachineBuilder, StateNodeConfig};
    ///
    /// let config = StateNodeConfig::compound("idle")
    ///     .state("idle", StateNodeConfig::atomic().on("FETCH", "loading"))
    ///     .state("loading", StateNodeConfig::atomic())
    ///     .into_machine("fetch");
    /// let machine = MachineBuilder::<()>::new(config).build().unwrap();
    ///
    /// let state = machine.initial_state().unwrap();
    /// assert!(state.matches("idle"));
    /// assert_eq!(state.next_events, vec!["FETCH"]);
    /// ```
    pub fn initial_state(&self) -> Result<State<C>, StepError> {
        let step = self.initial_step()?;
        Ok(self.state_of(&step))
    }

    /// Compute the step `event` causes from `state`, without running effects.
    pub fn transition(
        &self,
        state: &MachineState<C>,
        event: impl Into<Event>,
    ) -> Result<Step<C>, StepError> {
        engine::step(self, state, event.into(), engine::DEFAULT_MAX_MICROSTEPS)
    }

    /// Like [`transition`](Self::transition), from and to a `State` snapshot.
    pub fn transition_state(
        &self,
        state: &State<C>,
        event: impl Into<Event>,
    ) -> Result<State<C>, StepError> {
        let current = self.machine_state(state)?;
        let step = self.transition(&current, event)?;
        Ok(self.state_of(&step))
    }

    /// Rebuild the engine state behind a snapshot.
    pub fn machine_state(&self, state: &State<C>) -> Result<MachineState<C>, StepError> {
        let configuration = self.lookup_all(&state.configuration)?.into_iter().collect();
        let mut history = HistoryMemory::new();
        for (node, remembered) in &state.history {
            let node = self.lookup(node)?;
            history.record(node, self.lookup_all(remembered)?);
        }
        Ok(MachineState {
            configuration,
            context: state.context.clone(),
            history,
        })
    }

    fn lookup(&self, id: &str) -> Result<NodeId, StepError> {
        self.find(id).ok_or_else(|| StepError::UnknownState {
            machine: self.id.clone(),
            state: id.to_string(),
        })
    }

    fn lookup_all(&self, ids: &[String]) -> Result<Vec<NodeId>, StepError> {
        ids.iter().map(|id| self.lookup(id)).collect()
    }

    /// Snapshot after a step.
    pub fn state_of(&self, step: &Step<C>) -> State<C> {
        self.snapshot(
            &step.state,
            step.event.clone(),
            step.changed,
            step.executed.clone(),
            step.output.clone(),
        )
    }

    pub(crate) fn snapshot(
        &self,
        state: &MachineState<C>,
        event: Event,
        changed: bool,
        actions: Vec<String>,
        output: Option<Value>,
    ) -> State<C> {
        let configuration = &state.configuration;
        let meta = configuration
            .iter()
            .filter_map(|n| {
                let node = self.node(n);
                node.meta.clone().map(|m| (node.id.clone(), m))
            })
            .collect::<BTreeMap<_, _>>();
        let history = state
            .history
            .iter()
            .map(|(h, nodes)| {
                (
                    self.node(h).id.clone(),
                    nodes.iter().map(|n| self.node(*n).id.clone()).collect(),
                )
            })
            .collect();

        State {
            value: self.state_value(configuration),
            context: state.context.clone(),
            event,
            configuration: configuration.ids(self),
            changed,
            done: engine::is_in_final_state(self, configuration, NodeId::ROOT),
            output,
            actions,
            next_events: self.next_events(configuration),
            meta,
            history,
            delimiter: self.delimiter.clone(),
        }
    }
}
