//! Live state of one machine instance: configuration, context, history.

use crate::machine::{Machine, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Set of active nodes.
///
/// Iteration yields nodes in document order. A configuration produced by the
/// engine always contains the root, every ancestor of an active node, and
/// every region of an active parallel node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Configuration(BTreeSet<NodeId>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.0.contains(&node)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, node: NodeId) -> bool {
        self.0.insert(node)
    }

    pub(crate) fn remove(&mut self, node: NodeId) -> bool {
        self.0.remove(&node)
    }

    /// Active atomic and final nodes, in document order.
    pub fn atomic<'a, C>(&'a self, machine: &'a Machine<C>) -> impl Iterator<Item = NodeId> + 'a {
        self.iter().filter(move |n| machine.node(*n).is_atomic())
    }

    /// Ids of the active nodes, in document order.
    pub fn ids<C>(&self, machine: &Machine<C>) -> Vec<String> {
        self.iter().map(|n| machine.node(n).id.clone()).collect()
    }
}

impl FromIterator<NodeId> for Configuration {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What each history node remembered when its parent was last exited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryMemory(BTreeMap<NodeId, Vec<NodeId>>);

impl HistoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, history: NodeId) -> Option<&[NodeId]> {
        self.0.get(&history).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[NodeId])> {
        self.0.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn record(&mut self, history: NodeId, nodes: Vec<NodeId>) {
        self.0.insert(history, nodes);
    }
}

/// Everything the engine needs to compute the next step.
#[derive(Clone, Debug)]
pub struct MachineState<C> {
    pub configuration: Configuration,
    pub context: C,
    pub history: HistoryMemory,
}

impl<C> MachineState<C> {
    pub fn new(configuration: Configuration, context: C) -> Self {
        Self {
            configuration,
            context,
            history: HistoryMemory::new(),
        }
    }

    pub fn with_history(mut self, history: HistoryMemory) -> Self {
        self.history = history;
        self
    }
}
