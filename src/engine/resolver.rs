//! State resolver: from a raw set of nodes to a full configuration.
//!
//! Resolution adds every ancestor, enters the initial child of compound
//! nodes, fills every region of parallel nodes and replaces history nodes by
//! what they remembered (or their default targets). Everything here is a pure
//! function of the machine, the input nodes and the history memory.

use crate::core::StateValue;
use crate::engine::state::{Configuration, HistoryMemory};
use crate::machine::{Machine, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Whether `node` is a proper descendant of `ancestor`.
pub fn is_descendant<C>(machine: &Machine<C>, node: NodeId, ancestor: NodeId) -> bool {
    node > ancestor && node.0 < machine.node(ancestor).subtree_end
}

/// Ancestors of `node`, innermost first, stopping before `stop`.
pub(crate) fn proper_ancestors<C>(
    machine: &Machine<C>,
    node: NodeId,
    stop: Option<NodeId>,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = machine.node(node).parent;
    while let Some(ancestor) = current {
        if Some(ancestor) == stop {
            break;
        }
        out.push(ancestor);
        current = machine.node(ancestor).parent;
    }
    out
}

/// Whether `node` has reached a final configuration.
///
/// A compound node is final when its active child is a final node; a
/// parallel node when every region is.
pub fn is_in_final_state<C>(machine: &Machine<C>, config: &Configuration, node: NodeId) -> bool {
    let state = machine.node(node);
    if state.is_compound() {
        state
            .children
            .iter()
            .any(|c| config.contains(*c) && machine.node(*c).is_final())
    } else if state.is_parallel() {
        state
            .children
            .iter()
            .filter(|c| !machine.node(**c).is_history())
            .all(|c| {
                (machine.node(*c).is_final() && config.contains(*c))
                    || is_in_final_state(machine, config, *c)
            })
    } else {
        false
    }
}

/// Nodes to enter, accumulated with the entry rules for initial, parallel
/// and history nodes.
pub(crate) struct EntrySet<'a, C> {
    machine: &'a Machine<C>,
    memory: &'a HistoryMemory,
    nodes: BTreeSet<NodeId>,
}

impl<'a, C> EntrySet<'a, C> {
    pub(crate) fn new(machine: &'a Machine<C>, memory: &'a HistoryMemory) -> Self {
        Self {
            machine,
            memory,
            nodes: BTreeSet::new(),
        }
    }

    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub(crate) fn into_nodes(self) -> BTreeSet<NodeId> {
        self.nodes
    }

    fn has_descendant(&self, node: NodeId) -> bool {
        let end = NodeId(self.machine.node(node).subtree_end);
        self.nodes.range(NodeId(node.0 + 1)..end).next().is_some()
    }

    /// What a history node resolves to right now.
    pub(crate) fn history_targets(&self, history: NodeId) -> Vec<NodeId> {
        match self.memory.get(history) {
            Some(remembered) => remembered.to_vec(),
            None => self.machine.node(history).history_default.clone(),
        }
    }

    /// Enter `node` and whatever it implies below it.
    pub(crate) fn add_descendants(&mut self, node: NodeId) {
        let state = self.machine.node(node);
        if state.is_history() {
            let parent = state.parent;
            let targets = self.history_targets(node);
            for target in &targets {
                self.add_descendants(*target);
            }
            for target in &targets {
                self.add_ancestors(*target, parent);
            }
            return;
        }

        self.nodes.insert(node);
        if state.is_compound() {
            if let Some(initial) = state.initial {
                self.add_descendants(initial);
                self.add_ancestors(initial, Some(node));
            }
        } else if state.is_parallel() {
            self.fill_regions(node);
        }
    }

    /// Enter the ancestors of `node` up to, but excluding, `stop`.
    pub(crate) fn add_ancestors(&mut self, node: NodeId, stop: Option<NodeId>) {
        for ancestor in proper_ancestors(self.machine, node, stop) {
            self.nodes.insert(ancestor);
            if self.machine.node(ancestor).is_parallel() {
                self.fill_regions(ancestor);
            }
        }
    }

    fn fill_regions(&mut self, parallel: NodeId) {
        let machine = self.machine;
        for child in &machine.node(parallel).children {
            if machine.node(*child).is_history() {
                continue;
            }
            if !self.has_descendant(*child) {
                self.add_descendants(*child);
            }
        }
    }
}

/// Expand a raw set of nodes into a full configuration.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, StateNodeConfig};
/// use harel::engine::{resolve, HistoryMemory};
///
/// let config = StateNodeConfig::compound("green")
///     .state("green", StateNodeConfig::atomic())
///     .state(
///         "red",
///         StateNodeConfig::compound("walk")
///             .state("walk", StateNodeConfig::atomic())
///             .state("wait", StateNodeConfig::atomic()),
///     )
///     .into_machine("light");
/// let machine = MachineBuilder::<()>::new(config).build().unwrap();
///
/// let red = machine.find_descriptor("red").unwrap();
/// let resolved = resolve(&machine, [red], &HistoryMemory::new());
/// assert_eq!(resolved.ids(&machine), vec!["light", "light.red", "light.red.walk"]);
/// ```
pub fn resolve<C, I>(machine: &Machine<C>, nodes: I, memory: &HistoryMemory) -> Configuration
where
    I: IntoIterator<Item = NodeId>,
{
    let mut entry = EntrySet::new(machine, memory);
    entry.nodes.insert(NodeId::ROOT);
    let mut histories = Vec::new();
    for node in nodes {
        if machine.node(node).is_history() {
            histories.push(node);
            continue;
        }
        entry.nodes.insert(node);
        entry.nodes.extend(proper_ancestors(machine, node, None));
    }
    // Every explicit node is in place before any region gets filled.
    for history in histories {
        entry.add_descendants(history);
        entry.nodes.extend(proper_ancestors(machine, history, None));
    }

    // Preorder: filling a node only ever adds nodes after it.
    for index in 0..machine.len() {
        let node = NodeId(index);
        if !entry.contains(node) {
            continue;
        }
        let state = machine.node(node);
        if state.is_compound() && !state.children.iter().any(|c| entry.contains(*c)) {
            if let Some(initial) = state.initial {
                entry.add_descendants(initial);
                entry.add_ancestors(initial, Some(node));
            }
        } else if state.is_parallel() {
            entry.fill_regions(node);
        }
    }

    entry.into_nodes().into_iter().collect()
}

/// Nested state value of a configuration.
pub fn state_value<C>(machine: &Machine<C>, config: &Configuration) -> StateValue {
    value_of(machine, config, NodeId::ROOT)
}

fn value_of<C>(machine: &Machine<C>, config: &Configuration, node: NodeId) -> StateValue {
    let state = machine.node(node);
    let active = state
        .children
        .iter()
        .copied()
        .filter(|c| config.contains(*c) && !machine.node(*c).is_history());

    if state.is_parallel() {
        let regions = active
            .map(|c| {
                let child = machine.node(c);
                let value = if child.is_atomic() {
                    StateValue::Branch(BTreeMap::new())
                } else {
                    value_of(machine, config, c)
                };
                (child.key.clone(), value)
            })
            .collect();
        return StateValue::Branch(regions);
    }

    let mut active = active;
    match active.next() {
        Some(c) if machine.node(c).is_atomic() => StateValue::Leaf(machine.node(c).key.clone()),
        Some(c) => {
            let mut map = BTreeMap::new();
            map.insert(machine.node(c).key.clone(), value_of(machine, config, c));
            StateValue::Branch(map)
        }
        None => StateValue::Branch(BTreeMap::new()),
    }
}

/// Configuration described by a state value, or `None` if some path in the
/// value does not name a state of the machine.
pub fn configuration_from_value<C>(
    machine: &Machine<C>,
    value: &StateValue,
    memory: &HistoryMemory,
) -> Option<Configuration> {
    let nodes = value
        .leaves(machine.delimiter())
        .iter()
        .map(|path| machine.find_descriptor(path))
        .collect::<Option<Vec<_>>>()?;
    Some(resolve(machine, nodes, memory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{HistoryKind, MachineBuilder, StateNodeConfig};

    fn editor() -> Machine<()> {
        let config = StateNodeConfig::compound("idle")
            .state("idle", StateNodeConfig::atomic())
            .state(
                "editing",
                StateNodeConfig::parallel()
                    .state(
                        "bold",
                        StateNodeConfig::compound("off")
                            .state("off", StateNodeConfig::atomic())
                            .state("on", StateNodeConfig::atomic()),
                    )
                    .state("cursor", StateNodeConfig::atomic())
                    .state("hist", StateNodeConfig::history(HistoryKind::Deep)),
            )
            .state("done", StateNodeConfig::final_state())
            .into_machine("editor");
        MachineBuilder::new(config).build().unwrap()
    }

    fn node(machine: &Machine<()>, descriptor: &str) -> NodeId {
        machine.find_descriptor(descriptor).unwrap()
    }

    #[test]
    fn resolving_a_parallel_node_fills_every_region() {
        let machine = editor();
        let config = resolve(&machine, [node(&machine, "editing")], &HistoryMemory::new());
        assert_eq!(
            config.ids(&machine),
            vec![
                "editor",
                "editor.editing",
                "editor.editing.bold",
                "editor.editing.bold.off",
                "editor.editing.cursor",
            ]
        );
    }

    #[test]
    fn resolve_is_idempotent_on_full_configurations() {
        let machine = editor();
        let once = resolve(&machine, [node(&machine, "editing.bold.on")], &HistoryMemory::new());
        let twice = resolve(&machine, once.iter(), &HistoryMemory::new());
        assert_eq!(once, twice);
    }

    #[test]
    fn resolve_keeps_non_initial_children_of_parallel_regions() {
        let machine = editor();
        let full = [
            node(&machine, "editing"),
            node(&machine, "editing.bold"),
            node(&machine, "editing.bold.on"),
            node(&machine, "editing.cursor"),
        ];
        let config = resolve(&machine, full, &HistoryMemory::new());
        assert_eq!(
            config.ids(&machine),
            vec![
                "editor",
                "editor.editing",
                "editor.editing.bold",
                "editor.editing.bold.on",
                "editor.editing.cursor",
            ]
        );
        assert!(!config.contains(node(&machine, "editing.bold.off")));
        assert_eq!(resolve(&machine, config.iter(), &HistoryMemory::new()), config);
    }

    #[test]
    fn history_resolves_to_memory_or_default() {
        let machine = editor();
        let hist = node(&machine, "editing.hist");

        let default = resolve(&machine, [hist], &HistoryMemory::new());
        assert!(default.contains(node(&machine, "editing.bold.off")));

        let mut memory = HistoryMemory::new();
        memory.record(hist, vec![node(&machine, "editing.bold.on"), node(&machine, "editing.cursor")]);
        let remembered = resolve(&machine, [hist], &memory);
        assert!(remembered.contains(node(&machine, "editing.bold.on")));
        assert!(!remembered.contains(node(&machine, "editing.bold.off")));
        assert!(!remembered.contains(hist));
    }

    #[test]
    fn state_value_roundtrips_through_configuration() {
        let machine = editor();
        let config = resolve(&machine, [node(&machine, "editing.bold.on")], &HistoryMemory::new());
        let value = state_value(&machine, &config);

        assert_eq!(
            value,
            serde_json::from_value(serde_json::json!({
                "editing": { "bold": "on", "cursor": {} }
            }))
            .unwrap()
        );
        let back = configuration_from_value(&machine, &value, &HistoryMemory::new()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn unknown_paths_do_not_resolve() {
        let machine = editor();
        let value = StateValue::from("editing.italic");
        assert!(configuration_from_value(&machine, &value, &HistoryMemory::new()).is_none());
    }

    #[test]
    fn final_detection_follows_hierarchy() {
        let machine = editor();
        let done = resolve(&machine, [node(&machine, "done")], &HistoryMemory::new());
        assert!(is_in_final_state(&machine, &done, NodeId::ROOT));

        let idle = resolve(&machine, [node(&machine, "idle")], &HistoryMemory::new());
        assert!(!is_in_final_state(&machine, &idle, NodeId::ROOT));
    }

    #[test]
    fn descendant_checks_use_subtree_ranges() {
        let machine = editor();
        let editing = node(&machine, "editing");
        assert!(is_descendant(&machine, node(&machine, "editing.bold.on"), editing));
        assert!(!is_descendant(&machine, editing, editing));
        assert!(!is_descendant(&machine, node(&machine, "done"), editing));
    }
}
