//! Building and validating machines.

use crate::builder::config::{MachineConfig, NodeType, StateNodeConfig, TransitionConfig};
use crate::builder::error::DefinitionError;
use crate::builder::options::MachineOptions;
use crate::builder::HistoryKind;
use crate::core::{
    parse_delay_millis, Context, DataMapper, Event, EventSelector, DEFAULT_DELIMITER,
    DONE_INVOKE_PREFIX, DONE_STATE_PREFIX, ERROR_INVOKE_PREFIX,
};
use crate::machine::{
    DelaySpec, DelayedTransition, Invocation, Machine, NamedAction, NamedActivity, NamedGuard,
    NodeId, NodeKind, References, StateNode, Transition,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use tracing::debug;

/// Id given to the root node when the configuration does not name one.
pub const DEFAULT_MACHINE_ID: &str = "machine";

/// Builds a [`Machine`] from a configuration and named implementations.
///
/// Building validates the whole definition and reports every problem it
/// finds, not only the first one.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, MachineConfig, MachineOptions, DefinitionError};
///
/// let config = MachineConfig::from_json(r#"{
///     "id": "door",
///     "initial": "closed",
///     "states": {
///         "closed": { "on": { "OPEN": { "target": "opened", "guard": "unlocked" } } },
///         "opened": { "on": { "CLOSE": "shut" } }
///     }
/// }"#).unwrap();
///
/// let err = MachineBuilder::<()>::new(config.clone()).build().unwrap_err();
/// assert_eq!(err.errors().len(), 2); // unknown guard, unresolved target
///
/// let options = MachineOptions::new().guard("unlocked", |_: &(), _| true);
/// let err = MachineBuilder::<()>::new(config).options(options).build().unwrap_err();
/// assert!(matches!(err, DefinitionError::UnresolvedTarget { .. }));
/// ```
pub struct MachineBuilder<C> {
    config: MachineConfig,
    options: MachineOptions<C>,
    context: Option<C>,
}

impl<C: Context> MachineBuilder<C> {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            options: MachineOptions::new(),
            context: None,
        }
    }

    /// Add implementations; later registrations of a name win.
    pub fn options(mut self, options: MachineOptions<C>) -> Self {
        self.options = self.options.merge(options);
        self
    }

    /// Initial context, overriding the configuration's `context`.
    pub fn context(mut self, context: C) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<Machine<C>, DefinitionError> {
        let MachineBuilder {
            config,
            options,
            context,
        } = self;
        let delimiter = config
            .delimiter
            .clone()
            .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
        let machine_id = config
            .root
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_string());

        let mut problems = Problems::default();
        let context = problems.check(match context {
            Some(context) => Ok(context),
            None => decode_context(config.context.as_ref()),
        });

        let mut configs = Vec::new();
        let mut nodes = Vec::new();
        let naming = Naming {
            machine_id: &machine_id,
            delimiter: &delimiter,
        };
        lay_out(&config.root, Vec::new(), None, &naming, &mut configs, &mut nodes);

        let ids = index_ids(&nodes, &mut problems);
        check_structure(&nodes, &mut problems);
        for (index, node_config) in configs.iter().enumerate() {
            let initial = resolve_initial(&nodes, NodeId(index), node_config, &mut problems);
            nodes[index].initial = initial;
        }

        let mut linker = Linker {
            nodes: &nodes,
            ids: &ids,
            options: &options,
            delimiter: &delimiter,
            problems,
            references: References::default(),
            invoke_ids: HashSet::new(),
        };
        let parts: Vec<Parts<C>> = configs
            .iter()
            .enumerate()
            .map(|(index, node_config)| linker.link(NodeId(index), node_config))
            .collect();
        let Linker {
            problems,
            references,
            ..
        } = linker;

        problems.into_result()?;
        let context = context.ok_or_else(|| {
            DefinitionError::InvalidContext("no initial context available".to_string())
        })?;

        for (node, parts) in nodes.iter_mut().zip(parts) {
            parts.apply(node);
        }
        let explicit_ids = configs.iter().skip(1).filter_map(|c| c.id.clone()).collect();

        debug!(machine = %machine_id, nodes = nodes.len(), "machine built");
        Ok(Machine {
            id: machine_id,
            version: config.version.clone(),
            delimiter,
            strict: config.strict,
            nodes,
            ids,
            explicit_ids,
            context,
            references,
        })
    }
}

fn decode_context<C: Context>(context: Option<&Value>) -> Result<C, DefinitionError> {
    let value = context.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| DefinitionError::InvalidContext(e.to_string()))
}

/// Accumulates every definition problem before failing.
#[derive(Default)]
struct Problems(Vec<Validation<(), NonEmptyVec<DefinitionError>>>);

impl Problems {
    fn report(&mut self, error: DefinitionError) {
        self.0.push(Validation::fail(error));
    }

    fn check<T>(&mut self, result: Result<T, DefinitionError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    fn into_result(self) -> Result<(), DefinitionError> {
        match Validation::all_vec(self.0).map(|_| ()) {
            Validation::Success(_) => Ok(()),
            Validation::Failure(errors) => Err(DefinitionError::from_many(
                errors.iter().cloned().collect(),
            )),
        }
    }
}

struct Naming<'a> {
    machine_id: &'a str,
    delimiter: &'a str,
}

fn kind_of(config: &StateNodeConfig) -> NodeKind {
    let history = config.history.and_then(|h| h.kind());
    match config.node_type {
        Some(NodeType::Atomic) => NodeKind::Atomic,
        Some(NodeType::Compound) => NodeKind::Compound,
        Some(NodeType::Parallel) => NodeKind::Parallel,
        Some(NodeType::Final) => NodeKind::Final,
        Some(NodeType::History) => NodeKind::History(history.unwrap_or(HistoryKind::Shallow)),
        None => match history {
            Some(kind) if config.states.is_empty() => NodeKind::History(kind),
            _ if config.states.is_empty() => NodeKind::Atomic,
            _ => NodeKind::Compound,
        },
    }
}

/// Allocate nodes in preorder, which is document order.
fn lay_out<'a, C>(
    config: &'a StateNodeConfig,
    path: Vec<String>,
    parent: Option<NodeId>,
    naming: &Naming<'_>,
    configs: &mut Vec<&'a StateNodeConfig>,
    nodes: &mut Vec<StateNode<C>>,
) -> NodeId {
    let index = nodes.len();
    let id = match (&config.id, parent) {
        (Some(id), _) => id.clone(),
        (None, None) => naming.machine_id.to_string(),
        (None, Some(_)) => format!(
            "{}{}{}",
            naming.machine_id,
            naming.delimiter,
            path.join(naming.delimiter)
        ),
    };
    let key = path
        .last()
        .cloned()
        .unwrap_or_else(|| naming.machine_id.to_string());

    configs.push(config);
    nodes.push(StateNode {
        key,
        id,
        path: path.clone(),
        kind: kind_of(config),
        parent,
        children: Vec::new(),
        subtree_end: index + 1,
        initial: None,
        history_default: Vec::new(),
        transitions: Vec::new(),
        entry: Vec::new(),
        exit: Vec::new(),
        invocations: Vec::new(),
        activities: Vec::new(),
        delays: Vec::new(),
        done_data: None,
        meta: config.meta.clone(),
    });

    let mut children = Vec::new();
    for (key, child) in config.states.iter() {
        let mut child_path = path.clone();
        child_path.push(key.to_string());
        children.push(lay_out(
            child,
            child_path,
            Some(NodeId(index)),
            naming,
            configs,
            nodes,
        ));
    }
    nodes[index].children = children;
    nodes[index].subtree_end = nodes.len();
    NodeId(index)
}

fn index_ids<C>(nodes: &[StateNode<C>], problems: &mut Problems) -> HashMap<String, NodeId> {
    let mut ids = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        if ids.insert(node.id.clone(), NodeId(index)).is_some() {
            problems.report(DefinitionError::DuplicateId {
                id: node.id.clone(),
            });
        }
    }
    ids
}

fn check_structure<C>(nodes: &[StateNode<C>], problems: &mut Problems) {
    for node in nodes {
        match node.kind {
            NodeKind::History(_) if node.parent.is_none() => {
                problems.report(DefinitionError::InvalidHistory {
                    state: node.id.clone(),
                    reason: "the root cannot be a history state".to_string(),
                });
            }
            NodeKind::History(_) if !node.children.is_empty() => {
                problems.report(DefinitionError::InvalidHistory {
                    state: node.id.clone(),
                    reason: "history states cannot have child states".to_string(),
                });
            }
            NodeKind::Atomic | NodeKind::Final if !node.children.is_empty() => {
                let kind = if node.is_final() { "final" } else { "atomic" };
                problems.report(DefinitionError::LeafWithChildren {
                    state: node.id.clone(),
                    kind: kind.to_string(),
                });
            }
            _ => {}
        }
    }
}

fn resolve_initial<C>(
    nodes: &[StateNode<C>],
    node: NodeId,
    config: &StateNodeConfig,
    problems: &mut Problems,
) -> Option<NodeId> {
    let state = &nodes[node.0];
    if !state.is_compound() {
        return None;
    }
    let Some(initial) = &config.initial else {
        problems.report(DefinitionError::MissingInitial {
            state: state.id.clone(),
        });
        return None;
    };
    let found = state
        .children
        .iter()
        .copied()
        .find(|c| nodes[c.0].key == *initial);
    if found.is_none() {
        problems.report(DefinitionError::InvalidInitial {
            state: state.id.clone(),
            initial: initial.clone(),
        });
    }
    found
}

/// Everything resolved for one node in the linking pass.
struct Parts<C> {
    history_default: Vec<NodeId>,
    transitions: Vec<Transition<C>>,
    entry: Vec<NamedAction<C>>,
    exit: Vec<NamedAction<C>>,
    invocations: Vec<Invocation<C>>,
    activities: Vec<NamedActivity<C>>,
    delays: Vec<DelayedTransition<C>>,
    done_data: Option<DataMapper<C>>,
}

impl<C> Parts<C> {
    fn apply(self, node: &mut StateNode<C>) {
        node.history_default = self.history_default;
        node.transitions = self.transitions;
        node.entry = self.entry;
        node.exit = self.exit;
        node.invocations = self.invocations;
        node.activities = self.activities;
        node.delays = self.delays;
        node.done_data = self.done_data;
    }
}

/// Resolves names and targets against the laid-out tree.
struct Linker<'a, C> {
    nodes: &'a [StateNode<C>],
    ids: &'a HashMap<String, NodeId>,
    options: &'a MachineOptions<C>,
    delimiter: &'a str,
    problems: Problems,
    references: References,
    invoke_ids: HashSet<String>,
}

impl<'a, C> Linker<'a, C> {
    fn link(&mut self, node: NodeId, config: &StateNodeConfig) -> Parts<C> {
        let id = self.nodes[node.0].id.clone();
        let mut transitions = Vec::new();

        for (key, candidates) in config.on.iter() {
            let selector = EventSelector::parse(key);
            for candidate in candidates.iter() {
                transitions.extend(self.transition(node, selector.clone(), candidate));
            }
        }
        for candidate in config.always.iter() {
            transitions.extend(self.transition(node, EventSelector::Eventless, candidate));
        }

        let mut delays = Vec::new();
        for (key, candidates) in config.after.iter() {
            let event_type = Event::after_type(key, &id);
            if let Some(delay) = self.delay(&id, key) {
                delays.push(DelayedTransition {
                    key: key.to_string(),
                    event_type: event_type.clone(),
                    delay,
                });
            }
            for candidate in candidates.iter() {
                let selector = EventSelector::Exact(event_type.clone());
                transitions.extend(self.transition(node, selector, candidate));
            }
        }

        let done = EventSelector::Exact(format!("{DONE_STATE_PREFIX}{id}"));
        for candidate in config.on_done.iter() {
            transitions.extend(self.transition(node, done.clone(), candidate));
        }

        let mut invocations = Vec::new();
        for (index, invoke) in config.invoke.iter().enumerate() {
            let invoke_id = invoke
                .id
                .clone()
                .unwrap_or_else(|| format!("{id}:invocation[{index}]"));
            if !self.invoke_ids.insert(invoke_id.clone()) {
                self.problems.report(DefinitionError::DuplicateId {
                    id: invoke_id.clone(),
                });
            }
            self.references.services.insert(invoke.src.clone());
            match self.options.services.get(&invoke.src) {
                Some(service) => invocations.push(Invocation {
                    id: invoke_id.clone(),
                    src: invoke.src.clone(),
                    service: service.clone(),
                }),
                None => self.problems.report(DefinitionError::UnknownService {
                    state: id.clone(),
                    service: invoke.src.clone(),
                }),
            }

            let done = EventSelector::Exact(format!("{DONE_INVOKE_PREFIX}{invoke_id}"));
            for candidate in invoke.on_done.iter() {
                transitions.extend(self.transition(node, done.clone(), candidate));
            }
            let error = EventSelector::Exact(format!("{ERROR_INVOKE_PREFIX}{invoke_id}"));
            for candidate in invoke.on_error.iter() {
                transitions.extend(self.transition(node, error.clone(), candidate));
            }
        }

        let entry = self.actions(&id, &config.entry);
        let exit = self.actions(&id, &config.exit);
        let activities = self.activities(&id, &config.activities);
        let done_data = config
            .data
            .as_ref()
            .and_then(|name| self.data_mapper(&id, name));

        let history_default = if self.nodes[node.0].is_history() {
            self.history_default(node, config.target.as_deref())
        } else {
            Vec::new()
        };

        Parts {
            history_default,
            transitions,
            entry,
            exit,
            invocations,
            activities,
            delays,
            done_data,
        }
    }

    fn transition(
        &mut self,
        source: NodeId,
        selector: EventSelector,
        config: &TransitionConfig,
    ) -> Option<Transition<C>> {
        let state = self.nodes[source.0].id.clone();
        let mut valid = true;

        let mut targets = Vec::new();
        for target in &config.target {
            match self.resolve_target(source, target) {
                Some(node) => targets.push(node),
                None => {
                    valid = false;
                    self.problems.report(DefinitionError::UnresolvedTarget {
                        state: state.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        let guard = match &config.guard {
            None => None,
            Some(name) => {
                self.references.guards.insert(name.clone());
                match self.options.guards.get(name) {
                    Some(guard) => Some(NamedGuard {
                        name: name.clone(),
                        guard: guard.clone(),
                    }),
                    None => {
                        valid = false;
                        self.problems.report(DefinitionError::UnknownGuard {
                            state: state.clone(),
                            guard: name.clone(),
                        });
                        None
                    }
                }
            }
        };

        let in_state = match &config.in_state {
            None => None,
            Some(descriptor) => {
                let found = self.resolve_in(descriptor);
                if found.is_none() {
                    valid = false;
                    self.problems.report(DefinitionError::UnresolvedInState {
                        state: state.clone(),
                        descriptor: descriptor.clone(),
                    });
                }
                found
            }
        };

        let actions = self.actions(&state, &config.actions);
        if !valid || actions.len() != config.actions.len() {
            return None;
        }

        let child_relative = !config.target.is_empty()
            && config.target.iter().all(|t| t.starts_with(self.delimiter));
        let self_targeted = !targets.is_empty() && targets.iter().all(|t| *t == source);
        let internal = config
            .internal
            .unwrap_or(targets.is_empty() || child_relative || self_targeted);
        if internal && self_targeted {
            targets.clear();
        }

        Some(Transition {
            source,
            selector,
            targets,
            guard,
            in_state,
            actions,
            internal,
            meta: config.meta.clone(),
        })
    }

    /// `#id.sub` from the id index, `.child` from the source, anything else
    /// from the source's parent.
    fn resolve_target(&self, source: NodeId, target: &str) -> Option<NodeId> {
        if target.is_empty() {
            return None;
        }
        if let Some(reference) = target.strip_prefix('#') {
            return self.resolve_reference(reference);
        }
        if let Some(path) = target.strip_prefix(self.delimiter) {
            return self.descend(source, path);
        }
        let base = self.nodes[source.0].parent.unwrap_or(NodeId::ROOT);
        self.descend(base, target)
    }

    /// `in` descriptors are `#id.sub` or paths from the root.
    fn resolve_in(&self, descriptor: &str) -> Option<NodeId> {
        match descriptor.strip_prefix('#') {
            Some(reference) => self.resolve_reference(reference),
            None => self.descend(NodeId::ROOT, descriptor),
        }
    }

    /// Ids may contain the delimiter, so the longest matching id wins.
    fn resolve_reference(&self, reference: &str) -> Option<NodeId> {
        let segments: Vec<&str> = reference.split(self.delimiter).collect();
        (1..=segments.len()).rev().find_map(|split| {
            let node = self.ids.get(&segments[..split].join(self.delimiter))?;
            self.descend(*node, &segments[split..].join(self.delimiter))
        })
    }

    fn descend(&self, from: NodeId, path: &str) -> Option<NodeId> {
        path.split(self.delimiter)
            .filter(|s| !s.is_empty())
            .try_fold(from, |node, key| {
                self.nodes[node.0]
                    .children
                    .iter()
                    .copied()
                    .find(|c| self.nodes[c.0].key == key)
            })
    }

    fn history_default(&mut self, node: NodeId, target: Option<&str>) -> Vec<NodeId> {
        if let Some(target) = target {
            return match self.resolve_target(node, target) {
                Some(resolved) => vec![resolved],
                None => {
                    self.problems.report(DefinitionError::UnresolvedTarget {
                        state: self.nodes[node.0].id.clone(),
                        target: target.to_string(),
                    });
                    Vec::new()
                }
            };
        }

        let Some(parent) = self.nodes[node.0].parent else {
            return Vec::new();
        };
        let parent = &self.nodes[parent.0];
        let regular = parent
            .children
            .iter()
            .copied()
            .filter(|c| !self.nodes[c.0].is_history());
        if parent.is_parallel() {
            return regular.collect();
        }
        match parent.initial {
            Some(initial) if !self.nodes[initial.0].is_history() => vec![initial],
            _ => regular.take(1).collect(),
        }
    }

    fn delay(&mut self, state: &str, key: &str) -> Option<DelaySpec<C>> {
        self.references.delays.insert(key.to_string());
        if let Some(duration) = parse_delay_millis(key) {
            return Some(DelaySpec::Fixed(duration));
        }
        match self.options.delays.get(key) {
            Some(delay) => Some(DelaySpec::Named {
                name: key.to_string(),
                delay: delay.clone(),
            }),
            None => {
                self.problems.report(DefinitionError::UnknownDelay {
                    state: state.to_string(),
                    delay: key.to_string(),
                });
                None
            }
        }
    }

    fn actions(&mut self, state: &str, names: &[String]) -> Vec<NamedAction<C>> {
        let mut actions = Vec::new();
        for name in names {
            self.references.actions.insert(name.clone());
            match self.options.actions.get(name) {
                Some(action) => actions.push(NamedAction {
                    name: name.clone(),
                    action: action.clone(),
                }),
                None => self.problems.report(DefinitionError::UnknownAction {
                    state: state.to_string(),
                    action: name.clone(),
                }),
            }
        }
        actions
    }

    fn activities(&mut self, state: &str, names: &[String]) -> Vec<NamedActivity<C>> {
        let mut activities = Vec::new();
        for name in names {
            self.references.activities.insert(name.clone());
            match self.options.activities.get(name) {
                Some(activity) => activities.push(NamedActivity {
                    name: name.clone(),
                    activity: activity.clone(),
                }),
                None => self.problems.report(DefinitionError::UnknownActivity {
                    state: state.to_string(),
                    activity: name.clone(),
                }),
            }
        }
        activities
    }

    fn data_mapper(&mut self, state: &str, name: &str) -> Option<DataMapper<C>> {
        self.references.data.insert(name.to_string());
        let mapper = self.options.data.get(name).cloned();
        if mapper.is_none() {
            self.problems.report(DefinitionError::UnknownDataMapper {
                state: state.to_string(),
                mapper: name.to_string(),
            });
        }
        mapper
    }
}
