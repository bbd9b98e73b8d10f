//! The transition engine.
//!
//! A step processes one event to completion: it selects the enabled
//! transitions, takes them as one microstep, then keeps taking eventless
//! transitions and processing raised events until nothing more applies.
//! Every step works on its own copy of the configuration, context and history,
//! so a failed step leaves the caller's state untouched.

use crate::builder::HistoryKind;
use crate::core::{Action, Event, EventSelector};
use crate::engine::error::{EvaluationError, InfiniteLoopError, StepError};
use crate::engine::resolver::{is_descendant, is_in_final_state, proper_ancestors, EntrySet};
use crate::engine::state::{Configuration, HistoryMemory, MachineState};
use crate::engine::step::{LifecycleLog, PendingAction, Step};
use crate::machine::{Machine, NamedAction, NodeId, TransitionId};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use tracing::trace;

/// Default bound on microsteps per processed event.
pub const DEFAULT_MAX_MICROSTEPS: usize = 1000;

/// Enter the initial configuration of the machine.
pub fn initial_step<C: Clone>(
    machine: &Machine<C>,
    context: C,
    max_microsteps: usize,
) -> Result<Step<C>, StepError> {
    let event = Event::init();
    let state = MachineState::new(Configuration::new(), context);
    let mut run = Run::new(machine, &state, max_microsteps);

    let memory = HistoryMemory::new();
    let mut entry = EntrySet::new(machine, &memory);
    entry.add_descendants(NodeId::ROOT);
    let nodes = entry.into_nodes();

    run.enter(nodes, &event)?;
    run.settle(&event)?;
    Ok(run.finish(event, true))
}

/// Process one event against `state`.
///
/// Returns an unchanged step when no transition is enabled.
pub fn step<C: Clone>(
    machine: &Machine<C>,
    state: &MachineState<C>,
    event: Event,
    max_microsteps: usize,
) -> Result<Step<C>, StepError> {
    if machine.is_strict() && !event.is_generated() && !machine.accepts(event.event_type()) {
        return Err(StepError::UnknownEvent {
            machine: machine.id().to_string(),
            event: event.event_type.clone(),
        });
    }

    let mut run = Run::new(machine, state, max_microsteps);
    let enabled = run.select(&event, false)?;
    if enabled.is_empty() {
        trace!(machine = machine.id(), event = %event, "no enabled transition");
        return Ok(run.finish(event, false));
    }

    run.microstep(&enabled, &event)?;
    run.settle(&event)?;
    Ok(run.finish(event, true))
}

/// Exit every active node, innermost first, running exit actions.
pub fn exit_all<C: Clone>(machine: &Machine<C>, state: &MachineState<C>) -> Result<Step<C>, StepError> {
    let event = Event::stop();
    let mut run = Run::new(machine, state, 0);
    let active: Vec<NodeId> = run.configuration.iter().rev().collect();
    for node in active {
        run.run_actions(&machine.node(node).exit, node, &event)?;
        run.configuration.remove(node);
        run.lifecycle.exited(node);
    }
    Ok(run.finish(event, true))
}

/// Working copy of a machine state while a step is computed.
struct Run<'m, C> {
    machine: &'m Machine<C>,
    configuration: Configuration,
    context: C,
    history: HistoryMemory,
    internal: VecDeque<Event>,
    actions: Vec<PendingAction<C>>,
    executed: Vec<String>,
    lifecycle: LifecycleLog,
    output: Option<Value>,
    microsteps: usize,
    limit: usize,
}

impl<'m, C: Clone> Run<'m, C> {
    fn new(machine: &'m Machine<C>, state: &MachineState<C>, limit: usize) -> Self {
        Self {
            machine,
            configuration: state.configuration.clone(),
            context: state.context.clone(),
            history: state.history.clone(),
            internal: VecDeque::new(),
            actions: Vec::new(),
            executed: Vec::new(),
            lifecycle: LifecycleLog::default(),
            output: None,
            microsteps: 0,
            limit,
        }
    }

    fn finish(self, event: Event, changed: bool) -> Step<C> {
        let done = is_in_final_state(self.machine, &self.configuration, NodeId::ROOT);
        Step {
            event,
            state: MachineState {
                configuration: self.configuration,
                context: self.context,
                history: self.history,
            },
            actions: self.actions,
            executed: self.executed,
            lifecycle: self.lifecycle.into_inner(),
            changed,
            done,
            output: if done { self.output } else { None },
            microsteps: self.microsteps,
        }
    }

    fn is_done(&self) -> bool {
        is_in_final_state(self.machine, &self.configuration, NodeId::ROOT)
    }

    /// Take eventless transitions and raised events until stable.
    fn settle(&mut self, trigger: &Event) -> Result<(), StepError> {
        let mut current = trigger.clone();
        while !self.is_done() {
            let eventless = self.select(&current, true)?;
            if !eventless.is_empty() {
                self.microstep(&eventless, &current)?;
                continue;
            }
            let Some(event) = self.internal.pop_front() else {
                break;
            };
            let enabled = self.select(&event, false)?;
            if !enabled.is_empty() {
                self.microstep(&enabled, &event)?;
            }
            current = event;
        }
        Ok(())
    }

    fn microstep(&mut self, enabled: &[TransitionId], event: &Event) -> Result<(), StepError> {
        if self.microsteps >= self.limit {
            return Err(InfiniteLoopError {
                event: event.event_type.clone(),
                limit: self.limit,
            }
            .into());
        }
        self.microsteps += 1;
        trace!(
            machine = self.machine.id(),
            event = %event,
            microstep = self.microsteps,
            transitions = ?enabled,
            "taking transitions"
        );

        self.exit_states(enabled, event)?;
        let machine = self.machine;
        for id in enabled {
            let transition = machine.transition_def(*id);
            self.run_actions(&transition.actions, transition.source, event)?;
        }

        let nodes = {
            let mut entry = EntrySet::new(machine, &self.history);
            for id in enabled {
                let transition = machine.transition_def(*id);
                for target in &transition.targets {
                    entry.add_descendants(*target);
                }
                let domain = self.domain(*id);
                for target in self.effective_targets(*id) {
                    entry.add_ancestors(target, domain);
                }
            }
            entry.into_nodes()
        };
        self.enter(nodes, event)
    }

    /// Transitions enabled by `event` (or the eventless ones), conflicts removed.
    fn select(&self, event: &Event, eventless: bool) -> Result<Vec<TransitionId>, StepError> {
        let mut enabled: Vec<TransitionId> = Vec::new();
        for atomic in self.configuration.atomic(self.machine) {
            let mut chain = vec![atomic];
            chain.extend(proper_ancestors(self.machine, atomic, None));
            'search: for node in chain {
                for id in self.candidates(node, event, eventless) {
                    if self.is_enabled(id, event)? {
                        if !enabled.contains(&id) {
                            enabled.push(id);
                        }
                        break 'search;
                    }
                }
            }
        }
        Ok(self.remove_conflicts(enabled))
    }

    /// Exact selectors first, then the wildcard, each in declaration order.
    fn candidates(&self, node: NodeId, event: &Event, eventless: bool) -> Vec<TransitionId> {
        let transitions = &self.machine.node(node).transitions;
        let ids = |pred: &dyn Fn(&EventSelector) -> bool| {
            transitions
                .iter()
                .enumerate()
                .filter(|(_, t)| pred(&t.selector))
                .map(|(index, _)| TransitionId { node, index })
                .collect::<Vec<_>>()
        };

        if eventless {
            return ids(&|s| s.is_eventless());
        }
        let mut out = ids(&|s| matches!(s, EventSelector::Exact(t) if *t == event.event_type));
        out.extend(ids(&|s| matches!(s, EventSelector::Wildcard)));
        out
    }

    fn is_enabled(&self, id: TransitionId, event: &Event) -> Result<bool, StepError> {
        let transition = self.machine.transition_def(id);
        if let Some(required) = transition.in_state {
            if !self.configuration.contains(required) {
                return Ok(false);
            }
        }
        match &transition.guard {
            None => Ok(true),
            Some(named) => named.guard.check(&self.context, event).map_err(|source| {
                EvaluationError::Guard {
                    state: self.machine.node(transition.source).id.clone(),
                    guard: named.name.clone(),
                    source,
                }
                .into()
            }),
        }
    }

    /// Earlier transitions in document order win, unless a later one comes
    /// from a descendant of the earlier one's source.
    fn remove_conflicts(&self, enabled: Vec<TransitionId>) -> Vec<TransitionId> {
        let mut filtered: Vec<(TransitionId, BTreeSet<NodeId>)> = Vec::new();
        for t1 in enabled {
            let exit1 = self.exit_set(t1);
            let source1 = self.machine.transition_def(t1).source;
            let mut preempted = false;
            let mut displaced = Vec::new();
            for (t2, exit2) in &filtered {
                if exit1.intersection(exit2).next().is_none() {
                    continue;
                }
                if is_descendant(self.machine, source1, self.machine.transition_def(*t2).source) {
                    displaced.push(*t2);
                } else {
                    preempted = true;
                    break;
                }
            }
            if !preempted {
                filtered.retain(|(t, _)| !displaced.contains(t));
                filtered.push((t1, exit1));
            }
        }
        filtered.into_iter().map(|(t, _)| t).collect()
    }

    /// Targets with history nodes replaced by what they resolve to.
    fn effective_targets(&self, id: TransitionId) -> Vec<NodeId> {
        let entry = EntrySet::new(self.machine, &self.history);
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self.machine.transition_def(id).targets.iter().rev().copied().collect();
        while let Some(target) = pending.pop() {
            if self.machine.node(target).is_history() {
                pending.extend(entry.history_targets(target).into_iter().rev());
            } else if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// The node whose active descendants a transition exits.
    fn domain(&self, id: TransitionId) -> Option<NodeId> {
        let targets = self.effective_targets(id);
        if targets.is_empty() {
            return None;
        }
        let transition = self.machine.transition_def(id);
        let source = transition.source;
        if transition.internal
            && self.machine.node(source).is_compound()
            && targets.iter().all(|t| is_descendant(self.machine, *t, source))
        {
            return Some(source);
        }

        let lcca = proper_ancestors(self.machine, source, None)
            .into_iter()
            .filter(|a| *a == NodeId::ROOT || self.machine.node(*a).is_compound())
            .find(|a| targets.iter().all(|t| is_descendant(self.machine, *t, *a)));
        Some(lcca.unwrap_or(NodeId::ROOT))
    }

    fn exit_set(&self, id: TransitionId) -> BTreeSet<NodeId> {
        match self.domain(id) {
            Some(domain) => self
                .configuration
                .iter()
                .filter(|n| is_descendant(self.machine, *n, domain))
                .collect(),
            None => BTreeSet::new(),
        }
    }

    fn exit_states(&mut self, enabled: &[TransitionId], event: &Event) -> Result<(), StepError> {
        let mut exiting = BTreeSet::new();
        for id in enabled {
            exiting.extend(self.exit_set(*id));
        }

        let machine = self.machine;
        for node in &exiting {
            for child in &machine.node(*node).children {
                let Some(kind) = machine.node(*child).history_kind() else {
                    continue;
                };
                let remembered = self
                    .configuration
                    .iter()
                    .filter(|n| match kind {
                        HistoryKind::Deep => {
                            machine.node(*n).is_atomic() && is_descendant(machine, *n, *node)
                        }
                        HistoryKind::Shallow => machine.node(*n).parent == Some(*node),
                    })
                    .collect();
                self.history.record(*child, remembered);
            }
        }

        for node in exiting.into_iter().rev() {
            self.run_actions(&machine.node(node).exit, node, event)?;
            self.configuration.remove(node);
            self.lifecycle.exited(node);
        }
        Ok(())
    }

    /// Enter `nodes` in document order, raising done events for final nodes.
    fn enter(&mut self, nodes: BTreeSet<NodeId>, event: &Event) -> Result<(), StepError> {
        let machine = self.machine;
        for node in nodes {
            if !self.configuration.insert(node) {
                continue;
            }
            self.lifecycle.entered(node);
            let state = machine.node(node);
            self.run_actions(&state.entry, node, event)?;

            if !state.is_final() {
                continue;
            }
            let Some(parent) = state.parent else {
                continue;
            };
            let data = match &state.done_data {
                Some(mapper) => mapper.map(&self.context, event).map_err(|source| {
                    EvaluationError::DoneData {
                        state: state.id.clone(),
                        source,
                    }
                })?,
                None => Value::Null,
            };
            if parent == NodeId::ROOT {
                self.output = Some(data.clone());
            }
            self.internal
                .push_back(Event::done_state(&machine.node(parent).id, data));

            if let Some(grandparent) = machine.node(parent).parent {
                if machine.node(grandparent).is_parallel()
                    && is_in_final_state(machine, &self.configuration, grandparent)
                {
                    self.internal
                        .push_back(Event::done_state(&machine.node(grandparent).id, Value::Null));
                }
            }
        }
        Ok(())
    }

    fn run_actions(
        &mut self,
        actions: &[NamedAction<C>],
        node: NodeId,
        event: &Event,
    ) -> Result<(), StepError> {
        for named in actions {
            self.executed.push(named.name.clone());
            match &named.action {
                Action::Assign(_) => {
                    named
                        .action
                        .apply(&mut self.context, event)
                        .map_err(|source| EvaluationError::Action {
                            state: self.machine.node(node).id.clone(),
                            action: named.name.clone(),
                            source,
                        })?;
                }
                Action::Raise(raised) => self.internal.push_back(raised.clone()),
                other => self.actions.push(PendingAction {
                    name: named.name.clone(),
                    action: other.clone(),
                    source: node,
                    event: event.clone(),
                }),
            }
        }
        Ok(())
    }
}
