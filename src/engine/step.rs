//! Output of one step of the transition engine.

use crate::core::{Action, Event};
use crate::engine::state::MachineState;
use crate::machine::{DelayedTransition, Invocation, Machine, NodeId};
use serde_json::Value;
use std::fmt;

/// A node entered or exited during the step, in the order it happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Entered(NodeId),
    Exited(NodeId),
}

/// An action the interpreter runs before the step is committed.
pub struct PendingAction<C> {
    pub name: String,
    pub action: Action<C>,
    /// Node whose entry, exit or transition declared the action
    pub source: NodeId,
    /// Event being processed when the action was scheduled
    pub event: Event,
}

impl<C> Clone for PendingAction<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
            source: self.source,
            event: self.event.clone(),
        }
    }
}

impl<C> fmt::Debug for PendingAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}) on {}", self.name, self.action, self.event)
    }
}

/// Result of processing one event to completion.
///
/// A step is pure data: nothing has been started, stopped or executed yet
/// apart from the assign actions already folded into `state.context`.
#[derive(Debug)]
pub struct Step<C> {
    /// Event the step processed
    pub event: Event,
    /// Configuration, context and history after the step
    pub state: MachineState<C>,
    /// Effect, send and log actions, in execution order
    pub actions: Vec<PendingAction<C>>,
    /// Names of every action executed, assign actions included
    pub executed: Vec<String>,
    /// Entered and exited nodes; nodes entered and exited within the step are omitted
    pub lifecycle: Vec<Lifecycle>,
    /// Whether any transition was taken
    pub changed: bool,
    /// Whether the root reached a final configuration
    pub done: bool,
    /// Done data of the final node that completed the machine
    pub output: Option<Value>,
    pub microsteps: usize,
}

impl<C> Step<C> {
    pub fn entered(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.lifecycle.iter().filter_map(|l| match l {
            Lifecycle::Entered(n) => Some(*n),
            Lifecycle::Exited(_) => None,
        })
    }

    pub fn exited(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.lifecycle.iter().filter_map(|l| match l {
            Lifecycle::Exited(n) => Some(*n),
            Lifecycle::Entered(_) => None,
        })
    }

    /// Services the interpreter has to start, in entry order.
    pub fn services_to_start<'m>(&self, machine: &'m Machine<C>) -> Vec<&'m Invocation<C>> {
        self.entered()
            .flat_map(|n| machine.node(n).invocations.iter())
            .collect()
    }

    /// Services the interpreter has to stop, in exit order.
    pub fn services_to_stop<'m>(&self, machine: &'m Machine<C>) -> Vec<&'m Invocation<C>> {
        self.exited()
            .flat_map(|n| machine.node(n).invocations.iter())
            .collect()
    }

    /// Delayed transitions to schedule for the entered nodes.
    pub fn timers_to_schedule<'m>(&self, machine: &'m Machine<C>) -> Vec<&'m DelayedTransition<C>> {
        self.entered()
            .flat_map(|n| machine.node(n).delays.iter())
            .collect()
    }

    /// Delayed transitions whose timers must be cancelled.
    pub fn timers_to_cancel<'m>(&self, machine: &'m Machine<C>) -> Vec<&'m DelayedTransition<C>> {
        self.exited()
            .flat_map(|n| machine.node(n).delays.iter())
            .collect()
    }
}

/// Ordered lifecycle log that drops nodes entered and exited in one step.
#[derive(Default)]
pub(crate) struct LifecycleLog(Vec<Lifecycle>);

impl LifecycleLog {
    pub(crate) fn entered(&mut self, node: NodeId) {
        self.0.push(Lifecycle::Entered(node));
    }

    pub(crate) fn exited(&mut self, node: NodeId) {
        let transient = self
            .0
            .iter()
            .rposition(|l| *l == Lifecycle::Entered(node));
        match transient {
            Some(index) => {
                self.0.remove(index);
            }
            None => self.0.push(Lifecycle::Exited(node)),
        }
    }

    pub(crate) fn into_inner(self) -> Vec<Lifecycle> {
        self.0
    }
}
