//! State nodes stored in the machine's arena.
//!
//! Nodes are laid out in preorder, so comparing two `NodeId`s compares their
//! document order. Parent and child links are indices into the arena.

use crate::builder::{Delay, HistoryKind};
use crate::core::{Action, Activity, DataMapper, Event, EventSelector, Guard};
use crate::interpreter::Service;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Index of a node in the machine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The root node of every machine.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryKind),
}

/// Position of a transition: owning node and index in its table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionId {
    pub node: NodeId,
    pub index: usize,
}

/// A named action resolved against the machine options.
pub struct NamedAction<C> {
    pub name: String,
    pub action: Action<C>,
}

impl<C> Clone for NamedAction<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
        }
    }
}

impl<C> fmt::Debug for NamedAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.action)
    }
}

pub struct NamedGuard<C> {
    pub name: String,
    pub guard: Guard<C>,
}

impl<C> Clone for NamedGuard<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            guard: self.guard.clone(),
        }
    }
}

/// A transition with every target resolved to a node.
pub struct Transition<C> {
    pub(crate) source: NodeId,
    pub(crate) selector: EventSelector,
    pub(crate) targets: Vec<NodeId>,
    pub(crate) guard: Option<NamedGuard<C>>,
    pub(crate) in_state: Option<NodeId>,
    pub(crate) actions: Vec<NamedAction<C>>,
    pub(crate) internal: bool,
    pub(crate) meta: Option<Value>,
}

impl<C> Transition<C> {
    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn selector(&self) -> &EventSelector {
        &self.selector
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn is_targetless(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn guard_name(&self) -> Option<&str> {
        self.guard.as_ref().map(|g| g.name.as_str())
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }
}

impl<C> Clone for Transition<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            selector: self.selector.clone(),
            targets: self.targets.clone(),
            guard: self.guard.clone(),
            in_state: self.in_state,
            actions: self.actions.clone(),
            internal: self.internal,
            meta: self.meta.clone(),
        }
    }
}

impl<C> fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("selector", &self.selector)
            .field("targets", &self.targets)
            .field("guard", &self.guard_name())
            .field("in_state", &self.in_state)
            .field("actions", &self.actions)
            .field("internal", &self.internal)
            .finish()
    }
}

/// A service started while the declaring node is active.
pub struct Invocation<C> {
    pub(crate) id: String,
    pub(crate) src: String,
    pub(crate) service: Service<C>,
}

impl<C> Invocation<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub(crate) fn service(&self) -> &Service<C> {
        &self.service
    }
}

impl<C> Clone for Invocation<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            src: self.src.clone(),
            service: self.service.clone(),
        }
    }
}

pub struct NamedActivity<C> {
    pub name: String,
    pub activity: Activity<C>,
}

impl<C> Clone for NamedActivity<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            activity: self.activity.clone(),
        }
    }
}

pub enum DelaySpec<C> {
    Fixed(Duration),
    Named { name: String, delay: Delay<C> },
}

impl<C> DelaySpec<C> {
    pub fn duration(&self, context: &C, event: &Event) -> Duration {
        match self {
            DelaySpec::Fixed(duration) => *duration,
            DelaySpec::Named { delay, .. } => delay.duration(context, event),
        }
    }
}

impl<C> Clone for DelaySpec<C> {
    fn clone(&self) -> Self {
        match self {
            DelaySpec::Fixed(d) => DelaySpec::Fixed(*d),
            DelaySpec::Named { name, delay } => DelaySpec::Named {
                name: name.clone(),
                delay: delay.clone(),
            },
        }
    }
}

/// A timer registered while the declaring node is active.
///
/// When it fires, the interpreter receives an event of type `event_type`,
/// which the node's `after` transitions listen on.
pub struct DelayedTransition<C> {
    pub(crate) key: String,
    pub(crate) event_type: String,
    pub(crate) delay: DelaySpec<C>,
}

impl<C> DelayedTransition<C> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn delay(&self) -> &DelaySpec<C> {
        &self.delay
    }
}

impl<C> Clone for DelayedTransition<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            event_type: self.event_type.clone(),
            delay: self.delay.clone(),
        }
    }
}

/// One state node.
pub struct StateNode<C> {
    pub(crate) key: String,
    pub(crate) id: String,
    pub(crate) path: Vec<String>,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// One past the index of the last descendant
    pub(crate) subtree_end: usize,
    pub(crate) initial: Option<NodeId>,
    /// Targets a history node falls back to before anything is recorded
    pub(crate) history_default: Vec<NodeId>,
    /// Candidate transitions in declaration order
    pub(crate) transitions: Vec<Transition<C>>,
    pub(crate) entry: Vec<NamedAction<C>>,
    pub(crate) exit: Vec<NamedAction<C>>,
    pub(crate) invocations: Vec<Invocation<C>>,
    pub(crate) activities: Vec<NamedActivity<C>>,
    pub(crate) delays: Vec<DelayedTransition<C>>,
    pub(crate) done_data: Option<DataMapper<C>>,
    pub(crate) meta: Option<Value>,
}

impl<C> StateNode<C> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Keys from the root down to this node; empty for the root.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn initial(&self) -> Option<NodeId> {
        self.initial
    }

    pub fn transitions(&self) -> &[Transition<C>] {
        &self.transitions
    }

    pub fn invocations(&self) -> &[Invocation<C>] {
        &self.invocations
    }

    pub fn delays(&self) -> &[DelayedTransition<C>] {
        &self.delays
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Atomic and final nodes have no active children.
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, NodeKind::Atomic | NodeKind::Final)
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.kind, NodeKind::Compound)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, NodeKind::Parallel)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.kind, NodeKind::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self.kind, NodeKind::History(_))
    }

    pub fn history_kind(&self) -> Option<HistoryKind> {
        match self.kind {
            NodeKind::History(kind) => Some(kind),
            _ => None,
        }
    }
}

impl<C> Clone for StateNode<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            id: self.id.clone(),
            path: self.path.clone(),
            kind: self.kind,
            parent: self.parent,
            children: self.children.clone(),
            subtree_end: self.subtree_end,
            initial: self.initial,
            history_default: self.history_default.clone(),
            transitions: self.transitions.clone(),
            entry: self.entry.clone(),
            exit: self.exit.clone(),
            invocations: self.invocations.clone(),
            activities: self.activities.clone(),
            delays: self.delays.clone(),
            done_data: self.done_data.clone(),
            meta: self.meta.clone(),
        }
    }
}

impl<C> fmt::Debug for StateNode<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("transitions", &self.transitions)
            .finish()
    }
}
