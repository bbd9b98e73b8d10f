//! Imperative shell around the pure engine.
//!
//! An [`Interpreter`] owns one running instance of a shared [`Machine`]: its
//! current state, its event queue, its timers, services and activities, and
//! its subscribers. Events are processed one at a time, each to completion,
//! and every event a step produces (send actions, service emissions) is
//! queued behind it and processed before `send` returns.
//!
//! Timers and services run on the tokio runtime the interpreter was started
//! in. Their results arrive through a mailbox that the owner drains with
//! [`process_mailbox`](Interpreter::process_mailbox) or awaits with
//! [`run_next`](Interpreter::run_next) and
//! [`run_until_done`](Interpreter::run_until_done).

pub mod options;
mod scheduler;
pub mod service;

pub use options::InterpreterOptions;
pub use service::{Service, ServiceError, ServiceHandle};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointMetadata, CHECKPOINT_VERSION};
use crate::core::{Action, Context, Event, State, TransitionLog, TransitionRecord};
use crate::engine::{self, EvaluationError, MachineState, PendingAction, Step, StepError};
use crate::machine::{Machine, NodeId};
use chrono::Utc;
use scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpreterStatus {
    NotStarted,
    Running,
    Stopped,
}

/// Handle returned by `subscribe` and `on_error`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug, Error)]
pub enum InterpreterError {
    /// The event was rolled back; the interpreter keeps running.
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Event '{event}' sent to '{machine}' before it was started")]
    NotStarted { machine: String, event: String },

    #[error("Interpreter of '{machine}' has been stopped")]
    Stopped { machine: String },

    #[error("Machine '{machine}' uses delayed transitions or services and needs a tokio runtime")]
    RuntimeUnavailable { machine: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

type StateListener<C> = Box<dyn FnMut(&State<C>) + Send>;
type ErrorListener = Box<dyn FnMut(&InterpreterError) + Send>;

/// A running instance of a machine.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, StateNodeConfig};
/// use harel::interpreter::Interpreter;
/// use std::sync::{Arc, Mutex};
///
/// let config = StateNodeConfig::compound("green")
///     .state("green", StateNodeConfig::atomic().on("TIMER", "yellow"))
///     .state("yellow", StateNodeConfig::atomic().on("TIMER", "red"))
///     .state("red", StateNodeConfig::atomic().on("TIMER", "green"))
///     .into_machine("light");
/// let machine = MachineBuilder::<()>::new(config).build().unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let mut light = Interpreter::new(machine);
/// let sink = Arc::clone(&seen);
/// light.subscribe(move |state| sink.lock().unwrap().push(state.value.to_string()));
///
/// light.start().unwrap();
/// light.send("TIMER").unwrap();
/// light.send("TIMER").unwrap();
/// light.stop();
/// light.send("TIMER").unwrap(); // dropped
///
/// assert_eq!(*seen.lock().unwrap(), vec!["green", "yellow", "red"]);
/// ```
pub struct Interpreter<C: Context> {
    machine: Arc<Machine<C>>,
    options: InterpreterOptions,
    status: InterpreterStatus,
    state: Option<MachineState<C>>,
    snapshot: Option<State<C>>,
    deferred: VecDeque<Event>,
    queue: VecDeque<Event>,
    scheduler: Scheduler,
    listeners: Vec<(Subscription, StateListener<C>)>,
    error_listeners: Vec<(Subscription, ErrorListener)>,
    next_subscription: u64,
    transitions: TransitionLog,
    metadata: CheckpointMetadata,
}

impl<C: Context> Interpreter<C> {
    pub fn new(machine: impl Into<Arc<Machine<C>>>) -> Self {
        Self::with_options(machine, InterpreterOptions::default())
    }

    pub fn with_options(machine: impl Into<Arc<Machine<C>>>, options: InterpreterOptions) -> Self {
        Self {
            machine: machine.into(),
            options,
            status: InterpreterStatus::NotStarted,
            state: None,
            snapshot: None,
            deferred: VecDeque::new(),
            queue: VecDeque::new(),
            scheduler: Scheduler::new(),
            listeners: Vec::new(),
            error_listeners: Vec::new(),
            next_subscription: 0,
            transitions: TransitionLog::new(),
            metadata: CheckpointMetadata::default(),
        }
    }

    pub fn machine(&self) -> &Arc<Machine<C>> {
        &self.machine
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn status(&self) -> InterpreterStatus {
        self.status
    }

    /// Last committed state; `None` before start.
    pub fn snapshot(&self) -> Option<&State<C>> {
        self.snapshot.as_ref()
    }

    /// Engine state behind the snapshot.
    pub fn machine_state(&self) -> Option<&MachineState<C>> {
        self.state.as_ref()
    }

    pub fn transitions(&self) -> &TransitionLog {
        &self.transitions
    }

    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending_timers()
    }

    pub fn running_services(&self) -> usize {
        self.scheduler.running_services()
    }

    /// Enter the initial configuration, then process deferred events.
    ///
    /// Starting a running interpreter returns its current state. When a
    /// deferred event fails it is rolled back and the first such error is
    /// returned; the interpreter is running either way.
    pub fn start(&mut self) -> Result<State<C>, InterpreterError> {
        match (self.status, &self.snapshot) {
            (InterpreterStatus::Running, Some(snapshot)) => return Ok(snapshot.clone()),
            (InterpreterStatus::Stopped, _) => {
                return Err(InterpreterError::Stopped {
                    machine: self.machine.id().to_string(),
                })
            }
            _ => {}
        }
        if self.machine.needs_runtime() && !self.scheduler.attach() {
            return Err(InterpreterError::RuntimeUnavailable {
                machine: self.machine.id().to_string(),
            });
        }

        let context = self.machine.context().clone();
        let step = match engine::initial_step(&self.machine, context, self.options.max_microsteps) {
            Ok(step) => step,
            Err(error) => return Err(self.step_failed(error)),
        };

        self.status = InterpreterStatus::Running;
        self.metadata = CheckpointMetadata::default();
        if let Err(error) = self.commit(step) {
            self.status = InterpreterStatus::NotStarted;
            return Err(self.step_failed(error));
        }
        info!(machine = %self.machine.id(), "interpreter started");

        let deferred: Vec<Event> = self.deferred.drain(..).collect();
        self.queue.extend(deferred);
        self.drain()?;

        self.snapshot.clone().ok_or(InterpreterError::Stopped {
            machine: self.machine.id().to_string(),
        })
    }

    /// Process `event` and everything it causes to completion.
    ///
    /// Before start the event is deferred (or rejected when deferral is
    /// off); after stop it is silently dropped. A failing event is rolled
    /// back and reported; events queued behind it are still processed.
    pub fn send(&mut self, event: impl Into<Event>) -> Result<(), InterpreterError> {
        let event = event.into();
        match self.status {
            InterpreterStatus::NotStarted if self.options.defer_events => {
                debug!(machine = %self.machine.id(), event = %event, "event deferred until start");
                self.deferred.push_back(event);
                Ok(())
            }
            InterpreterStatus::NotStarted => Err(InterpreterError::NotStarted {
                machine: self.machine.id().to_string(),
                event: event.event_type,
            }),
            InterpreterStatus::Stopped => {
                debug!(machine = %self.machine.id(), event = %event, "event dropped, interpreter stopped");
                Ok(())
            }
            InterpreterStatus::Running => {
                self.queue.push_back(event);
                self.drain()
            }
        }
    }

    /// Stop timers, services and activities, then run the exit actions of
    /// every active state. Idempotent.
    pub fn stop(&mut self) {
        match self.status {
            InterpreterStatus::Stopped => return,
            InterpreterStatus::NotStarted => {
                self.status = InterpreterStatus::Stopped;
                self.deferred.clear();
                return;
            }
            InterpreterStatus::Running => {}
        }
        self.status = InterpreterStatus::Stopped;
        self.scheduler.shutdown();

        if let Some(state) = &self.state {
            match engine::exit_all(&self.machine, state) {
                Ok(step) => {
                    // Nothing is left to roll back to; failures are only reported.
                    if let Err(error) = self.run_actions(&step.actions, &step.state.context) {
                        self.step_failed(error);
                    }
                }
                Err(error) => {
                    self.step_failed(error);
                }
            }
        }
        self.queue.clear();
        info!(machine = %self.machine.id(), "interpreter stopped");
    }

    /// Listen to every committed state. The current state, if any, is
    /// delivered immediately.
    pub fn subscribe<F>(&mut self, listener: F) -> Subscription
    where
        F: FnMut(&State<C>) + Send + 'static,
    {
        let mut listener: StateListener<C> = Box::new(listener);
        if let Some(snapshot) = &self.snapshot {
            listener(snapshot);
        }
        let subscription = self.next_subscription();
        self.listeners.push((subscription, listener));
        subscription
    }

    /// Listen to failed steps and failed effect actions.
    pub fn on_error<F>(&mut self, listener: F) -> Subscription
    where
        F: FnMut(&InterpreterError) + Send + 'static,
    {
        let subscription = self.next_subscription();
        self.error_listeners.push((subscription, Box::new(listener)));
        subscription
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.listeners.len() + self.error_listeners.len();
        self.listeners.retain(|(s, _)| *s != subscription);
        self.error_listeners.retain(|(s, _)| *s != subscription);
        before != self.listeners.len() + self.error_listeners.len()
    }

    fn next_subscription(&mut self) -> Subscription {
        self.next_subscription += 1;
        Subscription(self.next_subscription)
    }

    /// Process every timer fire and service result already delivered,
    /// without waiting. Returns how many were processed.
    pub fn process_mailbox(&mut self) -> Result<usize, InterpreterError> {
        let mut delivered = 0;
        let mut first_error = None;
        while self.status == InterpreterStatus::Running {
            let Some(envelope) = self.scheduler.try_next() else {
                break;
            };
            delivered += 1;
            self.queue.push_back(envelope.event);
            if let Err(error) = self.drain() {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(delivered), Err)
    }

    /// Wait for the next timer fire or service result and process it.
    ///
    /// `None` when the interpreter is not running or nothing is pending
    /// that could still deliver one.
    pub async fn run_next(&mut self) -> Option<Result<(), InterpreterError>> {
        if self.status != InterpreterStatus::Running {
            return None;
        }
        let envelope = self.scheduler.next().await?;
        trace!(machine = %self.machine.id(), event = %envelope.event, "mailbox delivery");
        self.queue.push_back(envelope.event);
        Some(self.drain())
    }

    /// Keep processing mailbox deliveries until the machine stops (for
    /// example by reaching a final state) or nothing is pending anymore.
    pub async fn run_until_done(&mut self) -> Result<(), InterpreterError> {
        while let Some(result) = self.run_next().await {
            result?;
        }
        Ok(())
    }

    /// Capture the current state for a later [`restore`](Self::restore).
    pub fn checkpoint(&self) -> Result<Checkpoint<C>, CheckpointError> {
        let (Some(state), Some(snapshot)) = (&self.state, &self.snapshot) else {
            return Err(CheckpointError::NotStarted);
        };
        Ok(Checkpoint {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            machine_id: self.machine.id().to_string(),
            machine_version: self.machine.version().map(String::from),
            configuration: state.configuration.ids(&self.machine),
            context: state.context.clone(),
            history: snapshot.history.clone(),
            event: snapshot.event.event_type.clone(),
            transitions: self.transitions.clone(),
            metadata: self.metadata.clone(),
        })
    }

    /// Resume a checkpointed interpreter.
    ///
    /// Timers, services and activities of the active states are started
    /// again; entry actions are not re-run.
    pub fn restore(
        machine: impl Into<Arc<Machine<C>>>,
        checkpoint: &Checkpoint<C>,
        options: InterpreterOptions,
    ) -> Result<Self, InterpreterError> {
        let mut interpreter = Self::with_options(machine, options);
        let machine = Arc::clone(&interpreter.machine);
        checkpoint.validate(&machine)?;
        if machine.needs_runtime() && !interpreter.scheduler.attach() {
            return Err(InterpreterError::RuntimeUnavailable {
                machine: machine.id().to_string(),
            });
        }

        let state = checkpoint.machine_state(&machine)?;
        let event = Event::new(checkpoint.event.clone());
        let snapshot = machine.snapshot(&state, event.clone(), false, Vec::new(), None);
        let active: Vec<NodeId> = state.configuration.iter().collect();
        let done = snapshot.done;

        interpreter.state = Some(state);
        interpreter.snapshot = Some(snapshot);
        interpreter.transitions = checkpoint.transitions.clone();
        interpreter.metadata = checkpoint.metadata.clone();
        interpreter.status = InterpreterStatus::Running;
        for node in active {
            interpreter.start_work(node, &event);
        }
        info!(machine = %machine.id(), checkpoint = %checkpoint.id, "interpreter restored");

        if done {
            interpreter.stop();
        }
        Ok(interpreter)
    }

    fn drain(&mut self) -> Result<(), InterpreterError> {
        let mut first_error = None;
        while self.status == InterpreterStatus::Running {
            let Some(event) = self.queue.pop_front() else {
                break;
            };
            if let Err(error) = self.process(event) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn process(&mut self, event: Event) -> Result<(), InterpreterError> {
        let Some(current) = &self.state else {
            return Ok(());
        };
        debug!(machine = %self.machine.id(), event = %event, "processing event");
        match engine::step(&self.machine, current, event, self.options.max_microsteps) {
            Ok(step) => match self.commit(step) {
                Ok(()) => Ok(()),
                Err(error) => Err(self.step_failed(error)),
            },
            Err(error) => Err(self.step_failed(error)),
        }
    }

    fn step_failed(&mut self, error: StepError) -> InterpreterError {
        let error = InterpreterError::Step(error);
        warn!(machine = %self.machine.id(), %error, "step rolled back");
        self.report(&error);
        error
    }

    fn report(&mut self, error: &InterpreterError) {
        for (_, listener) in self.error_listeners.iter_mut() {
            listener(error);
        }
    }

    /// Run the step's effects, then make it the current state and carry out
    /// what it asks for. A failing effect discards the step.
    fn commit(&mut self, step: Step<C>) -> Result<(), StepError> {
        let machine = Arc::clone(&self.machine);
        if !step.changed {
            self.metadata.events_processed += 1;
            self.metadata.updated_at = Utc::now();
            trace!(machine = %machine.id(), event = %step.event, "event changed nothing");
            return Ok(());
        }
        let sends = self.run_actions(&step.actions, &step.state.context)?;
        self.metadata.events_processed += 1;
        self.metadata.updated_at = Utc::now();

        let from = self
            .state
            .as_ref()
            .map(|s| atomic_paths(&machine, s))
            .unwrap_or_default();
        let exited: Vec<NodeId> = step.exited().collect();
        let entered: Vec<NodeId> = step.entered().collect();
        let Step {
            event,
            state,
            executed,
            done,
            output,
            microsteps,
            ..
        } = step;

        for node in exited {
            self.stop_work(node);
        }
        let to = atomic_paths(&machine, &state);
        let snapshot = machine.snapshot(&state, event.clone(), true, executed, output);
        self.state = Some(state);

        self.queue.extend(sends);
        for node in entered {
            self.start_work(node, &event);
        }

        if self.options.record_transitions {
            self.transitions = self.transitions.record(TransitionRecord {
                from,
                to,
                event: event.event_type.clone(),
                timestamp: Utc::now(),
                microsteps,
            });
        }
        debug!(machine = %machine.id(), event = %event, state = %snapshot.value, "step committed");

        self.snapshot = Some(snapshot);
        if let Some(snapshot) = &self.snapshot {
            for (_, listener) in self.listeners.iter_mut() {
                listener(snapshot);
            }
        }

        if done {
            info!(machine = %machine.id(), "machine reached its final state");
            self.stop();
        }
        Ok(())
    }

    /// Run effect and log actions; returns the events send actions queue.
    fn run_actions(&self, actions: &[PendingAction<C>], context: &C) -> Result<Vec<Event>, StepError> {
        let mut sends = Vec::new();
        if !self.options.execute_actions {
            return Ok(sends);
        }
        for pending in actions {
            match &pending.action {
                Action::Effect(effect) => {
                    effect(context, &pending.event).map_err(|source| EvaluationError::Action {
                        state: self.machine.node(pending.source).id.clone(),
                        action: pending.name.clone(),
                        source,
                    })?;
                }
                Action::Send(event) => sends.push(event.clone()),
                Action::Log(log) => {
                    let line = log(context, &pending.event);
                    info!(machine = %self.machine.id(), action = %pending.name, "{line}");
                }
                Action::Assign(_) | Action::Raise(_) => {}
            }
        }
        Ok(sends)
    }

    fn start_work(&mut self, node: NodeId, event: &Event) {
        let machine = Arc::clone(&self.machine);
        let Some(state) = &self.state else {
            return;
        };
        let node_def = machine.node(node);
        for delayed in node_def.delays() {
            let delay = delayed.delay().duration(&state.context, event);
            self.scheduler
                .schedule_timer(node, delayed.key(), delayed.event_type(), delay);
        }
        for activity in &node_def.activities {
            let disposer = activity.activity.start(&state.context, event);
            self.scheduler.start_activity(node, &activity.name, disposer);
        }
        for invocation in node_def.invocations() {
            self.scheduler.start_service(invocation.id(), |handle| {
                invocation.service().start(&state.context, event, handle)
            });
        }
    }

    fn stop_work(&mut self, node: NodeId) {
        let machine = Arc::clone(&self.machine);
        let node_def = machine.node(node);
        for delayed in node_def.delays() {
            self.scheduler.cancel_timer(node, delayed.key());
        }
        for activity in &node_def.activities {
            self.scheduler.stop_activity(node, &activity.name);
        }
        for invocation in node_def.invocations() {
            self.scheduler.stop_service(invocation.id());
        }
    }
}

fn atomic_paths<C>(machine: &Machine<C>, state: &MachineState<C>) -> Vec<String> {
    state
        .configuration
        .atomic(machine)
        .map(|node| machine.descriptor(node))
        .collect()
}
