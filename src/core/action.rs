//! Actions run on entry, on exit, and while taking transitions.
//!
//! Assign actions update the context while the step is computed. Every other
//! action is handed back to the interpreter, which runs it once the step has
//! settled, against the final context of that step.

use super::event::Event;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by an action or a data mapper.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub(crate) type AssignFn<C> = dyn Fn(&mut C, &Event) -> Result<(), ActionError> + Send + Sync;
pub(crate) type EffectFn<C> = dyn Fn(&C, &Event) -> Result<(), ActionError> + Send + Sync;
pub(crate) type LogFn<C> = dyn Fn(&C, &Event) -> String + Send + Sync;

/// An action implementation.
pub enum Action<C> {
    /// Mutates the context during the step
    Assign(Arc<AssignFn<C>>),
    /// Side effect executed by the interpreter; its failure rolls the step back
    Effect(Arc<EffectFn<C>>),
    /// Raises an internal event, processed within the same step
    Raise(Event),
    /// Sends an event to the interpreter's external queue
    Send(Event),
    /// Emits a log line through `tracing`
    Log(Arc<LogFn<C>>),
}

impl<C> Action<C> {
    /// Assign action that cannot fail.
    ///
    /// # Example
    ///
    /// ```rust
    /// use harel::core::{Action, Event};
    ///
    /// let increment = Action::assign(|count: &mut u32, _: &Event| *count += 1);
    /// let mut count = 0;
    /// increment.apply(&mut count, &Event::new("INC")).unwrap();
    /// assert_eq!(count, 1);
    /// ```
    pub fn assign<F>(f: F) -> Self
    where
        F: Fn(&mut C, &Event) + Send + Sync + 'static,
    {
        Action::Assign(Arc::new(move |ctx: &mut C, event: &Event| {
            f(ctx, event);
            Ok(())
        }))
    }

    pub fn try_assign<F>(f: F) -> Self
    where
        F: Fn(&mut C, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Action::Assign(Arc::new(f))
    }

    pub fn effect<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) + Send + Sync + 'static,
    {
        Action::Effect(Arc::new(move |ctx: &C, event: &Event| {
            f(ctx, event);
            Ok(())
        }))
    }

    pub fn try_effect<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Action::Effect(Arc::new(f))
    }

    pub fn raise(event: impl Into<Event>) -> Self {
        Action::Raise(event.into())
    }

    pub fn send(event: impl Into<Event>) -> Self {
        Action::Send(event.into())
    }

    pub fn log<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> String + Send + Sync + 'static,
    {
        Action::Log(Arc::new(f))
    }

    /// Run an assign action against a working context. Other kinds are no-ops.
    pub fn apply(&self, context: &mut C, event: &Event) -> Result<(), ActionError> {
        match self {
            Action::Assign(f) => f(context, event),
            _ => Ok(()),
        }
    }

    pub fn is_assign(&self) -> bool {
        matches!(self, Action::Assign(_))
    }
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        match self {
            Action::Assign(f) => Action::Assign(Arc::clone(f)),
            Action::Effect(f) => Action::Effect(Arc::clone(f)),
            Action::Raise(e) => Action::Raise(e.clone()),
            Action::Send(e) => Action::Send(e.clone()),
            Action::Log(f) => Action::Log(Arc::clone(f)),
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Assign(_) => f.write_str("Assign(..)"),
            Action::Effect(_) => f.write_str("Effect(..)"),
            Action::Raise(e) => write!(f, "Raise({e})"),
            Action::Send(e) => write!(f, "Send({e})"),
            Action::Log(_) => f.write_str("Log(..)"),
        }
    }
}

/// Computes the payload of a `done.state.*` event from a final node.
pub struct DataMapper<C> {
    mapper: Arc<dyn Fn(&C, &Event) -> Result<Value, ActionError> + Send + Sync>,
}

impl<C> DataMapper<C> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        Self {
            mapper: Arc::new(move |ctx: &C, event: &Event| Ok(f(ctx, event))),
        }
    }

    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        Self {
            mapper: Arc::new(f),
        }
    }

    pub fn map(&self, context: &C, event: &Event) -> Result<Value, ActionError> {
        (self.mapper)(context, event)
    }
}

impl<C> Clone for DataMapper<C> {
    fn clone(&self) -> Self {
        Self {
            mapper: Arc::clone(&self.mapper),
        }
    }
}

/// Stops a running activity.
pub type Disposer = Box<dyn FnOnce() + Send>;

/// A long-running activity started on entry and disposed on exit.
pub struct Activity<C> {
    start: Arc<dyn Fn(&C, &Event) -> Disposer + Send + Sync>,
}

impl<C> Activity<C> {
    /// # Example
    ///
    /// ```rust
    /// use harel::core::{Activity, Event};
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    ///
    /// let running = Arc::new(AtomicBool::new(false));
    /// let flag = Arc::clone(&running);
    /// let beeping = Activity::new(move |_: &(), _: &Event| {
    ///     flag.store(true, Ordering::SeqCst);
    ///     let flag = Arc::clone(&flag);
    ///     Box::new(move || flag.store(false, Ordering::SeqCst))
    /// });
    ///
    /// let dispose = beeping.start(&(), &Event::new("GO"));
    /// assert!(running.load(Ordering::SeqCst));
    /// dispose();
    /// assert!(!running.load(Ordering::SeqCst));
    /// ```
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Disposer + Send + Sync + 'static,
    {
        Self { start: Arc::new(f) }
    }

    pub fn start(&self, context: &C, event: &Event) -> Disposer {
        (self.start)(context, event)
    }
}

impl<C> Clone for Activity<C> {
    fn clone(&self) -> Self {
        Self {
            start: Arc::clone(&self.start),
        }
    }
}
