//! Guard predicates for controlling transitions.
//!
//! Guards are boolean functions of the context and the triggering event that
//! decide whether a candidate transition is taken. They must not have side
//! effects; a guard that fails (rather than returning `false`) aborts the
//! whole step.

use super::event::Event;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a fallible guard.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct GuardError {
    pub message: String,
}

impl GuardError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type Predicate<C> = dyn Fn(&C, &Event) -> Result<bool, GuardError> + Send + Sync;

/// Predicate that determines whether a transition can be taken.
///
/// # Example
///
/// ```rust
/// use harel::core::{Event, Guard};
///
/// #[derive(Clone, Debug)]
/// struct Ped {
///     waiting: u32,
/// }
///
/// let crowded = Guard::new(|ctx: &Ped, _event: &Event| ctx.waiting > 3);
///
/// let event = Event::new("PED_COUNTDOWN");
/// assert!(crowded.check(&Ped { waiting: 5 }, &event).unwrap());
/// assert!(!crowded.check(&Ped { waiting: 1 }, &event).unwrap());
/// ```
pub struct Guard<C> {
    predicate: Arc<Predicate<C>>,
}

impl<C> Guard<C> {
    /// Create a guard from an infallible predicate.
    ///
    /// The predicate must be deterministic and thread-safe (Send + Sync).
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Arc::new(move |ctx: &C, event: &Event| Ok(predicate(ctx, event))),
        }
    }

    /// Create a guard whose evaluation can fail.
    ///
    /// # Example
    ///
    /// ```rust
    /// use harel::core::{Event, Guard, GuardError};
    ///
    /// let needs_payload = Guard::fallible(|_ctx: &(), event: &Event| {
    ///     event
    ///         .data
    ///         .as_bool()
    ///         .ok_or_else(|| GuardError::new("payload must be a boolean"))
    /// });
    ///
    /// assert!(needs_payload.check(&(), &Event::new("GO")).is_err());
    /// ```
    pub fn fallible<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<bool, GuardError> + Send + Sync + 'static,
    {
        Guard {
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate the guard for this context and event.
    pub fn check(&self, context: &C, event: &Event) -> Result<bool, GuardError> {
        (self.predicate)(context, event)
    }
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Guard(..)")
    }
}
