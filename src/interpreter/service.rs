//! Invoked services: futures started while their state is active.

use crate::core::Event;
use crate::interpreter::scheduler::{Envelope, Source};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Failure of an invoked service, delivered as `error.invoke.<id>`.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lets a running service post events back to its interpreter.
///
/// Events posted after the invoking state was exited are dropped.
#[derive(Clone)]
pub struct ServiceHandle {
    invoke_id: String,
    generation: u64,
    sender: UnboundedSender<Envelope>,
}

impl ServiceHandle {
    pub(crate) fn new(invoke_id: String, generation: u64, sender: UnboundedSender<Envelope>) -> Self {
        Self {
            invoke_id,
            generation,
            sender,
        }
    }

    pub fn invoke_id(&self) -> &str {
        &self.invoke_id
    }

    /// Post an event to the interpreter. Returns `false` once the
    /// interpreter is gone.
    pub fn send(&self, event: impl Into<Event>) -> bool {
        let envelope = Envelope {
            event: event.into(),
            source: Source::Emission {
                invoke_id: self.invoke_id.clone(),
                generation: self.generation,
            },
        };
        self.sender.send(envelope).is_ok()
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("invoke_id", &self.invoke_id)
            .field("generation", &self.generation)
            .finish()
    }
}

pub(crate) type ServiceFuture = BoxFuture<'static, Result<Value, ServiceError>>;

type StartFn<C> = dyn Fn(&C, &Event, ServiceHandle) -> ServiceFuture + Send + Sync;

/// A named service implementation.
///
/// The closure receives the context and event of the step that entered the
/// invoking state and returns the future to run.
pub struct Service<C> {
    start: Arc<StartFn<C>>,
}

impl<C> Service<C> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(&C, &Event, ServiceHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        Self {
            start: Arc::new(move |context: &C, event: &Event, handle: ServiceHandle| {
                f(context, event, handle).boxed()
            }),
        }
    }

    pub(crate) fn start(&self, context: &C, event: &Event, handle: ServiceHandle) -> ServiceFuture {
        (self.start)(context, event, handle)
    }
}

impl<C> Clone for Service<C> {
    fn clone(&self) -> Self {
        Self {
            start: Arc::clone(&self.start),
        }
    }
}

impl<C> fmt::Debug for Service<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Service(..)")
    }
}
