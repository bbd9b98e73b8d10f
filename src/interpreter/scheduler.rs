//! Timers, services and activities owned by one interpreter.
//!
//! Timers and services run as tokio tasks. Their only way back into the
//! interpreter is the mailbox; every message carries the generation of the
//! registration that produced it, and messages whose registration has been
//! cancelled or replaced are dropped on arrival.

use crate::core::{Disposer, Event};
use crate::interpreter::service::{ServiceFuture, ServiceHandle};
use crate::machine::NodeId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Where a mailbox message came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    Timer {
        node: NodeId,
        key: String,
        generation: u64,
    },
    /// Completion or failure of a service
    Service { invoke_id: String, generation: u64 },
    /// Event posted by a running service through its handle
    Emission { invoke_id: String, generation: u64 },
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) event: Event,
    pub(crate) source: Source,
}

struct Registration {
    generation: u64,
    task: JoinHandle<()>,
}

pub(crate) struct Scheduler {
    runtime: Option<Handle>,
    sender: UnboundedSender<Envelope>,
    receiver: UnboundedReceiver<Envelope>,
    generation: u64,
    timers: HashMap<(NodeId, String), Registration>,
    services: HashMap<String, Registration>,
    activities: Vec<((NodeId, String), Disposer)>,
}

impl Scheduler {
    /// Picks up the tokio runtime of the calling thread, if any.
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime: Handle::try_current().ok(),
            sender,
            receiver,
            generation: 0,
            timers: HashMap::new(),
            services: HashMap::new(),
            activities: Vec::new(),
        }
    }

    pub(crate) fn has_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Retry picking up a runtime, for interpreters created outside one.
    pub(crate) fn attach(&mut self) -> bool {
        if self.runtime.is_none() {
            self.runtime = Handle::try_current().ok();
        }
        self.has_runtime()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Start a timer posting `event_type` after `delay`, replacing any timer
    /// registered under the same node and key.
    pub(crate) fn schedule_timer(&mut self, node: NodeId, key: &str, event_type: &str, delay: Duration) {
        let Some(runtime) = self.runtime.clone() else {
            debug!(node = %node, key, "no runtime, timer not scheduled");
            return;
        };
        self.cancel_timer(node, key);

        let generation = self.next_generation();
        let sender = self.sender.clone();
        let envelope = Envelope {
            event: Event::new(event_type),
            source: Source::Timer {
                node,
                key: key.to_string(),
                generation,
            },
        };
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(envelope);
        });
        trace!(node = %node, key, ?delay, generation, "timer scheduled");
        self.timers
            .insert((node, key.to_string()), Registration { generation, task });
    }

    pub(crate) fn cancel_timer(&mut self, node: NodeId, key: &str) {
        if let Some(registration) = self.timers.remove(&(node, key.to_string())) {
            registration.task.abort();
            trace!(node = %node, key, "timer cancelled");
        }
    }

    /// Spawn the future `start` builds from a fresh handle.
    pub(crate) fn start_service<F>(&mut self, invoke_id: &str, start: F)
    where
        F: FnOnce(ServiceHandle) -> ServiceFuture,
    {
        let Some(runtime) = self.runtime.clone() else {
            debug!(invoke_id, "no runtime, service not started");
            return;
        };
        self.stop_service(invoke_id);

        let generation = self.next_generation();
        let handle = ServiceHandle::new(invoke_id.to_string(), generation, self.sender.clone());
        let future = start(handle);
        let sender = self.sender.clone();
        let id = invoke_id.to_string();
        let task = runtime.spawn(async move {
            let event = match future.await {
                Ok(output) => Event::done_invoke(&id, output),
                Err(error) => Event::error_invoke(&id, error.message),
            };
            let _ = sender.send(Envelope {
                event,
                source: Source::Service {
                    invoke_id: id,
                    generation,
                },
            });
        });
        debug!(invoke_id, generation, "service started");
        self.services
            .insert(invoke_id.to_string(), Registration { generation, task });
    }

    pub(crate) fn stop_service(&mut self, invoke_id: &str) {
        if let Some(registration) = self.services.remove(invoke_id) {
            registration.task.abort();
            debug!(invoke_id, "service stopped");
        }
    }

    pub(crate) fn start_activity(&mut self, node: NodeId, name: &str, disposer: Disposer) {
        self.stop_activity(node, name);
        self.activities.push(((node, name.to_string()), disposer));
    }

    pub(crate) fn stop_activity(&mut self, node: NodeId, name: &str) {
        if let Some(index) = self
            .activities
            .iter()
            .position(|((n, a), _)| *n == node && a == name)
        {
            let (_, dispose) = self.activities.remove(index);
            dispose();
        }
    }

    /// Whether the message still belongs to a live registration. Timer
    /// fires and service completions retire their registration.
    fn accept(&mut self, envelope: &Envelope) -> bool {
        let current = |registration: Option<&Registration>, generation: u64| {
            registration.map(|r| r.generation) == Some(generation)
        };
        match &envelope.source {
            Source::Timer {
                node,
                key,
                generation,
            } => {
                let slot = (*node, key.clone());
                let live = current(self.timers.get(&slot), *generation);
                if live {
                    self.timers.remove(&slot);
                }
                live
            }
            Source::Service {
                invoke_id,
                generation,
            } => {
                let live = current(self.services.get(invoke_id), *generation);
                if live {
                    self.services.remove(invoke_id);
                }
                live
            }
            Source::Emission {
                invoke_id,
                generation,
            } => current(self.services.get(invoke_id), *generation),
        }
    }

    /// Next live message already in the mailbox, without waiting.
    pub(crate) fn try_next(&mut self) -> Option<Envelope> {
        while let Ok(envelope) = self.receiver.try_recv() {
            if self.accept(&envelope) {
                return Some(envelope);
            }
            debug!(event = %envelope.event, source = ?envelope.source, "dropped late message");
        }
        None
    }

    /// Wait for the next live message. `None` once no timer or service is
    /// left that could still produce one.
    pub(crate) async fn next(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.try_next() {
                return Some(envelope);
            }
            if self.is_idle() {
                return None;
            }
            let envelope = self.receiver.recv().await?;
            if self.accept(&envelope) {
                return Some(envelope);
            }
            debug!(event = %envelope.event, source = ?envelope.source, "dropped late message");
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.timers.is_empty() && self.services.is_empty()
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn running_services(&self) -> usize {
        self.services.len()
    }

    /// Cancel every timer and service, dispose every activity.
    pub(crate) fn shutdown(&mut self) {
        for (_, registration) in self.timers.drain() {
            registration.task.abort();
        }
        for (_, registration) in self.services.drain() {
            registration.task.abort();
        }
        for (_, dispose) in self.activities.drain(..).rev() {
            dispose();
        }
        self.generation += 1;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
