//! Named implementations referenced from a machine configuration.
//!
//! A configuration only names guards, actions, services, activities, delays
//! and data mappers. `MachineOptions` supplies the code behind those names;
//! building a machine fails if a referenced name has no implementation.

use crate::core::{Action, ActionError, Activity, DataMapper, Disposer, Event, Guard, GuardError};
use crate::interpreter::{Service, ServiceError, ServiceHandle};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Computes the length of a named delay.
pub struct Delay<C> {
    compute: Arc<dyn Fn(&C, &Event) -> Duration + Send + Sync>,
}

impl<C> Delay<C> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Duration + Send + Sync + 'static,
    {
        Self {
            compute: Arc::new(f),
        }
    }

    pub fn duration(&self, context: &C, event: &Event) -> Duration {
        (self.compute)(context, event)
    }
}

impl<C> Clone for Delay<C> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
        }
    }
}

/// Implementations for the names used in a machine configuration.
///
/// # Example
///
/// ```rust
/// use harel::builder::MachineOptions;
/// use harel::core::Event;
/// use serde_json::json;
/// use std::time::Duration;
///
/// #[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
/// struct Light {
///     cycles: u32,
/// }
///
/// let options = MachineOptions::<Light>::new()
///     .guard("isSuperCool", |ctx, _event| ctx.cycles > 2)
///     .assign("countCycle", |ctx, _event| ctx.cycles += 1)
///     .action("announce", |ctx, _event| println!("cycle {}", ctx.cycles))
///     .delay("LONG", |_ctx, _event| Duration::from_secs(30))
///     .data("summary", |ctx, _event| json!({ "cycles": ctx.cycles }));
///
/// assert!(options.has_guard("isSuperCool"));
/// assert_eq!(options.action_names(), vec!["announce", "countCycle"]);
/// ```
pub struct MachineOptions<C> {
    pub(crate) guards: HashMap<String, Guard<C>>,
    pub(crate) actions: HashMap<String, Action<C>>,
    pub(crate) services: HashMap<String, Service<C>>,
    pub(crate) activities: HashMap<String, Activity<C>>,
    pub(crate) delays: HashMap<String, Delay<C>>,
    pub(crate) data: HashMap<String, DataMapper<C>>,
}

impl<C> Default for MachineOptions<C> {
    fn default() -> Self {
        Self {
            guards: HashMap::new(),
            actions: HashMap::new(),
            services: HashMap::new(),
            activities: HashMap::new(),
            delays: HashMap::new(),
            data: HashMap::new(),
        }
    }
}

impl<C> Clone for MachineOptions<C> {
    fn clone(&self) -> Self {
        Self {
            guards: self.guards.clone(),
            actions: self.actions.clone(),
            services: self.services.clone(),
            activities: self.activities.clone(),
            delays: self.delays.clone(),
            data: self.data.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> MachineOptions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        self.with_guard(name, Guard::new(predicate))
    }

    pub fn try_guard<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<bool, GuardError> + Send + Sync + 'static,
    {
        self.with_guard(name, Guard::fallible(predicate))
    }

    pub fn with_guard(mut self, name: impl Into<String>, guard: Guard<C>) -> Self {
        self.guards.insert(name.into(), guard);
        self
    }

    pub fn assign<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut C, &Event) + Send + Sync + 'static,
    {
        self.with_action(name, Action::assign(f))
    }

    pub fn try_assign<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut C, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.with_action(name, Action::try_assign(f))
    }

    /// Side-effect action run by the interpreter before the step is committed.
    pub fn action<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) + Send + Sync + 'static,
    {
        self.with_action(name, Action::effect(f))
    }

    pub fn try_action<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.with_action(name, Action::try_effect(f))
    }

    /// Action raising an internal event, processed before the step returns.
    pub fn raise(self, name: impl Into<String>, event: impl Into<Event>) -> Self {
        self.with_action(name, Action::raise(event))
    }

    /// Action queueing an event behind the one being processed.
    pub fn send_event(self, name: impl Into<String>, event: impl Into<Event>) -> Self {
        self.with_action(name, Action::send(event))
    }

    pub fn log<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> String + Send + Sync + 'static,
    {
        self.with_action(name, Action::log(f))
    }

    pub fn with_action(mut self, name: impl Into<String>, action: Action<C>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Register an asynchronous service.
    ///
    /// The future runs on the interpreter's tokio runtime while the invoking
    /// state is active. Its output becomes a `done.invoke.<id>` event, its
    /// error an `error.invoke.<id>` event.
    pub fn service<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event, ServiceHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
    {
        self.services.insert(name.into(), Service::new(f));
        self
    }

    pub fn activity<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Disposer + Send + Sync + 'static,
    {
        self.activities.insert(name.into(), Activity::new(f));
        self
    }

    pub fn delay<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Duration + Send + Sync + 'static,
    {
        self.delays.insert(name.into(), Delay::new(f));
        self
    }

    pub fn data<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        self.data.insert(name.into(), DataMapper::new(f));
        self
    }

    /// Overlay `other` on top of these options; names in `other` win.
    pub fn merge(mut self, other: MachineOptions<C>) -> Self {
        self.guards.extend(other.guards);
        self.actions.extend(other.actions);
        self.services.extend(other.services);
        self.activities.extend(other.activities);
        self.delays.extend(other.delays);
        self.data.extend(other.data);
        self
    }

    pub fn has_guard(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    pub fn guard_names(&self) -> Vec<&str> {
        sorted_keys(&self.guards)
    }

    pub fn action_names(&self) -> Vec<&str> {
        sorted_keys(&self.actions)
    }

    pub fn service_names(&self) -> Vec<&str> {
        sorted_keys(&self.services)
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}
