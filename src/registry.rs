//! Machines registered by id.
//!
//! The registry holds machines of different context types side by side and
//! hands them back typed. Tools that generate typed facades read the
//! [`MachineSchema`] of every registered machine from here.

use crate::core::Context;
use crate::interpreter::{Interpreter, InterpreterOptions};
use crate::machine::{Machine, MachineSchema};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("A machine with id '{id}' is already registered")]
    Duplicate { id: String },

    #[error("No machine with id '{id}' is registered")]
    NotFound { id: String },

    #[error("Machine '{id}' was registered with a different context type")]
    ContextMismatch { id: String },
}

struct Entry {
    schema: MachineSchema,
    machine: Arc<dyn Any + Send + Sync>,
}

/// Registry of machines keyed by machine id.
///
/// # Example
///
/// ```rust
/// use harel::builder::{MachineBuilder, StateNodeConfig};
/// use harel::registry::{MachineRegistry, RegistryError};
///
/// let config = StateNodeConfig::compound("idle")
///     .state("idle", StateNodeConfig::atomic().on("FETCH", "loading"))
///     .state("loading", StateNodeConfig::atomic())
///     .into_machine("fetch");
/// let machine = MachineBuilder::<()>::new(config).build().unwrap();
///
/// let mut registry = MachineRegistry::new();
/// registry.register(machine.clone()).unwrap();
/// assert_eq!(
///     registry.register(machine).unwrap_err(),
///     RegistryError::Duplicate { id: "fetch".into() }
/// );
///
/// let machine = registry.get::<()>("fetch").unwrap();
/// assert_eq!(registry.schema("fetch").unwrap().events, vec!["FETCH"]);
/// assert!(registry.get::<u32>("fetch").is_err());
/// # drop(machine);
/// ```
#[derive(Default)]
pub struct MachineRegistry {
    machines: BTreeMap<String, Entry>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: Context>(
        &mut self,
        machine: impl Into<Arc<Machine<C>>>,
    ) -> Result<Arc<Machine<C>>, RegistryError> {
        let machine = machine.into();
        let id = machine.id().to_string();
        if self.machines.contains_key(&id) {
            return Err(RegistryError::Duplicate { id });
        }
        debug!(machine = %id, "machine registered");
        self.machines.insert(
            id,
            Entry {
                schema: machine.schema(),
                machine: Arc::clone(&machine) as Arc<dyn Any + Send + Sync>,
            },
        );
        Ok(machine)
    }

    pub fn get<C: Context>(&self, id: &str) -> Result<Arc<Machine<C>>, RegistryError> {
        let entry = self.entry(id)?;
        Arc::clone(&entry.machine)
            .downcast::<Machine<C>>()
            .map_err(|_| RegistryError::ContextMismatch { id: id.to_string() })
    }

    pub fn schema(&self, id: &str) -> Result<&MachineSchema, RegistryError> {
        self.entry(id).map(|entry| &entry.schema)
    }

    /// Schemas of every registered machine, ordered by id.
    pub fn schemas(&self) -> Vec<&MachineSchema> {
        self.machines.values().map(|entry| &entry.schema).collect()
    }

    /// New interpreter for the registered machine.
    pub fn interpret<C: Context>(
        &self,
        id: &str,
        options: InterpreterOptions,
    ) -> Result<Interpreter<C>, RegistryError> {
        let machine = self.get::<C>(id)?;
        Ok(Interpreter::with_options(machine, options))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.machines.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.machines.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.machines.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    fn entry(&self, id: &str) -> Result<&Entry, RegistryError> {
        self.machines
            .get(id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }
}
