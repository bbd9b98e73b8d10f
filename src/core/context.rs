//! Extended state carried alongside the active configuration.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Trait for machine context (extended state).
///
/// The context is owned by one interpreter, changed only by assign actions
/// while a step is computed, and never shared mutably.
///
/// # Required Traits
///
/// - `Clone`: steps work on a copy so a failed step leaves the context untouched
/// - `Debug`: contexts must be debuggable for diagnostics
/// - `Serialize` + `DeserializeOwned`: contexts are decoded from machine
///   configuration and persisted in checkpoints
/// - `Send` + `Sync`: machines and their initial context are shared across threads
///
/// Implemented automatically for every type meeting these bounds.
///
/// # Example
///
/// ```rust
/// use harel::core::Context;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Counter {
///     count: u32,
/// }
///
/// fn assert_context<C: Context>() {}
/// assert_context::<Counter>();
/// assert_context::<()>();
/// ```
pub trait Context: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Context for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}
