//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to the test harness. Set `RUST_LOG=harel=trace`
/// to see every microstep.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Thread-safe list that effect actions and listeners append to.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Recorder {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
