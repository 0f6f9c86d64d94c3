//! Process-global metrics registration
//!
//! Protocol engines register their metrics in a registry that lives for the
//! whole process and refuses duplicate names. An engine cannot undo its own
//! registrations, so the manager resets the registry on every stop, start
//! and force-reset path.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::EngineFault;

/// Registry of metric names shared by every engine run in the process
pub trait MetricsRegistry: Send + Sync {
    /// Register a metric name; a name may be registered once per generation
    fn register(&self, name: &str) -> Result<(), EngineFault>;

    /// Drop every registration and start a new generation
    fn reset(&self);

    /// Number of resets performed so far
    fn generation(&self) -> u64;
}

#[derive(Debug, Default)]
struct RegistryState {
    generation: u64,
    names: BTreeSet<String>,
}

/// The process-wide registry
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<Arc<ProcessRegistry>> = OnceLock::new();

impl ProcessRegistry {
    /// Create an isolated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process
    pub fn global() -> Arc<ProcessRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ProcessRegistry::new())))
    }

    /// Names registered in the current generation
    pub fn registered(&self) -> Vec<String> {
        self.inner.lock().names.iter().cloned().collect()
    }
}

impl MetricsRegistry for ProcessRegistry {
    fn register(&self, name: &str) -> Result<(), EngineFault> {
        let mut state = self.inner.lock();
        if !state.names.insert(name.to_string()) {
            return Err(EngineFault::DuplicateRegistration {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn reset(&self) {
        let mut state = self.inner.lock();
        state.names.clear();
        state.generation += 1;
        tracing::debug!(generation = state.generation, "Metrics registry reset");
    }

    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }
}
