//! Deterministic engine driven by a fixed script
//!
//! Runs a list of steps against the observer. The test suites of this
//! crate and its dependents use it to reproduce connects, reconnects,
//! faults and panics on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use pt_core::LogLevel;

use crate::engine::{EngineConfig, EngineObserver, TunnelEngine};
use crate::error::EngineFault;
use crate::metrics::MetricsRegistry;

/// One step of a script
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Progress(String),
    Connect,
    Reconnect(String),
    Log(LogLevel, String),
    /// Register a metric name in the engine's registry
    Register(String),
    /// Sleep, returning early if cancelled
    Sleep(Duration),
    /// Return the fault
    Fail(EngineFault),
    /// Panic with a plain message
    Panic(String),
    /// Panic with a typed fault payload
    PanicWith(EngineFault),
    /// Block until the session is cancelled
    WaitForCancel,
}

/// Engine replaying a script on every run
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    registry: Option<Arc<dyn MetricsRegistry>>,
    runs: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            registry: None,
            runs: AtomicUsize::new(0),
        }
    }

    /// Registry used by `Register` steps
    pub fn with_registry(mut self, registry: Arc<dyn MetricsRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Number of times `run` has been entered
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl TunnelEngine for ScriptedEngine {
    fn run(
        &self,
        _config: EngineConfig,
        observer: EngineObserver,
        cancel: CancellationToken,
    ) -> Result<(), EngineFault> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        for step in &self.steps {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match step {
                ScriptStep::Progress(message) => observer.progress(message.clone()),
                ScriptStep::Connect => observer.connected(),
                ScriptStep::Reconnect(reason) => observer.reconnecting(reason.clone()),
                ScriptStep::Log(level, message) => observer.log(*level, message.clone()),
                ScriptStep::Register(name) => {
                    if let Some(registry) = &self.registry {
                        registry.register(name)?;
                    }
                }
                ScriptStep::Sleep(duration) => {
                    block_on(async {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(*duration) => {}
                        }
                    })?;
                }
                ScriptStep::Fail(fault) => return Err(fault.clone()),
                ScriptStep::Panic(message) => panic!("{}", message),
                ScriptStep::PanicWith(fault) => std::panic::panic_any(fault.clone()),
                ScriptStep::WaitForCancel => {
                    block_on(cancel.cancelled())?;
                }
            }
        }
        Ok(())
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, EngineFault> {
    let handle = Handle::try_current().map_err(|e| EngineFault::Failed(e.to_string()))?;
    Ok(handle.block_on(future))
}
