//! Coordinator host
//!
//! Spins the coordinator up on demand and supervises it. A coordinator that
//! exits on its own (idle, stopService) is simply forgotten; one that
//! panics or is killed is replaced by a fresh coordinator after a backoff.
//! The replacement starts from default state and does not resume the
//! previous tunnel or server.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use pt_core::config::ServiceConfig;
use pt_core::EventSink;
use pt_server::LocalServerManager;
use pt_tunnel::probe::ExponentialBackoff;
use pt_tunnel::{MetricsRegistry, TunnelEngine, TunnelManager};

use crate::coordinator::{Coordinator, CoordinatorHandle, ExitReason};
use crate::error::ServiceError;
use crate::status::{StatusNotifier, TracingNotifier};

struct Running {
    epoch_id: String,
    abort: AbortHandle,
}

struct HostInner {
    engine: Arc<dyn TunnelEngine>,
    registry: Arc<dyn MetricsRegistry>,
    notifier: Arc<dyn StatusNotifier>,
    config: ServiceConfig,
    /// Published coordinator, observed by attached UI bridges
    current: watch::Sender<Option<CoordinatorHandle>>,
    running: Mutex<Option<Running>>,
    restart_backoff: Mutex<ExponentialBackoff>,
    /// Set once the host itself shuts down; no more restarts
    closed: CancellationToken,
}

/// Owner of the background coordinator
#[derive(Clone)]
pub struct ServiceHost {
    inner: Arc<HostInner>,
}

impl ServiceHost {
    pub fn new(
        engine: Arc<dyn TunnelEngine>,
        registry: Arc<dyn MetricsRegistry>,
        config: ServiceConfig,
    ) -> Self {
        Self::with_notifier(engine, registry, config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        engine: Arc<dyn TunnelEngine>,
        registry: Arc<dyn MetricsRegistry>,
        config: ServiceConfig,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        let restart_backoff = ExponentialBackoff::from_config(&config.coordinator.restart);
        Self {
            inner: Arc::new(HostInner {
                engine,
                registry,
                notifier,
                config,
                current,
                running: Mutex::new(None),
                restart_backoff: Mutex::new(restart_backoff),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The running coordinator, spawning one if there is none
    pub fn ensure_running(&self) -> Result<CoordinatorHandle, ServiceError> {
        if self.inner.closed.is_cancelled() {
            return Err(ServiceError::Unavailable);
        }
        let mut running = self.inner.running.lock();
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        Ok(self.spawn_locked(&mut running))
    }

    /// The running coordinator, if any. Never spins one up.
    pub fn current(&self) -> Option<CoordinatorHandle> {
        self.inner
            .current
            .borrow()
            .clone()
            .filter(|handle| !handle.is_closed())
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// Follow coordinator (re)starts and exits
    pub fn watch(&self) -> watch::Receiver<Option<CoordinatorHandle>> {
        self.inner.current.subscribe()
    }

    /// Abort the running coordinator as the platform would kill it.
    ///
    /// The supervisor treats this as an abnormal exit and restarts.
    pub fn kill(&self) -> bool {
        match self.inner.running.lock().as_ref() {
            Some(running) => {
                tracing::warn!(epoch = %running.epoch_id, "Killing background coordinator");
                running.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Tear everything down and wait until the coordinator is gone.
    ///
    /// Best effort; never fails.
    pub async fn stop_service(&self) {
        let Some(handle) = self.current() else {
            return;
        };
        let epoch_id = handle.epoch_id().to_string();
        if let Err(e) = handle.shutdown().await {
            tracing::debug!("Coordinator gone before shutdown: {}", e);
        }

        let mut rx = self.watch();
        let _ = rx
            .wait_for(|current| {
                current
                    .as_ref()
                    .map(|handle| handle.epoch_id() != epoch_id)
                    .unwrap_or(true)
            })
            .await;
    }

    /// Reset the registration singleton while no coordinator is running
    pub async fn reset_registry(&self) {
        self.inner.registry.reset();
        tracing::info!(
            generation = self.inner.registry.generation(),
            "Registry reset without coordinator"
        );
        tokio::time::sleep(self.inner.config.tunnel.reset_settle).await;
    }

    /// Stop the service for good; no further restarts
    pub async fn shutdown(&self) {
        self.inner.closed.cancel();
        self.stop_service().await;
    }

    fn spawn_locked(&self, running: &mut Option<Running>) -> CoordinatorHandle {
        let inner = &self.inner;

        // A fresh coordinator behaves like a fresh process
        inner.registry.reset();

        let (events, event_rx) = EventSink::channel();
        let tunnel = TunnelManager::new(
            Arc::clone(&inner.engine),
            Arc::clone(&inner.registry),
            events.clone(),
            inner.config.tunnel.clone(),
        );
        let server = LocalServerManager::new(events, inner.config.server.clone());
        let (handle, task) = Coordinator::spawn(
            tunnel,
            server,
            event_rx,
            Arc::clone(&inner.notifier),
            inner.config.coordinator.clone(),
        );

        *running = Some(Running {
            epoch_id: handle.epoch_id().to_string(),
            abort: task.abort_handle(),
        });
        inner.current.send_replace(Some(handle.clone()));
        tokio::spawn(self.clone().supervise(task, handle.epoch_id().to_string()));

        handle
    }

    async fn supervise(self, task: JoinHandle<ExitReason>, epoch_id: String) {
        let restart = match task.await {
            Ok(reason) => {
                tracing::info!(epoch = %epoch_id, ?reason, "Background coordinator exited");
                self.inner.restart_backoff.lock().reset();
                false
            }
            Err(e) if e.is_panic() => {
                tracing::error!(epoch = %epoch_id, "Background coordinator panicked");
                true
            }
            Err(_) => {
                tracing::warn!(epoch = %epoch_id, "Background coordinator was killed");
                true
            }
        };

        {
            let mut running = self.inner.running.lock();
            if running.as_ref().map(|r| r.epoch_id != epoch_id).unwrap_or(true) {
                return;
            }
            *running = None;
            self.inner.current.send_if_modified(|current| {
                let ours = current
                    .as_ref()
                    .map(|handle| handle.epoch_id() == epoch_id)
                    .unwrap_or(false);
                if ours {
                    *current = None;
                }
                ours
            });
        }

        if !restart || self.inner.closed.is_cancelled() {
            return;
        }

        let delay = self.inner.restart_backoff.lock().next_delay();
        tracing::warn!("Restarting background coordinator in {:?}", delay);
        tokio::select! {
            _ = self.inner.closed.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let mut running = self.inner.running.lock();
        if running.is_none() {
            self.spawn_locked(&mut running);
        }
    }
}
