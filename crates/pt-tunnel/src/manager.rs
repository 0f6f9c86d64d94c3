//! Tunnel manager
//!
//! State machine of the single tunnel session:
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!       ^              |             |              |
//!       +---- Error <--+-------------+--------------+   (engine fault)
//!       +------------------------------------------------ (stop)
//! ```
//!
//! `start` installs the session and returns; the blocking engine call runs
//! on Tokio's blocking pool and a supervising task turns its outcome,
//! including a panic, into the final events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use pt_core::config::TunnelSettings;
use pt_core::slot::Occupied;
use pt_core::{
    EventSink, ServiceEvent, SessionSlot, SlotEntry, TunnelRequest, TunnelState, TunnelStatus,
};

use crate::engine::{EngineConfig, EngineObserver, TunnelEngine};
use crate::error::{EngineFault, TunnelError};
use crate::metrics::MetricsRegistry;
use crate::session::TunnelSession;
use crate::token;

/// Owns at most one tunnel session
pub struct TunnelManager {
    engine: Arc<dyn TunnelEngine>,
    registry: Arc<dyn MetricsRegistry>,
    sessions: SessionSlot<TunnelSession>,
    events: EventSink,
    settings: TunnelSettings,
    next_id: AtomicU64,
}

impl TunnelManager {
    pub fn new(
        engine: Arc<dyn TunnelEngine>,
        registry: Arc<dyn MetricsRegistry>,
        events: EventSink,
        settings: TunnelSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            sessions: SessionSlot::new(),
            events,
            settings,
            next_id: AtomicU64::new(0),
        }
    }

    /// Start a new session and return its id.
    ///
    /// Returns once the session is installed in `Connecting`; whether the
    /// engine connects is reported through events only.
    pub fn start(&self, request: &TunnelRequest) -> Result<u64, TunnelError> {
        let credentials = token::parse_token(&request.token)?;
        let runtime = Handle::try_current().map_err(|e| TunnelError::Runtime(e.to_string()))?;

        let ha_connections = if request.ha_connections < 1 {
            self.settings.default_ha_connections
        } else {
            request.ha_connections
        };
        let config = EngineConfig {
            credentials,
            origin_url: request.origin_url.clone(),
            ha_connections,
            enable_post_quantum: request.enable_post_quantum,
            version: pt_core::VERSION.to_string(),
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, previous) = match self
            .sessions
            .install_with(|| TunnelSession::new(id, config.clone()))
        {
            Ok(installed) => installed,
            Err(Occupied(active)) => {
                tracing::warn!(
                    session_id = active.id(),
                    "Tunnel already running, ignoring start"
                );
                return Err(TunnelError::AlreadyRunning(active.id()));
            }
        };

        if let Some(previous) = previous {
            tracing::debug!(session_id = previous.id(), "Cancelling finished tunnel session");
            previous.close(|| {});
        }
        self.registry.reset();

        tracing::info!(
            session_id = id,
            tunnel_id = %config.credentials.tunnel_id,
            origin = %config.origin_url,
            ha_connections,
            "Starting tunnel"
        );
        self.events.emit(ServiceEvent::state_changed(
            TunnelState::Connecting,
            "Starting tunnel connection...",
        ));

        let observer = EngineObserver::new(Arc::clone(&session), self.events.clone());
        let engine = Arc::clone(&self.engine);
        let cancel = session.cancel_token();
        let handle = runtime.spawn_blocking(move || engine.run(config, observer, cancel));

        runtime.spawn(supervise(handle, session, self.events.clone()));

        Ok(id)
    }

    /// Stop the active session, if any, and reset the metrics registry.
    ///
    /// Never fails and does not wait for the engine to acknowledge.
    pub fn stop(&self) {
        self.stop_session();
        self.registry.reset();
    }

    /// Stop any session, reset the metrics registry and wait for the
    /// configured settle delay so an immediate start sees a clean registry.
    pub async fn force_reset(&self) {
        self.stop_session();
        self.registry.reset();
        tracing::info!(
            generation = self.registry.generation(),
            "Tunnel force reset"
        );
        tokio::time::sleep(self.settings.reset_settle).await;
    }

    /// Decode a token without touching any session
    pub fn validate_token(&self, token: &str) -> Result<String, TunnelError> {
        token::validate_token(token)
    }

    pub fn state(&self) -> TunnelState {
        self.sessions
            .current()
            .map(|session| session.state())
            .unwrap_or_default()
    }

    /// Whether a session is connecting, connected or reconnecting
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn status(&self) -> TunnelStatus {
        match self.sessions.current() {
            Some(session) => {
                let config = session.config();
                TunnelStatus {
                    state: session.state(),
                    session_id: Some(session.id()),
                    tunnel_id: Some(config.credentials.tunnel_id.to_string()),
                    origin_url: Some(config.origin_url.clone()),
                    ha_connections: Some(config.ha_connections),
                    enable_post_quantum: config.enable_post_quantum,
                    last_error: session.last_error(),
                    connected_at: session.connected_at().map(pt_core::time::format_rfc3339),
                }
            }
            None => TunnelStatus::default(),
        }
    }

    fn stop_session(&self) {
        if let Some(session) = self.sessions.take() {
            let id = session.id();
            session.close(|| {
                tracing::info!(session_id = id, "Tunnel stopped");
                self.events.emit(ServiceEvent::state_changed(
                    TunnelState::Disconnected,
                    "Tunnel stopped",
                ));
            });
        }
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        if let Some(session) = self.sessions.take() {
            session.close(|| {});
        }
    }
}

/// Wait for the engine call to end and publish the final transitions
async fn supervise(
    handle: JoinHandle<Result<(), EngineFault>>,
    session: Arc<TunnelSession>,
    events: EventSink,
) {
    let outcome = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(EngineFault::from_panic(e.into_panic())),
        Err(e) => Err(EngineFault::Failed(format!("engine task aborted: {}", e))),
    };

    let id = session.id();
    if let Err(fault) = outcome {
        let published = session.fail(fault.to_string(), |message| {
            tracing::warn!(session_id = id, "Tunnel engine fault: {}", fault);
            events.emit(ServiceEvent::state_changed(TunnelState::Error, message));
            events.emit(ServiceEvent::Error {
                code: fault.code(),
                message: message.to_string(),
            });
        });
        if !published {
            tracing::debug!(session_id = id, "Ignoring fault from stopped session: {}", fault);
        }
    }

    // The ended session stays installed so its last error remains visible
    session.close(|| {
        events.emit(ServiceEvent::state_changed(
            TunnelState::Disconnected,
            "Tunnel stopped",
        ));
    });
    tracing::info!(session_id = id, "Tunnel session ended");
}
