//! Boundary to the tunnel protocol engine
//!
//! The engine is consumed as a single blocking call that returns when the
//! session ends. While it runs it reports progress through the
//! [`EngineObserver`] handed to it; it must return promptly once the
//! cancellation token fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pt_core::{EventSink, LogLevel, ServiceEvent, TunnelState};

use crate::error::EngineFault;
use crate::session::TunnelSession;
use crate::token::TunnelCredentials;

/// Everything an engine needs to run one session
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub credentials: TunnelCredentials,
    /// Local address inbound traffic is forwarded to
    pub origin_url: String,
    /// Number of redundant edge connections, always at least 1
    pub ha_connections: u32,
    pub enable_post_quantum: bool,
    /// Client version reported to the edge
    pub version: String,
}

/// A tunnel protocol engine
///
/// `run` blocks the calling thread until the session ends, either because
/// `cancel` fired (return `Ok`) or because the engine failed. Panics are
/// recovered by the manager; engines may panic with an [`EngineFault`]
/// payload to keep the classification typed.
pub trait TunnelEngine: Send + Sync + 'static {
    fn run(
        &self,
        config: EngineConfig,
        observer: EngineObserver,
        cancel: CancellationToken,
    ) -> Result<(), EngineFault>;
}

/// Callback surface an engine reports through
///
/// Reports from a session that has already been stopped are dropped. A
/// report and a concurrent stop are serialized, so the stop's final
/// `Disconnected` is always the last state published for the session.
#[derive(Clone)]
pub struct EngineObserver {
    session: Arc<TunnelSession>,
    events: EventSink,
}

impl EngineObserver {
    pub(crate) fn new(session: Arc<TunnelSession>, events: EventSink) -> Self {
        Self { session, events }
    }

    /// Whether the session has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// A setup step while still connecting
    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        self.session.while_live(|state| {
            if state == TunnelState::Connecting {
                tracing::debug!("{}", message);
                self.events
                    .emit(ServiceEvent::state_changed(TunnelState::Connecting, message));
            } else {
                self.events.emit(ServiceEvent::Log {
                    level: LogLevel::Info,
                    message,
                });
            }
        });
    }

    /// The engine holds a live edge connection
    pub fn connected(&self) {
        self.transition(TunnelState::Connected, "Tunnel connected".to_string());
    }

    /// The engine lost its connection and is retrying
    pub fn reconnecting(&self, reason: impl Into<String>) {
        self.transition(TunnelState::Reconnecting, reason.into());
    }

    /// A UI-facing log line
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.session.while_live(|_| {
            self.events.emit(ServiceEvent::Log { level, message });
        });
    }

    fn transition(&self, state: TunnelState, message: String) {
        let published = self.session.transition(state, || {
            tracing::info!("Tunnel {}: {}", state, message);
            self.events.emit(ServiceEvent::state_changed(state, message));
        });
        if !published {
            tracing::debug!("Dropping {} report from stopped tunnel session", state);
        }
    }
}
