//! Events flowing from the managers up to attached observers
//!
//! Managers emit [`ServiceEvent`]s into an [`EventSink`]. The coordinator
//! relays them unmodified, wrapped in an [`EventEnvelope`] that carries the
//! coordinator's epoch and a monotonic sequence number so observers can
//! detect restarts and gaps.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{LogLevel, RequestLogEntry, ServerState, TunnelState};

/// Fault codes carried by `error` and `serverError` events
pub mod fault_codes {
    /// Generic tunnel engine fault
    pub const ENGINE_FAULT: i32 = 1;
    /// Engine fault that only a full process restart clears
    pub const RESTART_REQUIRED: i32 = 2;
    /// Listener could not be bound
    pub const BIND_FAILED: i32 = 1;
    /// Serving loop terminated with an error
    pub const SERVE_FAILED: i32 = 2;
}

/// Event payload produced by the tunnel and server managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceEvent {
    /// Tunnel state transition
    StateChanged { state: TunnelState, message: String },

    /// Tunnel fault
    Error { code: i32, message: String },

    /// UI-facing log line from the tunnel engine
    Log { level: LogLevel, message: String },

    /// Server state transition
    ServerStateChanged { state: ServerState, message: String },

    /// Server fault
    ServerError { code: i32, message: String },

    /// A request served by the local server
    RequestLog { entry: RequestLogEntry },
}

impl ServiceEvent {
    pub fn state_changed(state: TunnelState, message: impl Into<String>) -> Self {
        ServiceEvent::StateChanged {
            state,
            message: message.into(),
        }
    }

    pub fn server_state_changed(state: ServerState, message: impl Into<String>) -> Self {
        ServiceEvent::ServerStateChanged {
            state,
            message: message.into(),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceEvent::StateChanged { .. } => "stateChanged",
            ServiceEvent::Error { .. } => "error",
            ServiceEvent::Log { .. } => "log",
            ServiceEvent::ServerStateChanged { .. } => "serverStateChanged",
            ServiceEvent::ServerError { .. } => "serverError",
            ServiceEvent::RequestLog { .. } => "requestLog",
        }
    }
}

/// Sequenced wrapper delivered to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Identifies the coordinator instance; changes on every restart
    pub epoch_id: String,
    /// Monotonic per epoch; resync events repeat the current value
    pub seq: u64,
    /// Synthetic event replaying current state to a new observer
    #[serde(default)]
    pub resync: bool,
    #[serde(flatten)]
    pub event: ServiceEvent,
}

/// Epoch and sequence counter of one coordinator instance
#[derive(Debug)]
pub struct StateEpoch {
    id: String,
    seq: AtomicU64,
}

impl StateEpoch {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Wrap a live event, advancing the sequence
    pub fn wrap_event(&self, event: ServiceEvent) -> EventEnvelope {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        EventEnvelope {
            epoch_id: self.id.clone(),
            seq,
            resync: false,
            event,
        }
    }

    /// Wrap a synthetic resync event without advancing the sequence
    pub fn wrap_resync(&self, event: ServiceEvent) -> EventEnvelope {
        EventEnvelope {
            epoch_id: self.id.clone(),
            seq: self.current_seq(),
            resync: true,
            event,
        }
    }
}

impl Default for StateEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half managers emit events into
///
/// Sending never blocks, so it is usable from the engine's blocking thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the coordinator drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ServiceEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("Dropped {} event: no receiver", e.0.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ServiceEvent::state_changed(TunnelState::Connecting, "Starting");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["state"], 1);
        assert_eq!(json["message"], "Starting");
    }

    #[test]
    fn test_envelope_flattens_event() {
        let epoch = StateEpoch::new();
        let envelope = epoch.wrap_event(ServiceEvent::ServerError {
            code: fault_codes::BIND_FAILED,
            message: "address in use".to_string(),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "serverError");
        assert_eq!(json["seq"], 1);
        assert_eq!(json["epochId"], epoch.id());
        assert_eq!(json["resync"], false);

        let decoded: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_sequence_is_monotonic_and_resync_does_not_advance() {
        let epoch = StateEpoch::new();
        let first = epoch.wrap_event(ServiceEvent::state_changed(TunnelState::Connecting, ""));
        let resync = epoch.wrap_resync(ServiceEvent::server_state_changed(
            ServerState::Running,
            "",
        ));
        let second = epoch.wrap_event(ServiceEvent::state_changed(TunnelState::Connected, ""));

        assert_eq!(first.seq, 1);
        assert_eq!(resync.seq, 1);
        assert!(resync.resync);
        assert_eq!(second.seq, 2);
    }

    #[test]
    fn test_epochs_are_distinct() {
        assert_ne!(StateEpoch::new().id(), StateEpoch::new().id());
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ServiceEvent::state_changed(TunnelState::Connecting, "a"));
        sink.emit(ServiceEvent::state_changed(TunnelState::Connected, "b"));

        assert!(matches!(
            rx.recv().await,
            Some(ServiceEvent::StateChanged { state: TunnelState::Connecting, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServiceEvent::StateChanged { state: TunnelState::Connected, .. })
        ));
    }

    #[test]
    fn test_sink_without_receiver_does_not_panic() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(ServiceEvent::Log {
            level: LogLevel::Info,
            message: "nobody listening".to_string(),
        });
    }
}
