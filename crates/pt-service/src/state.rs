//! Coordinator-owned view of both managers

use pt_core::{ServerRequest, ServerState, ServiceEvent, TunnelRequest, TunnelState};

use crate::status::StatusSummary;

/// State tracked by one coordinator instance
///
/// Updated only from relayed events, so it always matches what attached
/// observers have seen. A restarted coordinator starts from the defaults.
#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    pub tunnel_running: bool,
    pub server_running: bool,
    pub tunnel_state: TunnelState,
    pub server_state: ServerState,
    pub last_tunnel_config: Option<TunnelRequest>,
    pub last_server_config: Option<ServerRequest>,
}

impl ServiceState {
    /// Fold an event into the state, returning whether a state changed
    pub fn apply(&mut self, event: &ServiceEvent) -> bool {
        match event {
            ServiceEvent::StateChanged { state, .. } => {
                let changed = self.tunnel_state != *state;
                self.tunnel_state = *state;
                self.tunnel_running = state.is_active();
                changed
            }
            ServiceEvent::ServerStateChanged { state, .. } => {
                let changed = self.server_state != *state;
                self.server_state = *state;
                self.server_running = state.is_active();
                changed
            }
            _ => false,
        }
    }

    /// Events replaying the current state to a newly attached observer
    pub fn resync_events(&self) -> Vec<ServiceEvent> {
        vec![
            ServiceEvent::state_changed(
                self.tunnel_state,
                format!("Tunnel {}", self.tunnel_state),
            ),
            ServiceEvent::server_state_changed(
                self.server_state,
                format!("Server {}", self.server_state),
            ),
        ]
    }

    pub fn summary(&self) -> StatusSummary {
        let mut text = format!("Tunnel {}", self.tunnel_state);
        if let Some(server) = self.last_server_config.as_ref().filter(|_| self.server_running) {
            text.push_str(&format!(", serving port {}", server.port));
        } else {
            text.push_str(&format!(", server {}", self.server_state));
        }
        StatusSummary {
            title: "Pocket Tunnel".to_string(),
            text,
            ongoing: true,
        }
    }
}
