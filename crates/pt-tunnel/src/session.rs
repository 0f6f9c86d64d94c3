//! A single tunnel session

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use pt_core::{SlotEntry, TunnelState};

use crate::engine::EngineConfig;

#[derive(Debug)]
struct SessionStatus {
    state: TunnelState,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    fn apply(&mut self, state: TunnelState) {
        self.state = state;
        match state {
            TunnelState::Connected => {
                self.connected_at.get_or_insert_with(Utc::now);
            }
            TunnelState::Disconnected => self.connected_at = None,
            _ => {}
        }
    }
}

/// One attempt to keep a tunnel connection up
///
/// The status lock is internal to the session and is never held across
/// calls into the session slot. Cancellation happens under the status write
/// lock, and every engine report checks it under the same lock, so no report
/// is published after the session was closed.
#[derive(Debug)]
pub(crate) struct TunnelSession {
    id: u64,
    config: EngineConfig,
    cancel: CancellationToken,
    status: RwLock<SessionStatus>,
}

impl TunnelSession {
    /// New sessions start in `Connecting` so they count as active the
    /// moment they are installed.
    pub(crate) fn new(id: u64, config: EngineConfig) -> Self {
        Self {
            id,
            config,
            cancel: CancellationToken::new(),
            status: RwLock::new(SessionStatus {
                state: TunnelState::Connecting,
                last_error: None,
                connected_at: None,
            }),
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn state(&self) -> TunnelState {
        self.status.read().state
    }

    /// Move to `state` and run `publish` while the session is still live.
    ///
    /// Returns false without touching the state once the session is closed.
    pub(crate) fn transition(&self, state: TunnelState, publish: impl FnOnce()) -> bool {
        let mut status = self.status.write();
        if self.cancel.is_cancelled() {
            return false;
        }
        status.apply(state);
        publish();
        true
    }

    /// Run `publish` with the current state while the session is still live
    pub(crate) fn while_live(&self, publish: impl FnOnce(TunnelState)) -> bool {
        let status = self.status.read();
        if self.cancel.is_cancelled() {
            return false;
        }
        publish(status.state);
        true
    }

    /// Record an engine fault and run `publish` while the session is still live
    pub(crate) fn fail(&self, message: String, publish: impl FnOnce(&str)) -> bool {
        let mut status = self.status.write();
        if self.cancel.is_cancelled() {
            return false;
        }
        status.state = TunnelState::Error;
        status.connected_at = None;
        publish(&message);
        status.last_error = Some(message);
        true
    }

    /// Cancel the session, settle it at `Disconnected` and run `publish`.
    ///
    /// Used both by `stop` and once the engine call has returned; `publish`
    /// runs only for whichever call closes the session first.
    pub(crate) fn close(&self, publish: impl FnOnce()) -> bool {
        let mut status = self.status.write();
        status.apply(TunnelState::Disconnected);
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        publish();
        true
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.status.read().last_error.clone()
    }

    pub(crate) fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.status.read().connected_at
    }
}

impl SlotEntry for TunnelSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_active(&self) -> bool {
        self.state().is_active()
    }
}
