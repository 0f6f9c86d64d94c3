//! Tunnel error types

use std::any::Any;

use pt_core::events::fault_codes;
use pt_core::{CommandError, ErrorCode};
use thiserror::Error;

use crate::token::TokenError;

/// Errors returned synchronously by tunnel commands
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Token could not be decoded
    #[error("Invalid tunnel token: {0}")]
    InvalidToken(#[from] TokenError),

    /// A session is already connecting or connected
    #[error("Tunnel already running (session {0})")]
    AlreadyRunning(u64),

    /// Start was called outside a Tokio runtime
    #[error("Tunnel runtime unavailable: {0}")]
    Runtime(String),
}

impl From<TunnelError> for CommandError {
    fn from(err: TunnelError) -> Self {
        let code = match &err {
            TunnelError::InvalidToken(_) => ErrorCode::InvalidToken,
            TunnelError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            TunnelError::Runtime(_) => ErrorCode::ServiceError,
        };
        CommandError::new(code, err.to_string())
    }
}

/// Failure of a running engine, reported only through events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    /// The process-global registry already holds this name. Only a full
    /// process restart clears it.
    #[error("metrics already registered - please restart the app completely to start tunnel again")]
    DuplicateRegistration { name: String },

    /// The engine panicked
    #[error("tunnel panic: {0}")]
    Panic(String),

    /// The engine returned an error
    #[error("tunnel error: {0}")]
    Failed(String),
}

impl EngineFault {
    /// Code carried by the `error` event
    pub fn code(&self) -> i32 {
        if self.requires_restart() {
            fault_codes::RESTART_REQUIRED
        } else {
            fault_codes::ENGINE_FAULT
        }
    }

    pub fn requires_restart(&self) -> bool {
        matches!(self, EngineFault::DuplicateRegistration { .. })
    }

    /// Classify a panic payload recovered from the engine thread.
    ///
    /// Engines may panic with an `EngineFault` payload
    /// (`std::panic::panic_any`) to keep the classification typed.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<EngineFault>() {
            Ok(fault) => *fault,
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                EngineFault::Panic(message)
            }
        }
    }
}
