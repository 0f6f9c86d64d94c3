//! Local server error types

use std::io;
use std::path::PathBuf;

use pt_core::{CommandError, ErrorCode};
use thiserror::Error;

/// Errors returned synchronously by `start`
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid root directory {path:?}: {reason}")]
    InvalidDirectory { path: PathBuf, reason: String },

    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    #[error("Server already running on port {0}")]
    AlreadyRunning(u16),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Server exited during startup: {0}")]
    Startup(String),
}

impl From<ServerError> for CommandError {
    fn from(err: ServerError) -> Self {
        let code = match &err {
            ServerError::InvalidDirectory { .. } => ErrorCode::InvalidDir,
            ServerError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            ServerError::InvalidPort(_) | ServerError::Bind { .. } | ServerError::Startup(_) => {
                ErrorCode::ServerError
            }
        };
        CommandError::new(code, err.to_string())
    }
}

/// Errors of `list_directory`
#[derive(Error, Debug)]
pub enum ListError {
    #[error("Invalid path: path is empty")]
    InvalidPath,

    #[error("Failed to read directory {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl From<ListError> for CommandError {
    fn from(err: ListError) -> Self {
        let code = match &err {
            ListError::InvalidPath => ErrorCode::InvalidPath,
            ListError::Read { .. } => ErrorCode::ListError,
        };
        CommandError::new(code, err.to_string())
    }
}
