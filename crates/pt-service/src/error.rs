//! Service error types

use pt_core::{CommandError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The coordinator exited before answering
    #[error("Background service is not running")]
    Unavailable,

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl From<ServiceError> for CommandError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Command(err) => err,
            ServiceError::Unavailable => CommandError::new(ErrorCode::ServiceError, err.to_string()),
        }
    }
}
