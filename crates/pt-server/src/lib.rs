//! pt-server: Local static HTTP server
//!
//! Serves a directory over HTTP, records every request in a bounded log and
//! reports state changes and captured requests as events.

mod capture;
pub mod error;
pub mod listing;
pub mod log;
pub mod manager;
mod serve;

pub use error::{ListError, ServerError};
pub use listing::list_directory;
pub use log::RequestLog;
pub use manager::LocalServerManager;
