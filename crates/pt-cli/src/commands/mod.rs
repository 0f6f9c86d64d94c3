//! CLI command implementations

mod server;
mod status;
mod tunnel;
mod watch;

pub use server::{list_command, logs_command, serve_command, stop_server_command};
pub use status::status_command;
pub use tunnel::{reset_command, start_command, stop_command, validate_command};
pub use watch::watch_command;
