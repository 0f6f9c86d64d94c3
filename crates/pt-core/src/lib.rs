//! pt-core: Core types, events and configuration for pocket-tunnel
//!
//! This crate provides the state codes, event envelope, error codes, IPC wire
//! types and configuration structures shared by the tunnel manager, the local
//! server manager, the background service and the CLI.

pub mod config;
pub mod error;
pub mod events;
pub mod ipc;
pub mod slot;
pub mod time;
pub mod types;

pub use error::{CommandError, ConfigError, ErrorCode};
pub use events::{EventEnvelope, EventSink, ServiceEvent, StateEpoch};
pub use slot::{SessionSlot, SlotEntry};
pub use types::{
    DirectoryEntry, LogLevel, Permission, PermissionStatus, RequestLogEntry, ServerRequest,
    ServerState, ServerStatus, ServiceStatus, TunnelRequest, TunnelState, TunnelStatus,
};

/// Version string reported to UIs through `getVersion`
pub const VERSION: &str = concat!("pocket-tunnel-mobile/", env!("CARGO_PKG_VERSION"));
