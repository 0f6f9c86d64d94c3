//! pt-service: Background execution service for pocket-tunnel
//!
//! Hosts the coordinator that owns the tunnel and local server managers,
//! the UI bridge observers attach through, and the localhost IPC server
//! exposing the bridge to out-of-process UIs.

pub mod bridge;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod ipc;
pub mod state;
pub mod status;

pub use bridge::{AllowAll, EventStream, PermissionGate, UiBridge};
pub use coordinator::{CoordinatorHandle, ExitReason};
pub use error::ServiceError;
pub use host::ServiceHost;
pub use state::ServiceState;
pub use status::{StatusNotifier, StatusSummary, TracingNotifier};
