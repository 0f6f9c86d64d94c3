//! IPC client for communicating with the background service
//!
//! Uses TCP on localhost. The service pushes events on the same connection
//! as responses, wrapped in `EventEnvelope`s whose `epoch_id` changes on
//! every coordinator restart and whose `seq` allows gap detection.

mod client;

pub use client::{SequenceTracker, ServiceClient, Tracked};

pub use pt_core::ipc::{default_ipc_address, DEFAULT_IPC_PORT};
