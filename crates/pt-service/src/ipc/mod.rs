//! IPC server for UI clients
//!
//! Exposes the UI bridge to out-of-process UIs (desktop shell, `ptctl`)
//! over localhost TCP.

mod server;

pub use server::IpcServer;
