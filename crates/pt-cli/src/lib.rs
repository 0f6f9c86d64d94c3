//! pt-cli: Command-line client for pocket-tunnel
//!
//! Provides the `ptctl` CLI for driving the background service over its
//! localhost IPC port: tunnel and server control, request logs, directory
//! listings and a live event stream.

pub mod commands;
pub mod ipc;
pub mod output;
