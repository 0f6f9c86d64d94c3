//! pt-tunnel: Tunnel session manager
//!
//! Owns at most one tunnel session at a time. The protocol engine is an
//! external collaborator consumed through the blocking [`TunnelEngine::run`]
//! call, which the manager runs on a dedicated blocking thread and observes
//! only through events.

pub mod engine;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod probe;
pub mod scripted;
mod session;
pub mod token;

pub use engine::{EngineConfig, EngineObserver, TunnelEngine};
pub use error::{EngineFault, TunnelError};
pub use manager::TunnelManager;
pub use metrics::{MetricsRegistry, ProcessRegistry};
pub use probe::OriginProbeEngine;
pub use scripted::{ScriptStep, ScriptedEngine};
pub use token::{parse_token, validate_token, TunnelCredentials};
