//! Background service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::ipc::DEFAULT_IPC_PORT;

/// Configuration for the background service daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub tunnel: TunnelSettings,
    pub server: ServerSettings,
    pub coordinator: CoordinatorSettings,
    pub ipc: IpcSettings,
    pub logging: LoggingSettings,
}

impl ServiceConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc.port)
    }
}

/// Tunnel manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// HA connections used when a request asks for fewer than one
    pub default_ha_connections: u32,

    /// Pause after a forced registry reset before a new start is accepted
    #[serde(rename = "reset_settle_ms", with = "duration_millis")]
    pub reset_settle: Duration,

    /// Built-in origin probe engine
    pub probe: ProbeEngineSettings,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            default_ha_connections: 4,
            reset_settle: Duration::from_millis(200),
            probe: ProbeEngineSettings::default(),
        }
    }
}

/// Settings of the built-in origin probe engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeEngineSettings {
    /// Time between health probes while connected
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,

    /// Timeout of a single probe request
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,

    /// Consecutive failed probes before the session faults
    pub max_failures: u32,

    /// Delay between failed probes
    pub backoff: BackoffConfig,
}

impl Default for ProbeEngineSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            max_failures: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Local server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface the listener binds to
    pub bind_host: String,

    /// Request log capacity; oldest entries are evicted first
    pub max_request_logs: usize,

    /// Largest request body, in bytes, copied into the request log
    pub max_body_capture: usize,

    /// Window in which an early serve failure is still reported by start
    #[serde(rename = "startup_probe_ms", with = "duration_millis")]
    pub startup_probe: Duration,

    /// Time open connections get to drain on stop
    #[serde(rename = "shutdown_grace_secs", with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_request_logs: 1000,
            max_body_capture: 10 * 1024,
            startup_probe: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Background coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Delay before an idle coordinator terminates
    #[serde(rename = "idle_shutdown_ms", with = "duration_millis")]
    pub idle_shutdown: Duration,

    /// Capacity of the observer broadcast channel
    pub event_buffer: usize,

    /// Capacity of the command queue
    pub command_buffer: usize,

    /// Delay before restarting a coordinator that terminated abnormally
    pub restart: BackoffConfig,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            idle_shutdown: Duration::from_secs(1),
            event_buffer: 1024,
            command_buffer: 64,
            restart: BackoffConfig {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }
}

/// IPC listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcSettings {
    /// IPC port for UI clients (localhost only)
    pub port: u16,
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_IPC_PORT,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(rename = "initial_ms", with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(rename = "max_ms", with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
