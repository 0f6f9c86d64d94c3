//! Core domain types
//!
//! State enums cross the UI boundary as plain integer codes, so they
//! serialize through `i32` rather than as strings.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when an integer does not name a known state or level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown code: {0}")]
pub struct UnknownCode(pub i32);

/// State of the tunnel session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum TunnelState {
    /// No session, or the last session ended
    #[default]
    Disconnected,
    /// Session installed, engine not yet connected
    Connecting,
    /// Engine reported a live connection
    Connected,
    /// Engine lost its connection and is retrying
    Reconnecting,
    /// Engine faulted; the session is being torn down
    Error,
}

impl TunnelState {
    /// Integer code used on the command/event surface
    pub const fn code(self) -> i32 {
        match self {
            TunnelState::Disconnected => 0,
            TunnelState::Connecting => 1,
            TunnelState::Connected => 2,
            TunnelState::Reconnecting => 3,
            TunnelState::Error => 4,
        }
    }

    /// Whether a session in this state counts as running
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            TunnelState::Connecting | TunnelState::Connected | TunnelState::Reconnecting
        )
    }
}

impl From<TunnelState> for i32 {
    fn from(state: TunnelState) -> Self {
        state.code()
    }
}

impl TryFrom<i32> for TunnelState {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, UnknownCode> {
        match code {
            0 => Ok(TunnelState::Disconnected),
            1 => Ok(TunnelState::Connecting),
            2 => Ok(TunnelState::Connected),
            3 => Ok(TunnelState::Reconnecting),
            4 => Ok(TunnelState::Error),
            other => Err(UnknownCode(other)),
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Disconnected => write!(f, "disconnected"),
            TunnelState::Connecting => write!(f, "connecting"),
            TunnelState::Connected => write!(f, "connected"),
            TunnelState::Reconnecting => write!(f, "reconnecting"),
            TunnelState::Error => write!(f, "error"),
        }
    }
}

/// State of the local HTTP server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl ServerState {
    /// Integer code used on the command/event surface
    pub const fn code(self) -> i32 {
        match self {
            ServerState::Stopped => 0,
            ServerState::Starting => 1,
            ServerState::Running => 2,
            ServerState::Error => 3,
        }
    }

    /// Whether a session in this state counts as running
    pub const fn is_active(self) -> bool {
        matches!(self, ServerState::Starting | ServerState::Running)
    }
}

impl From<ServerState> for i32 {
    fn from(state: ServerState) -> Self {
        state.code()
    }
}

impl TryFrom<i32> for ServerState {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, UnknownCode> {
        match code {
            0 => Ok(ServerState::Stopped),
            1 => Ok(ServerState::Starting),
            2 => Ok(ServerState::Running),
            3 => Ok(ServerState::Error),
            other => Err(UnknownCode(other)),
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Error => write!(f, "error"),
        }
    }
}

/// Severity of a UI-facing log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for i32 {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }
}

impl TryFrom<i32> for LogLevel {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, UnknownCode> {
        match code {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warn),
            3 => Ok(LogLevel::Error),
            other => Err(UnknownCode(other)),
        }
    }
}

/// Parameters of a tunnel start request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRequest {
    /// Base64 tunnel token
    pub token: String,
    /// Local address the tunnel forwards inbound traffic to
    pub origin_url: String,
    /// Requested HA connections; values below 1 fall back to the default
    #[serde(default)]
    pub ha_connections: u32,
    /// Request post-quantum key agreement from the engine
    #[serde(default)]
    pub enable_post_quantum: bool,
}

impl fmt::Debug for TunnelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelRequest")
            .field("token", &"<redacted>")
            .field("origin_url", &self.origin_url)
            .field("ha_connections", &self.ha_connections)
            .field("enable_post_quantum", &self.enable_post_quantum)
            .finish()
    }
}

/// Parameters of a local server start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRequest {
    /// Directory served as the document root
    pub root_dir: PathBuf,
    /// TCP port to listen on
    pub port: u16,
}

/// Snapshot of the tunnel session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub session_id: Option<u64>,
    pub tunnel_id: Option<String>,
    pub origin_url: Option<String>,
    pub ha_connections: Option<u32>,
    pub enable_post_quantum: bool,
    pub last_error: Option<String>,
    /// RFC 3339 time of the first successful connection
    pub connected_at: Option<String>,
}

/// Snapshot of the local server session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub state: ServerState,
    pub port: Option<u16>,
    pub root_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub request_count: usize,
}

/// Both managers at once, as returned by a status query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub tunnel: TunnelStatus,
    pub server: ServerStatus,
}

/// One served HTTP request, recorded exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    /// RFC 3339 time the request arrived
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    pub user_agent: String,
    pub content_type: String,
    /// Request headers, repeated values joined with ", "
    pub headers: BTreeMap<String, String>,
    /// Query parameters, repeated values joined with ", "
    pub query: BTreeMap<String, String>,
    /// Captured request body; empty when absent or too large
    pub body: String,
    pub status_code: u16,
    pub duration_ms: u64,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// RFC 3339 modification time
    pub mod_time: String,
}

/// Host permissions the UI may query through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Posting the ongoing status indicator
    Notifications,
    /// Running while the UI is suspended
    BackgroundExecution,
    /// Reading the directory served by the local server
    StorageAccess,
}

/// Answer of the host permission facility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotDetermined,
}
