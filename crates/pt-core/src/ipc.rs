//! IPC protocol between UI clients and the background service
//!
//! Uses newline-delimited JSON over TCP on localhost (127.0.0.1). Requests
//! and responses are internally tagged with `type`. Events are pushed on the
//! same connection as [`EventEnvelope`] lines, which always carry `epochId`
//! and `seq`; clients should try to decode a line as an envelope first.

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ErrorCode};
use crate::events::EventEnvelope;
use crate::types::{
    DirectoryEntry, Permission, PermissionStatus, RequestLogEntry, ServerRequest, ServerState,
    ServiceStatus, TunnelRequest, TunnelState,
};

/// Default localhost port of the service's IPC listener
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Default IPC address
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from a UI client to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Start the tunnel
    Start(TunnelRequest),
    Stop,
    GetState,
    ValidateToken { token: String },
    GetVersion,
    IsRunning,
    /// Stop the tunnel and reset the engine's registration state
    ForceReset,

    /// Start the local server
    StartServer(ServerRequest),
    StopServer,
    GetServerState,
    GetServerUrl,
    IsServerRunning,
    GetRequestLogs,
    ClearRequestLogs,
    ListDirectory { path: String },

    /// Detailed snapshot of both managers
    GetStatus,
    IsServiceRunning,
    StopService,

    CheckPermission { permission: Permission },
    RequestPermission { permission: Permission },

    /// Ping (for keepalive)
    Ping,
}

/// IPC response from the service to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Generic success
    Ok,
    TunnelState { state: TunnelState },
    ServerState { state: ServerState },
    TunnelId { tunnel_id: String },
    Version { version: String },
    Flag { value: bool },
    Url { url: String },
    RequestLogs { entries: Vec<RequestLogEntry> },
    Directory { entries: Vec<DirectoryEntry> },
    Status { status: ServiceStatus },
    Permission {
        permission: Permission,
        status: PermissionStatus,
    },
    /// Error response
    Error { code: ErrorCode, message: String },
    /// Pong response
    Pong,
}

impl From<CommandError> for IpcResponse {
    fn from(err: CommandError) -> Self {
        IpcResponse::Error {
            code: err.code,
            message: err.message,
        }
    }
}

/// One line received by a client
#[derive(Debug, Clone)]
pub enum IpcLine {
    Event(EventEnvelope),
    Response(IpcResponse),
}

impl IpcLine {
    /// Decode a line, preferring the event interpretation
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        if let Ok(envelope) = serde_json::from_str::<EventEnvelope>(line) {
            return Ok(IpcLine::Event(envelope));
        }
        serde_json::from_str::<IpcResponse>(line).map(IpcLine::Response)
    }
}
