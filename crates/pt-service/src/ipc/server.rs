//! IPC server implementation
//!
//! Listens on localhost TCP for requests from UI clients. Every connection
//! is an attached observer: it receives resync events right away and live
//! events interleaved with its responses.

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use pt_core::ipc::{IpcRequest, IpcResponse};
use pt_core::ErrorCode;

use crate::bridge::UiBridge;

/// Longest request line accepted from a client
const MAX_REQUEST_LINE: usize = 1024 * 1024;

/// IPC server for UI clients
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    bridge: UiBridge,
    /// Cancellation token for shutdown
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    pub fn new(address: String, bridge: UiBridge) -> Self {
        Self {
            address,
            bridge,
            shutdown_token: None,
        }
    }

    /// Stop accepting connections once the token fires
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;

        tracing::info!("IPC server listening on {}", self.address);

        let shutdown = self.shutdown_token.clone().unwrap_or_default();
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let bridge = self.bridge.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, bridge, shutdown).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    bridge: UiBridge,
    shutdown: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    // Framed reads keep partial lines buffered when an event wins the select
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    // Attach as an observer; resync events arrive first
    let mut events = bridge.attach();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            // Handle incoming requests
            line = lines.next() => {
                let response = match line {
                    None => break, // EOF
                    Some(Ok(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<IpcRequest>(trimmed) {
                            Ok(request) => handle_request(request, &bridge).await,
                            Err(e) => invalid_request(e),
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        invalid_request("request line too long")
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                };

                let mut response_json = serde_json::to_string(&response)?;
                response_json.push('\n');
                writer.write_all(response_json.as_bytes()).await?;
            }

            // Forward events to the client
            event = events.recv() => {
                match event {
                    Some(envelope) => {
                        let mut event_json = serde_json::to_string(&envelope)?;
                        event_json.push('\n');
                        writer.write_all(event_json.as_bytes()).await?;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}

fn invalid_request(reason: impl std::fmt::Display) -> IpcResponse {
    IpcResponse::Error {
        code: ErrorCode::ServiceError,
        message: format!("Invalid request: {}", reason),
    }
}

async fn handle_request(request: IpcRequest, bridge: &UiBridge) -> IpcResponse {
    match request {
        IpcRequest::Start(request) => match bridge.start(request).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => e.into(),
        },

        IpcRequest::Stop => {
            bridge.stop().await;
            IpcResponse::Ok
        }

        IpcRequest::GetState => IpcResponse::TunnelState {
            state: bridge.get_state().await,
        },

        IpcRequest::ValidateToken { token } => match bridge.validate_token(&token) {
            Ok(tunnel_id) => IpcResponse::TunnelId { tunnel_id },
            Err(e) => e.into(),
        },

        IpcRequest::GetVersion => IpcResponse::Version {
            version: bridge.get_version(),
        },

        IpcRequest::IsRunning => IpcResponse::Flag {
            value: bridge.is_running().await,
        },

        IpcRequest::ForceReset => {
            bridge.force_reset().await;
            IpcResponse::Ok
        }

        IpcRequest::StartServer(request) => match bridge.start_server(request).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => e.into(),
        },

        IpcRequest::StopServer => {
            bridge.stop_server().await;
            IpcResponse::Ok
        }

        IpcRequest::GetServerState => IpcResponse::ServerState {
            state: bridge.get_server_state().await,
        },

        IpcRequest::GetServerUrl => IpcResponse::Url {
            url: bridge.get_server_url().await,
        },

        IpcRequest::IsServerRunning => IpcResponse::Flag {
            value: bridge.is_server_running().await,
        },

        IpcRequest::GetRequestLogs => IpcResponse::RequestLogs {
            entries: bridge.get_request_logs().await,
        },

        IpcRequest::ClearRequestLogs => match bridge.clear_request_logs().await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => e.into(),
        },

        IpcRequest::ListDirectory { path } => match bridge.list_directory(&path).await {
            Ok(entries) => IpcResponse::Directory { entries },
            Err(e) => e.into(),
        },

        IpcRequest::GetStatus => IpcResponse::Status {
            status: bridge.status().await,
        },

        IpcRequest::IsServiceRunning => IpcResponse::Flag {
            value: bridge.is_service_running(),
        },

        IpcRequest::StopService => {
            tracing::info!("Service stop requested via IPC");
            bridge.stop_service().await;
            IpcResponse::Ok
        }

        IpcRequest::CheckPermission { permission } => IpcResponse::Permission {
            permission,
            status: bridge.check_permission(permission).await,
        },

        IpcRequest::RequestPermission { permission } => IpcResponse::Permission {
            permission,
            status: bridge.request_permission(permission).await,
        },

        IpcRequest::Ping => IpcResponse::Pong,
    }
}
