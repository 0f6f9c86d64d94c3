//! IPC client for communicating with the background service
//!
//! Every connection starts with a resync burst replaying the current tunnel
//! and server state, and live events may arrive ahead of any response.
//! Events read while waiting for a response are queued and handed out by
//! [`ServiceClient::next_event`] in arrival order.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use pt_core::ipc::{default_ipc_address, IpcLine, IpcRequest, IpcResponse};
use pt_core::{
    DirectoryEntry, EventEnvelope, Permission, PermissionStatus, RequestLogEntry, ServerRequest,
    ServerState, ServiceStatus, TunnelRequest, TunnelState,
};

/// How an event relates to the ones seen before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracked {
    /// Next event of the current epoch
    InOrder,
    /// Synthetic replay of current state
    Resync,
    /// First event of a coordinator epoch; `previous` is the epoch it replaces
    NewEpoch { previous: Option<String> },
    /// Events were skipped within the current epoch
    Gap { expected: u64, got: u64 },
}

/// Epoch and sequence bookkeeping for one event stream
#[derive(Debug, Default)]
pub struct SequenceTracker {
    epoch_id: Option<String>,
    last_seq: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch_id(&self) -> Option<&str> {
        self.epoch_id.as_deref()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Record an event and classify it
    pub fn observe(&mut self, envelope: &EventEnvelope) -> Tracked {
        if self.epoch_id.as_deref() != Some(envelope.epoch_id.as_str()) {
            let previous = self.epoch_id.replace(envelope.epoch_id.clone());
            self.last_seq = envelope.seq;
            return Tracked::NewEpoch { previous };
        }

        if envelope.resync {
            self.last_seq = envelope.seq;
            return Tracked::Resync;
        }

        let expected = self.last_seq + 1;
        self.last_seq = self.last_seq.max(envelope.seq);
        if envelope.seq > expected {
            Tracked::Gap {
                expected,
                got: envelope.seq,
            }
        } else {
            Tracked::InOrder
        }
    }
}

/// Client for communicating with the background service
pub struct ServiceClient {
    address: String,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    /// Events read while waiting for a response
    pending: VecDeque<EventEnvelope>,
    tracker: SequenceTracker,
}

impl ServiceClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            reader: None,
            writer: None,
            pending: VecDeque::new(),
            tracker: SequenceTracker::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Epoch of the most recently handed out event
    pub fn epoch_id(&self) -> Option<&str> {
        self.tracker.epoch_id()
    }

    /// Connect to the service if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to service at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to service at {}. Is it running?",
                self.address
            )
        })?;
        let (reader, writer) = stream.into_split();
        self.reader = Some(BufReader::new(reader));
        self.writer = Some(writer);
        Ok(())
    }

    /// Check that the service answers
    pub async fn ping(&mut self) -> Result<bool> {
        match self.request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Tunnel
    // ------------------------------------------------------------------

    pub async fn start_tunnel(&mut self, request: TunnelRequest) -> Result<()> {
        self.expect_ok(IpcRequest::Start(request)).await
    }

    pub async fn stop_tunnel(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::Stop).await
    }

    pub async fn tunnel_state(&mut self) -> Result<TunnelState> {
        match self.request(IpcRequest::GetState).await? {
            IpcResponse::TunnelState { state } => Ok(state),
            other => Err(response_error(other)),
        }
    }

    /// Validate a token, returning its tunnel id
    pub async fn validate_token(&mut self, token: &str) -> Result<String> {
        let request = IpcRequest::ValidateToken {
            token: token.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::TunnelId { tunnel_id } => Ok(tunnel_id),
            other => Err(response_error(other)),
        }
    }

    pub async fn version(&mut self) -> Result<String> {
        match self.request(IpcRequest::GetVersion).await? {
            IpcResponse::Version { version } => Ok(version),
            other => Err(response_error(other)),
        }
    }

    pub async fn is_running(&mut self) -> Result<bool> {
        self.expect_flag(IpcRequest::IsRunning).await
    }

    pub async fn force_reset(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::ForceReset).await
    }

    // ------------------------------------------------------------------
    // Local server
    // ------------------------------------------------------------------

    pub async fn start_server(&mut self, request: ServerRequest) -> Result<()> {
        self.expect_ok(IpcRequest::StartServer(request)).await
    }

    pub async fn stop_server(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::StopServer).await
    }

    pub async fn server_state(&mut self) -> Result<ServerState> {
        match self.request(IpcRequest::GetServerState).await? {
            IpcResponse::ServerState { state } => Ok(state),
            other => Err(response_error(other)),
        }
    }

    /// Server URL, empty unless the server is running
    pub async fn server_url(&mut self) -> Result<String> {
        match self.request(IpcRequest::GetServerUrl).await? {
            IpcResponse::Url { url } => Ok(url),
            other => Err(response_error(other)),
        }
    }

    /// Detailed snapshot of the tunnel and the local server
    pub async fn status(&mut self) -> Result<ServiceStatus> {
        match self.request(IpcRequest::GetStatus).await? {
            IpcResponse::Status { status } => Ok(status),
            other => Err(response_error(other)),
        }
    }

    pub async fn is_server_running(&mut self) -> Result<bool> {
        self.expect_flag(IpcRequest::IsServerRunning).await
    }

    pub async fn request_logs(&mut self) -> Result<Vec<RequestLogEntry>> {
        match self.request(IpcRequest::GetRequestLogs).await? {
            IpcResponse::RequestLogs { entries } => Ok(entries),
            other => Err(response_error(other)),
        }
    }

    pub async fn clear_request_logs(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::ClearRequestLogs).await
    }

    pub async fn list_directory(&mut self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let request = IpcRequest::ListDirectory {
            path: path.to_string(),
        };
        match self.request(request).await? {
            IpcResponse::Directory { entries } => Ok(entries),
            other => Err(response_error(other)),
        }
    }

    // ------------------------------------------------------------------
    // Service
    // ------------------------------------------------------------------

    pub async fn is_service_running(&mut self) -> Result<bool> {
        self.expect_flag(IpcRequest::IsServiceRunning).await
    }

    /// Stop the background coordinator along with the tunnel and server
    pub async fn stop_service(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::StopService).await
    }

    pub async fn check_permission(&mut self, permission: Permission) -> Result<PermissionStatus> {
        match self
            .request(IpcRequest::CheckPermission { permission })
            .await?
        {
            IpcResponse::Permission { status, .. } => Ok(status),
            other => Err(response_error(other)),
        }
    }

    pub async fn request_permission(&mut self, permission: Permission) -> Result<PermissionStatus> {
        match self
            .request(IpcRequest::RequestPermission { permission })
            .await?
        {
            IpcResponse::Permission { status, .. } => Ok(status),
            other => Err(response_error(other)),
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Next pushed event, or `None` once the service closes the connection
    pub async fn next_event(&mut self) -> Result<Option<(EventEnvelope, Tracked)>> {
        let envelope = match self.pending.pop_front() {
            Some(envelope) => envelope,
            None => {
                self.connect().await?;
                loop {
                    match self.read_line().await? {
                        Some(IpcLine::Event(envelope)) => break envelope,
                        Some(IpcLine::Response(response)) => {
                            tracing::debug!("Ignoring unsolicited response: {:?}", response);
                        }
                        None => return Ok(None),
                    }
                }
            }
        };

        let tracked = self.tracker.observe(&envelope);
        if let Tracked::Gap { expected, got } = &tracked {
            tracing::warn!(expected, got, "Event sequence gap detected");
        }
        Ok(Some((envelope, tracked)))
    }

    async fn expect_ok(&mut self, request: IpcRequest) -> Result<()> {
        match self.request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(response_error(other)),
        }
    }

    async fn expect_flag(&mut self, request: IpcRequest) -> Result<bool> {
        match self.request(request).await? {
            IpcResponse::Flag { value } => Ok(value),
            other => Err(response_error(other)),
        }
    }

    /// Send a request and wait for its response, queueing events on the way
    async fn request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        writer.write_all(request_json.as_bytes()).await?;

        loop {
            match self.read_line().await? {
                Some(IpcLine::Event(envelope)) => self.pending.push_back(envelope),
                Some(IpcLine::Response(response)) => return Ok(response),
                None => anyhow::bail!("Service closed the connection"),
            }
        }
    }

    async fn read_line(&mut self) -> Result<Option<IpcLine>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                self.reader = None;
                self.writer = None;
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed = IpcLine::parse(trimmed)
                .with_context(|| format!("Malformed line from service: {}", trimmed))?;
            return Ok(Some(parsed));
        }
    }
}

impl Default for ServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn response_error(response: IpcResponse) -> anyhow::Error {
    match response {
        IpcResponse::Error { code, message } => anyhow::anyhow!("{} ({})", message, code),
        other => anyhow::anyhow!("Unexpected response: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pt_core::{ServiceEvent, StateEpoch};

    fn state_event() -> ServiceEvent {
        ServiceEvent::state_changed(TunnelState::Connecting, "Starting tunnel...")
    }

    #[test]
    fn test_tracker_in_order_after_resync() {
        let epoch = StateEpoch::new();
        let mut tracker = SequenceTracker::new();

        let resync = epoch.wrap_resync(state_event());
        assert_eq!(
            tracker.observe(&resync),
            Tracked::NewEpoch { previous: None }
        );
        assert_eq!(tracker.observe(&resync), Tracked::Resync);

        assert_eq!(tracker.observe(&epoch.wrap_event(state_event())), Tracked::InOrder);
        assert_eq!(tracker.observe(&epoch.wrap_event(state_event())), Tracked::InOrder);
        assert_eq!(tracker.last_seq(), 2);
    }

    #[test]
    fn test_tracker_detects_gap() {
        let epoch = StateEpoch::new();
        let mut tracker = SequenceTracker::new();

        tracker.observe(&epoch.wrap_event(state_event()));
        let _skipped = epoch.wrap_event(state_event());
        let third = epoch.wrap_event(state_event());

        assert_eq!(
            tracker.observe(&third),
            Tracked::Gap {
                expected: 2,
                got: 3
            }
        );
        assert_eq!(tracker.observe(&epoch.wrap_event(state_event())), Tracked::InOrder);
    }

    #[test]
    fn test_tracker_reports_restart() {
        let first = StateEpoch::new();
        let second = StateEpoch::new();
        let mut tracker = SequenceTracker::new();

        tracker.observe(&first.wrap_event(state_event()));
        tracker.observe(&first.wrap_event(state_event()));

        let tracked = tracker.observe(&second.wrap_resync(state_event()));
        assert_eq!(
            tracked,
            Tracked::NewEpoch {
                previous: Some(first.id().to_string())
            }
        );
        assert_eq!(tracker.epoch_id(), Some(second.id()));
        assert_eq!(tracker.last_seq(), 0);
    }

    #[test]
    fn test_response_error_carries_code() {
        let err = response_error(IpcResponse::Error {
            code: pt_core::ErrorCode::InvalidToken,
            message: "Invalid tunnel token".to_string(),
        });
        assert!(err.to_string().contains("INVALID_TOKEN"));

        let err = response_error(IpcResponse::Pong);
        assert!(err.to_string().contains("Unexpected response"));
    }
}
