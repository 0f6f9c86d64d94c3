//! UI bridge
//!
//! The command surface UIs call and the single event stream they observe.
//! Each attached stream first receives resync events describing the current
//! state, then live events in emission order. When the coordinator restarts
//! or the observer falls behind, the stream re-attaches and resyncs.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use pt_core::{
    CommandError, DirectoryEntry, ErrorCode, EventEnvelope, Permission, PermissionStatus,
    RequestLogEntry, ServerRequest, ServerState, ServiceStatus, TunnelRequest, TunnelState,
};

use crate::coordinator::CoordinatorHandle;
use crate::error::ServiceError;
use crate::host::ServiceHost;
use crate::state::ServiceState;

/// Buffer between the forwarder and a slow stream consumer
const STREAM_BUFFER: usize = 256;

/// Platform permission prompts
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self, permission: Permission) -> PermissionStatus;

    async fn request(&self, permission: Permission) -> PermissionStatus;
}

/// Gate for hosts without permission prompts
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn check(&self, _permission: Permission) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self, _permission: Permission) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

/// Events for one attached observer
///
/// Dropping the stream detaches it.
pub struct EventStream {
    rx: mpsc::Receiver<EventEnvelope>,
    _guard: DropGuard,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Command surface of the background service
#[derive(Clone)]
pub struct UiBridge {
    host: ServiceHost,
    permissions: Arc<dyn PermissionGate>,
}

impl UiBridge {
    pub fn new(host: ServiceHost) -> Self {
        Self {
            host,
            permissions: Arc::new(AllowAll),
        }
    }

    pub fn with_permission_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.permissions = gate;
        self
    }

    pub fn host(&self) -> &ServiceHost {
        &self.host
    }

    /// Attach a new observer
    pub fn attach(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(forward(self.host.watch(), tx, cancel.clone()));
        EventStream {
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    // Tunnel

    pub async fn start(&self, request: TunnelRequest) -> Result<(), CommandError> {
        // Reject bad tokens without spinning the coordinator up
        pt_tunnel::validate_token(&request.token)?;
        self.with_coordinator(|handle| {
            let request = request.clone();
            async move { handle.start_tunnel(request).await }
        })
        .await
        .map_err(CommandError::from)
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.host.current() {
            if let Err(e) = handle.stop_tunnel().await {
                tracing::debug!("Stop skipped: {}", e);
            }
        }
    }

    pub async fn get_state(&self) -> TunnelState {
        self.query(|handle| async move { handle.tunnel_state().await })
            .await
            .unwrap_or_default()
    }

    /// Decode a token's tunnel id; never touches the session
    pub fn validate_token(&self, token: &str) -> Result<String, CommandError> {
        pt_tunnel::validate_token(token).map_err(CommandError::from)
    }

    pub fn get_version(&self) -> String {
        pt_core::VERSION.to_string()
    }

    /// True while the tunnel is connecting, connected or reconnecting
    pub async fn is_running(&self) -> bool {
        self.get_state().await.is_active()
    }

    /// Stop the tunnel, reset the engine's registration state and settle
    pub async fn force_reset(&self) {
        match self.host.current() {
            Some(handle) => {
                if handle.force_reset().await.is_ok() {
                    return;
                }
                self.host.reset_registry().await;
            }
            None => self.host.reset_registry().await,
        }
    }

    // Local server

    pub async fn start_server(&self, request: ServerRequest) -> Result<(), CommandError> {
        self.with_coordinator(|handle| {
            let request = request.clone();
            async move { handle.start_server(request).await }
        })
        .await
        .map_err(CommandError::from)
    }

    pub async fn stop_server(&self) {
        if let Some(handle) = self.host.current() {
            if let Err(e) = handle.stop_server().await {
                tracing::debug!("Stop server skipped: {}", e);
            }
        }
    }

    pub async fn get_server_state(&self) -> ServerState {
        self.query(|handle| async move { handle.server_state().await })
            .await
            .unwrap_or_default()
    }

    /// Loopback URL of the running server, empty when not running
    pub async fn get_server_url(&self) -> String {
        self.query(|handle| async move { handle.server_url().await })
            .await
            .flatten()
            .unwrap_or_default()
    }

    /// Detailed status of both managers; idle defaults when no coordinator runs
    pub async fn status(&self) -> ServiceStatus {
        self.query(|handle| async move { handle.status().await })
            .await
            .unwrap_or_default()
    }

    pub async fn is_server_running(&self) -> bool {
        self.get_server_state().await.is_active()
    }

    pub async fn get_request_logs(&self) -> Vec<RequestLogEntry> {
        self.query(|handle| async move { handle.request_logs().await })
            .await
            .unwrap_or_default()
    }

    pub async fn clear_request_logs(&self) -> Result<(), CommandError> {
        let Some(handle) = self.host.current() else {
            return Ok(());
        };
        handle
            .clear_request_logs()
            .await
            .map_err(|e| CommandError::new(ErrorCode::ClearError, e.to_string()))
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>, CommandError> {
        pt_server::list_directory(path)
            .await
            .map_err(CommandError::from)
    }

    // Service

    pub fn is_service_running(&self) -> bool {
        self.host.is_running()
    }

    /// Stop the tunnel and server and terminate the coordinator
    pub async fn stop_service(&self) {
        self.host.stop_service().await;
    }

    /// Current coordinator state, or the defaults when none is running
    pub async fn snapshot(&self) -> ServiceState {
        self.query(|handle| async move { handle.snapshot().await })
            .await
            .unwrap_or_default()
    }

    // Permissions

    pub async fn check_permission(&self, permission: Permission) -> PermissionStatus {
        self.permissions.check(permission).await
    }

    pub async fn request_permission(&self, permission: Permission) -> PermissionStatus {
        self.permissions.request(permission).await
    }

    /// Run `op` against a running coordinator, spinning one up if needed.
    ///
    /// A coordinator that exits between lookup and reply is replaced once.
    async fn with_coordinator<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Fn(CoordinatorHandle) -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let handle = self.host.ensure_running()?;
        match op(handle).await {
            Err(ServiceError::Unavailable) => {
                tracing::debug!("Coordinator exited mid-command, retrying");
                op(self.host.ensure_running()?).await
            }
            result => result,
        }
    }

    /// Run `op` only if a coordinator is running
    async fn query<T, F, Fut>(&self, op: F) -> Option<T>
    where
        F: FnOnce(CoordinatorHandle) -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let handle = self.host.current()?;
        op(handle).await.ok()
    }
}

/// Feed one observer: resync on every attach, then live events
async fn forward(
    mut coordinators: watch::Receiver<Option<CoordinatorHandle>>,
    tx: mpsc::Sender<EventEnvelope>,
    cancel: CancellationToken,
) {
    let mut attached_once = false;

    loop {
        let current = coordinators
            .borrow_and_update()
            .clone()
            .filter(|handle| !handle.is_closed());

        let attachment = match current {
            Some(handle) => handle.attach().await.ok(),
            None => None,
        };

        match attachment {
            Some(attachment) => {
                attached_once = true;
                tracing::debug!(epoch = %attachment.epoch_id, "Observer resyncing");
                for envelope in attachment.resync {
                    if tx.send(envelope).await.is_err() {
                        return;
                    }
                }

                let mut events = attachment.events;
                loop {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => return,
                        received = events.recv() => received,
                    };
                    match received {
                        Ok(envelope) => {
                            if tx.send(envelope).await.is_err() {
                                return;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!("Observer lagged by {} events, resyncing", n);
                            break;
                        }
                        Err(RecvError::Closed) => {
                            // Coordinator gone; wait for the host to notice
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                changed = coordinators.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                }
                            }
                            break;
                        }
                    }
                }
            }
            None => {
                if !attached_once {
                    attached_once = true;
                    for event in ServiceState::default().resync_events() {
                        let envelope = EventEnvelope {
                            epoch_id: String::new(),
                            seq: 0,
                            resync: true,
                            event,
                        };
                        if tx.send(envelope).await.is_err() {
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = coordinators.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
