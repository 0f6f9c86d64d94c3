//! Background execution coordinator
//!
//! An actor task owning one [`TunnelManager`], one [`LocalServerManager`]
//! and the [`ServiceState`]. Commands arrive on a bounded queue and are
//! answered through oneshot replies; manager events arrive on an unbounded
//! queue and are relayed, wrapped in the coordinator's epoch, to every
//! attached observer.
//!
//! While both managers are idle the coordinator keeps an idle deadline and
//! exits cleanly once it passes.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use pt_core::config::CoordinatorSettings;
use pt_core::{
    CommandError, EventEnvelope, RequestLogEntry, ServerRequest, ServerState, ServiceEvent,
    ServiceStatus, StateEpoch, TunnelRequest, TunnelState,
};
use pt_server::LocalServerManager;
use pt_tunnel::TunnelManager;

use crate::error::ServiceError;
use crate::state::ServiceState;
use crate::status::StatusNotifier;

type Reply<T> = oneshot::Sender<T>;

/// Commands handled by the coordinator
pub(crate) enum Command {
    StartTunnel {
        request: TunnelRequest,
        reply: Reply<Result<(), CommandError>>,
    },
    StopTunnel {
        reply: Reply<()>,
    },
    ForceReset {
        reply: Reply<()>,
    },
    TunnelState {
        reply: Reply<TunnelState>,
    },
    StartServer {
        request: ServerRequest,
        reply: Reply<Result<(), CommandError>>,
    },
    StopServer {
        reply: Reply<()>,
    },
    ServerState {
        reply: Reply<ServerState>,
    },
    ServerUrl {
        reply: Reply<Option<String>>,
    },
    RequestLogs {
        reply: Reply<Vec<RequestLogEntry>>,
    },
    ClearRequestLogs {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<ServiceState>,
    },
    Status {
        reply: Reply<ServiceStatus>,
    },
    Attach {
        reply: Reply<Attachment>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// A new observer's view: resync events followed by the live stream
pub struct Attachment {
    pub epoch_id: String,
    /// Current state, to be delivered before anything from `events`
    pub resync: Vec<EventEnvelope>,
    pub events: broadcast::Receiver<EventEnvelope>,
}

/// Why a coordinator terminated on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Both managers stayed idle past the idle deadline
    Idle,
    /// `stopService` tore everything down
    Stopped,
    /// Every handle was dropped
    Closed,
}

/// Cloneable handle to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    epoch_id: Arc<str>,
}

impl CoordinatorHandle {
    pub fn epoch_id(&self) -> &str {
        &self.epoch_id
    }

    /// Whether the coordinator has stopped taking commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ServiceError::Unavailable)?;
        rx.await.map_err(|_| ServiceError::Unavailable)
    }

    pub async fn start_tunnel(&self, request: TunnelRequest) -> Result<(), ServiceError> {
        self.request(|reply| Command::StartTunnel { request, reply })
            .await??;
        Ok(())
    }

    pub async fn stop_tunnel(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::StopTunnel { reply }).await
    }

    pub async fn force_reset(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::ForceReset { reply }).await
    }

    pub async fn tunnel_state(&self) -> Result<TunnelState, ServiceError> {
        self.request(|reply| Command::TunnelState { reply }).await
    }

    pub async fn start_server(&self, request: ServerRequest) -> Result<(), ServiceError> {
        self.request(|reply| Command::StartServer { request, reply })
            .await??;
        Ok(())
    }

    pub async fn stop_server(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::StopServer { reply }).await
    }

    pub async fn server_state(&self) -> Result<ServerState, ServiceError> {
        self.request(|reply| Command::ServerState { reply }).await
    }

    pub async fn server_url(&self) -> Result<Option<String>, ServiceError> {
        self.request(|reply| Command::ServerUrl { reply }).await
    }

    pub async fn request_logs(&self) -> Result<Vec<RequestLogEntry>, ServiceError> {
        self.request(|reply| Command::RequestLogs { reply }).await
    }

    pub async fn clear_request_logs(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::ClearRequestLogs { reply }).await
    }

    pub async fn snapshot(&self) -> Result<ServiceState, ServiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Detailed snapshot straight from both managers
    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn attach(&self) -> Result<Attachment, ServiceError> {
        self.request(|reply| Command::Attach { reply }).await
    }

    /// Tear down both managers and terminate the coordinator
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

enum Wake {
    Event(ServiceEvent),
    Command(Option<Command>),
    IdleDeadline,
}

pub(crate) struct Coordinator {
    tunnel: TunnelManager,
    server: LocalServerManager,
    state: ServiceState,
    epoch: StateEpoch,
    broadcast: broadcast::Sender<EventEnvelope>,
    notifier: Arc<dyn StatusNotifier>,
    settings: CoordinatorSettings,
    idle_deadline: Option<Instant>,
}

impl Coordinator {
    /// Spawn a coordinator owning the two managers.
    ///
    /// `events` must be the receiving half of the sink both managers emit
    /// into.
    pub(crate) fn spawn(
        tunnel: TunnelManager,
        server: LocalServerManager,
        events: UnboundedReceiver<ServiceEvent>,
        notifier: Arc<dyn StatusNotifier>,
        settings: CoordinatorSettings,
    ) -> (CoordinatorHandle, JoinHandle<ExitReason>) {
        let (tx, commands) = mpsc::channel(settings.command_buffer.max(1));
        let (broadcast, _) = broadcast::channel(settings.event_buffer.max(1));
        let epoch = StateEpoch::new();
        let handle = CoordinatorHandle {
            tx,
            epoch_id: Arc::from(epoch.id()),
        };

        let coordinator = Coordinator {
            tunnel,
            server,
            state: ServiceState::default(),
            epoch,
            broadcast,
            notifier,
            settings,
            idle_deadline: None,
        };
        tracing::info!(epoch = handle.epoch_id(), "Background coordinator started");
        let task = tokio::spawn(coordinator.run(commands, events));
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: UnboundedReceiver<ServiceEvent>,
    ) -> ExitReason {
        loop {
            self.refresh_idle_deadline();
            let deadline = self.idle_deadline;

            let wake = tokio::select! {
                Some(event) = events.recv() => Wake::Event(event),
                command = commands.recv() => Wake::Command(command),
                _ = idle_timer(deadline) => Wake::IdleDeadline,
            };

            match wake {
                Wake::Event(event) => self.relay(event),
                Wake::Command(Some(command)) => {
                    if let Some(reason) = self.handle(command, &mut events).await {
                        return reason;
                    }
                }
                Wake::Command(None) => {
                    self.teardown(&mut events).await;
                    return ExitReason::Closed;
                }
                Wake::IdleDeadline => {
                    if self.is_idle() {
                        tracing::info!(
                            epoch = self.epoch.id(),
                            "Coordinator idle, shutting down"
                        );
                        self.notifier.clear();
                        return ExitReason::Idle;
                    }
                    self.idle_deadline = None;
                }
            }
        }
    }

    async fn handle(
        &mut self,
        command: Command,
        events: &mut UnboundedReceiver<ServiceEvent>,
    ) -> Option<ExitReason> {
        match command {
            Command::StartTunnel { request, reply } => {
                self.idle_deadline = None;
                let result = self
                    .tunnel
                    .start(&request)
                    .map(|_| ())
                    .map_err(CommandError::from);
                if result.is_ok() {
                    self.state.last_tunnel_config = Some(request);
                }
                let _ = reply.send(result);
            }
            Command::StopTunnel { reply } => {
                self.tunnel.stop();
                let _ = reply.send(());
            }
            Command::ForceReset { reply } => {
                self.tunnel.force_reset().await;
                let _ = reply.send(());
            }
            Command::TunnelState { reply } => {
                let _ = reply.send(self.tunnel.state());
            }
            Command::StartServer { request, reply } => {
                self.idle_deadline = None;
                let result = self
                    .server
                    .start(&request.root_dir, request.port)
                    .await
                    .map_err(CommandError::from);
                if result.is_ok() {
                    self.state.last_server_config = Some(request);
                }
                let _ = reply.send(result);
            }
            Command::StopServer { reply } => {
                self.server.stop().await;
                let _ = reply.send(());
            }
            Command::ServerState { reply } => {
                let _ = reply.send(self.server.state());
            }
            Command::ServerUrl { reply } => {
                let _ = reply.send(self.server.server_url());
            }
            Command::RequestLogs { reply } => {
                let _ = reply.send(self.server.request_logs());
            }
            Command::ClearRequestLogs { reply } => {
                self.server.clear_request_logs();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::Status { reply } => {
                let _ = reply.send(ServiceStatus {
                    tunnel: self.tunnel.status(),
                    server: self.server.status(),
                });
            }
            Command::Attach { reply } => {
                // Drain first so the resync covers every emitted event
                self.drain(events);
                let attachment = Attachment {
                    epoch_id: self.epoch.id().to_string(),
                    resync: self
                        .state
                        .resync_events()
                        .into_iter()
                        .map(|event| self.epoch.wrap_resync(event))
                        .collect(),
                    events: self.broadcast.subscribe(),
                };
                tracing::debug!(
                    observers = self.broadcast.receiver_count(),
                    "Observer attached"
                );
                let _ = reply.send(attachment);
            }
            Command::Shutdown { reply } => {
                self.teardown(events).await;
                let _ = reply.send(());
                return Some(ExitReason::Stopped);
            }
        }
        None
    }

    fn relay(&mut self, event: ServiceEvent) {
        if self.state.apply(&event) {
            self.notifier.show(&self.state.summary());
        }
        tracing::debug!(kind = event.kind(), "Relaying event");
        // No observers attached is fine
        let _ = self.broadcast.send(self.epoch.wrap_event(event));
    }

    fn drain(&mut self, events: &mut UnboundedReceiver<ServiceEvent>) {
        while let Ok(event) = events.try_recv() {
            self.relay(event);
        }
    }

    /// Force-reset the tunnel and stop the server. Never fails.
    async fn teardown(&mut self, events: &mut UnboundedReceiver<ServiceEvent>) {
        tracing::info!(epoch = self.epoch.id(), "Stopping background service");
        self.tunnel.force_reset().await;
        self.server.stop().await;
        self.drain(events);
        self.notifier.clear();
    }

    fn is_idle(&self) -> bool {
        !self.tunnel.is_running() && !self.server.is_running()
    }

    fn refresh_idle_deadline(&mut self) {
        if !self.is_idle() {
            self.idle_deadline = None;
        } else if self.idle_deadline.is_none() {
            self.idle_deadline = Some(Instant::now() + self.settings.idle_shutdown);
        }
    }
}

async fn idle_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
