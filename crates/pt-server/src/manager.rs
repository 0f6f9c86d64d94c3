//! Local server manager
//!
//! Owns at most one server session:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopped
//!               |           |
//!               +-> Error <-+ -> Stopped
//! ```
//!
//! The listener is bound before `start` returns, so bind failures are
//! reported synchronously. A serve loop that dies within the startup probe
//! window is reported by `start` as well; later failures only as events.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pt_core::config::ServerSettings;
use pt_core::events::fault_codes;
use pt_core::slot::Occupied;
use pt_core::{
    EventSink, RequestLogEntry, ServerState, ServerStatus, ServiceEvent, SessionSlot, SlotEntry,
};

use crate::capture::{capture_request, CaptureContext};
use crate::error::ServerError;
use crate::log::RequestLog;
use crate::serve;

type ServeHandle = JoinHandle<io::Result<()>>;

struct ServerSession {
    id: u64,
    root_dir: PathBuf,
    port: u16,
    cancel: CancellationToken,
    state: RwLock<ServerState>,
    log: Arc<RequestLog>,
    /// Monitor task, which owns the serve loop's join handle
    task: Mutex<Option<ServeHandle>>,
    serve: Mutex<Option<AbortHandle>>,
}

impl ServerSession {
    /// Abort the serve loop, which drops every open connection
    fn force_close(&self) {
        if let Some(serve) = self.serve.lock().take() {
            serve.abort();
        }
    }

    fn state(&self) -> ServerState {
        *self.state.read()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.write() = state;
    }
}

impl SlotEntry for ServerSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_active(&self) -> bool {
        self.state().is_active()
    }
}

/// Serves one directory at a time
pub struct LocalServerManager {
    sessions: Arc<SessionSlot<ServerSession>>,
    events: EventSink,
    settings: ServerSettings,
    next_id: AtomicU64,
}

impl LocalServerManager {
    pub fn new(events: EventSink, settings: ServerSettings) -> Self {
        Self {
            sessions: Arc::new(SessionSlot::new()),
            events,
            settings,
            next_id: AtomicU64::new(0),
        }
    }

    /// Bind `port` and serve `root_dir`.
    ///
    /// Returns once the listener is bound and the serve loop survived the
    /// startup probe window.
    pub async fn start(&self, root_dir: &Path, port: u16) -> Result<(), ServerError> {
        validate_root(root_dir).await?;
        if port == 0 {
            return Err(ServerError::InvalidPort(port));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, previous) = match self.sessions.install_with(|| ServerSession {
            id,
            root_dir: root_dir.to_path_buf(),
            port,
            cancel: CancellationToken::new(),
            state: RwLock::new(ServerState::Starting),
            log: Arc::new(RequestLog::new(self.settings.max_request_logs)),
            task: Mutex::new(None),
            serve: Mutex::new(None),
        }) {
            Ok(installed) => installed,
            Err(Occupied(active)) => {
                tracing::warn!(port = active.port, "Server already running, ignoring start");
                return Err(ServerError::AlreadyRunning(active.port));
            }
        };
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.events.emit(ServiceEvent::server_state_changed(
            ServerState::Starting,
            "Starting server...",
        ));

        let addr = format!("{}:{}", self.settings.bind_host, port);
        let listener = match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => listener,
            Err(source) => {
                let err = ServerError::Bind { addr, source };
                tracing::error!("{}", err);
                self.fail_session(&session, fault_codes::BIND_FAILED, err.to_string());
                return Err(err);
            }
        };

        let app = self.router(root_dir, Arc::clone(&session.log));
        let mut handle: ServeHandle =
            tokio::spawn(serve::serve(listener, app, session.cancel.clone()));
        *session.serve.lock() = Some(handle.abort_handle());

        tokio::select! {
            result = &mut handle => {
                let message = match result {
                    Ok(Ok(())) => "server exited unexpectedly".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                let err = ServerError::Startup(message);
                tracing::error!("{}", err);
                self.fail_session(&session, fault_codes::SERVE_FAILED, err.to_string());
                return Err(err);
            }
            _ = tokio::time::sleep(self.settings.startup_probe) => {}
        }

        // A stop during the probe window already took the session
        if !self.sessions.holds(id) {
            handle.abort();
            return Ok(());
        }

        session.set_state(ServerState::Running);
        tracing::info!(port, root = %root_dir.display(), "Server running");
        self.events.emit(ServiceEvent::server_state_changed(
            ServerState::Running,
            format!(
                "Server running on port {}, serving: {}",
                port,
                root_dir.display()
            ),
        ));

        let monitor = tokio::spawn(monitor(
            handle,
            Arc::clone(&session),
            Arc::clone(&self.sessions),
            self.events.clone(),
        ));
        *session.task.lock() = Some(monitor);

        Ok(())
    }

    /// Stop the server, waiting up to the grace period for connections to
    /// drain. Never fails.
    pub async fn stop(&self) {
        let Some(session) = self.sessions.take() else {
            return;
        };
        session.cancel.cancel();

        let task = session.task.lock().take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.settings.shutdown_grace, &mut task).await {
                Ok(Ok(Err(e))) => tracing::warn!("Server shutdown error: {}", e),
                Ok(Err(e)) => tracing::warn!("Server task failed: {}", e),
                Ok(Ok(Ok(()))) => {}
                Err(_) => {
                    tracing::warn!(
                        "Server did not drain within {:?}, closing",
                        self.settings.shutdown_grace
                    );
                    session.force_close();
                    // Resolves once the aborted serve loop has dropped its connections
                    let _ = task.await;
                }
            }
        }

        session.set_state(ServerState::Stopped);
        tracing::info!(port = session.port, "Server stopped");
        self.events.emit(ServiceEvent::server_state_changed(
            ServerState::Stopped,
            "Server stopped",
        ));
    }

    pub fn state(&self) -> ServerState {
        self.sessions
            .current()
            .map(|session| session.state())
            .unwrap_or_default()
    }

    /// Whether the server is starting or running
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Loopback URL of the running server
    pub fn server_url(&self) -> Option<String> {
        self.sessions
            .current()
            .filter(|session| session.state() == ServerState::Running)
            .map(|session| format!("http://127.0.0.1:{}", session.port))
    }

    /// Requests served by the current session, oldest first
    pub fn request_logs(&self) -> Vec<RequestLogEntry> {
        self.sessions
            .current()
            .map(|session| session.log.snapshot())
            .unwrap_or_default()
    }

    pub fn clear_request_logs(&self) {
        if let Some(session) = self.sessions.current() {
            session.log.clear();
        }
    }

    pub fn status(&self) -> ServerStatus {
        let session = self.sessions.current();
        ServerStatus {
            state: self.state(),
            port: session.as_ref().map(|s| s.port),
            root_dir: session.as_ref().map(|s| s.root_dir.clone()),
            url: self.server_url(),
            request_count: session.as_ref().map(|s| s.log.len()).unwrap_or(0),
        }
    }

    fn router(&self, root_dir: &Path, log: Arc<RequestLog>) -> Router {
        let capture = CaptureContext {
            log,
            events: self.events.clone(),
            max_body: self.settings.max_body_capture,
        };
        Router::new()
            .fallback_service(ServeDir::new(root_dir))
            .layer(middleware::from_fn_with_state(capture, capture_request))
            .layer(TraceLayer::new_for_http())
    }

    fn fail_session(&self, session: &ServerSession, code: i32, message: String) {
        fail(session, &self.sessions, &self.events, code, message);
    }
}

impl Drop for LocalServerManager {
    fn drop(&mut self) {
        if let Some(session) = self.sessions.take() {
            session.cancel.cancel();
            session.force_close();
        }
    }
}

/// Wait for the serve loop and report a failure that was not a stop
async fn monitor(
    handle: ServeHandle,
    session: Arc<ServerSession>,
    sessions: Arc<SessionSlot<ServerSession>>,
    events: EventSink,
) -> io::Result<()> {
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
    };
    if session.cancel.is_cancelled() {
        return result;
    }

    let message = match &result {
        Ok(()) => "server exited unexpectedly".to_string(),
        Err(e) => format!("Server error: {}", e),
    };
    tracing::error!(port = session.port, "{}", message);
    fail(&session, &sessions, &events, fault_codes::SERVE_FAILED, message);
    result
}

/// Error, then Stopped, for a session that is still installed
fn fail(
    session: &ServerSession,
    sessions: &SessionSlot<ServerSession>,
    events: &EventSink,
    code: i32,
    message: String,
) {
    session.cancel.cancel();
    session.set_state(ServerState::Error);
    if !sessions.holds(session.id) {
        return;
    }
    events.emit(ServiceEvent::ServerError {
        code,
        message: message.clone(),
    });
    events.emit(ServiceEvent::server_state_changed(ServerState::Error, message));

    session.set_state(ServerState::Stopped);
    if sessions.clear_if(session.id) {
        events.emit(ServiceEvent::server_state_changed(
            ServerState::Stopped,
            "Server stopped",
        ));
    }
}

async fn validate_root(root_dir: &Path) -> Result<(), ServerError> {
    let invalid = |reason: String| ServerError::InvalidDirectory {
        path: root_dir.to_path_buf(),
        reason,
    };
    if root_dir.as_os_str().is_empty() {
        return Err(invalid("path is empty".to_string()));
    }
    let metadata = tokio::fs::metadata(root_dir)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(invalid("not a directory".to_string()));
    }
    Ok(())
}
