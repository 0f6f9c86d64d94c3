//! Tunnel manager lifecycle tests
//!
//! Drives the manager with scripted engines and checks the state machine
//! and the events it emits.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pt_core::config::{BackoffConfig, ProbeEngineSettings, TunnelSettings};
use pt_core::events::fault_codes;
use pt_core::{EventSink, ServiceEvent, TunnelRequest, TunnelState};
use pt_tunnel::{
    EngineConfig, EngineFault, EngineObserver, MetricsRegistry, OriginProbeEngine, ProcessRegistry, ScriptStep, ScriptedEngine,
    TunnelEngine, TunnelError, TunnelManager,
};

fn token() -> String {
    let json = serde_json::json!({
        "a": "account-tag",
        "s": STANDARD.encode(b"tunnel-secret"),
        "t": "6ff42ae2-765d-4adf-8112-31c55c1551ef",
    });
    STANDARD.encode(json.to_string())
}

fn request(origin_url: &str) -> TunnelRequest {
    TunnelRequest {
        token: token(),
        origin_url: origin_url.to_string(),
        ha_connections: 4,
        enable_post_quantum: false,
    }
}

fn fast_settings() -> TunnelSettings {
    TunnelSettings {
        reset_settle: Duration::from_millis(20),
        ..TunnelSettings::default()
    }
}

struct Harness {
    manager: TunnelManager,
    registry: Arc<ProcessRegistry>,
    events: UnboundedReceiver<ServiceEvent>,
}

fn harness_with(engine: impl FnOnce(Arc<ProcessRegistry>) -> Arc<dyn TunnelEngine>) -> Harness {
    let (sink, events) = EventSink::channel();
    let registry = Arc::new(ProcessRegistry::new());
    let engine = engine(Arc::clone(&registry));
    let manager = TunnelManager::new(engine, registry.clone(), sink, fast_settings());
    Harness {
        manager,
        registry,
        events,
    }
}

fn harness(steps: Vec<ScriptStep>) -> Harness {
    harness_with(|_| Arc::new(ScriptedEngine::new(steps)))
}

/// Collect events until `stop` matches or the timeout expires
async fn collect_until(
    rx: &mut UnboundedReceiver<ServiceEvent>,
    stop: impl Fn(&ServiceEvent) -> bool,
) -> Vec<ServiceEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_secs(3), rx.recv()).await {
        let done = stop(&event);
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn is_state(state: TunnelState) -> impl Fn(&ServiceEvent) -> bool {
    move |event| matches!(event, ServiceEvent::StateChanged { state: s, .. } if *s == state)
}

fn states(events: &[ServiceEvent]) -> Vec<TunnelState> {
    events
        .iter()
        .filter_map(|event| match event {
            ServiceEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_start_while_connecting_is_rejected() {
    let h = harness(vec![ScriptStep::WaitForCancel]);

    let first = h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let mut other = request("http://127.0.0.1:2");
    other.ha_connections = 1;

    let err = h.manager.start(&other).unwrap_err();
    assert!(matches!(err, TunnelError::AlreadyRunning(id) if id == first));

    let status = h.manager.status();
    assert_eq!(status.session_id, Some(first));
    assert_eq!(status.origin_url.as_deref(), Some("http://127.0.0.1:1"));
    assert_eq!(status.ha_connections, Some(4));

    h.manager.stop();
}

#[tokio::test]
async fn test_start_while_connected_is_rejected() {
    let mut h = harness(vec![ScriptStep::Connect, ScriptStep::WaitForCancel]);

    let first = h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    collect_until(&mut h.events, is_state(TunnelState::Connected)).await;
    assert_eq!(h.manager.state(), TunnelState::Connected);
    assert!(h.manager.status().connected_at.is_some());

    assert!(matches!(
        h.manager.start(&request("http://127.0.0.1:1")),
        Err(TunnelError::AlreadyRunning(_))
    ));
    assert_eq!(h.manager.status().session_id, Some(first));

    h.manager.stop();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut h = harness(vec![ScriptStep::WaitForCancel]);

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    h.manager.stop();
    h.manager.stop();

    assert_eq!(h.manager.state(), TunnelState::Disconnected);
    assert!(!h.manager.is_running());

    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;
    assert_eq!(
        states(&events),
        vec![TunnelState::Connecting, TunnelState::Disconnected]
    );

    // The stopped engine returns on its own; no second disconnect follows.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.events.try_recv().is_err());
}

/// Engine that flips between connected and reconnecting until cancelled
struct FlappingEngine;

impl TunnelEngine for FlappingEngine {
    fn run(
        &self,
        _config: EngineConfig,
        observer: EngineObserver,
        cancel: CancellationToken,
    ) -> Result<(), EngineFault> {
        while !cancel.is_cancelled() {
            observer.connected();
            observer.reconnecting("edge flapped");
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_is_the_last_state_published() {
    let mut h = harness_with(|_| Arc::new(FlappingEngine));

    for round in 0..100 {
        h.manager.start(&request("http://127.0.0.1:1")).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        h.manager.stop();

        // Give the engine thread time to observe the cancel and return.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut last = None;
        while let Ok(event) = h.events.try_recv() {
            if let ServiceEvent::StateChanged { state, .. } = event {
                last = Some(state);
            }
        }

        assert_eq!(
            last,
            Some(TunnelState::Disconnected),
            "round {}: stale state published after stop",
            round
        );
        assert_eq!(h.manager.state(), TunnelState::Disconnected);
    }
}

#[tokio::test]
async fn test_stop_resets_registry() {
    let h = harness(vec![]);
    h.registry.register("stale").unwrap();
    h.manager.stop();
    assert!(h.registry.registered().is_empty());
    assert_eq!(h.registry.generation(), 1);
}

#[tokio::test]
async fn test_reconnect_cycle() {
    let mut h = harness(vec![
        ScriptStep::Progress("Resolving edge".to_string()),
        ScriptStep::Connect,
        ScriptStep::Reconnect("edge connection lost".to_string()),
        ScriptStep::Connect,
        ScriptStep::WaitForCancel,
    ]);

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let mut seen = collect_until(&mut h.events, is_state(TunnelState::Reconnecting)).await;
    seen.extend(collect_until(&mut h.events, is_state(TunnelState::Connected)).await);

    assert_eq!(
        states(&seen),
        vec![
            TunnelState::Connecting,
            TunnelState::Connecting,
            TunnelState::Connected,
            TunnelState::Reconnecting,
            TunnelState::Connected,
        ]
    );
    assert_eq!(h.manager.state(), TunnelState::Connected);
    h.manager.stop();
}

#[tokio::test]
async fn test_engine_fault_becomes_error_then_disconnected() {
    let mut h = harness(vec![
        ScriptStep::Connect,
        ScriptStep::Fail(EngineFault::Failed("edge rejected credentials".to_string())),
    ]);

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;

    assert_eq!(
        states(&events),
        vec![
            TunnelState::Connecting,
            TunnelState::Connected,
            TunnelState::Error,
            TunnelState::Disconnected,
        ]
    );
    let error = events
        .iter()
        .find_map(|event| match event {
            ServiceEvent::Error { code, message } => Some((*code, message.clone())),
            _ => None,
        })
        .expect("error event");
    assert_eq!(error.0, fault_codes::ENGINE_FAULT);
    assert!(error.1.contains("edge rejected credentials"));
    assert_eq!(h.manager.state(), TunnelState::Disconnected);

    // The ended session keeps its last error for status queries
    let status = h.manager.status();
    assert_eq!(status.state, TunnelState::Disconnected);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("edge rejected credentials")));
    assert!(status.connected_at.is_none());
}

#[tokio::test]
async fn test_engine_panic_is_recovered() {
    let mut h = harness(vec![ScriptStep::Panic("index out of range".to_string())]);

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;

    assert!(events.iter().any(|event| matches!(
        event,
        ServiceEvent::Error { code, message }
            if *code == fault_codes::ENGINE_FAULT && message == "tunnel panic: index out of range"
    )));
    assert_eq!(h.manager.state(), TunnelState::Disconnected);

    // The manager stays usable after a panic.
    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
}

#[tokio::test]
async fn test_typed_duplicate_registration_requires_restart() {
    let mut h = harness(vec![ScriptStep::PanicWith(
        EngineFault::DuplicateRegistration {
            name: "tunnel_ha_connections".to_string(),
        },
    )]);

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;

    let (code, message) = events
        .iter()
        .find_map(|event| match event {
            ServiceEvent::Error { code, message } => Some((*code, message.clone())),
            _ => None,
        })
        .expect("error event");
    assert_eq!(code, fault_codes::RESTART_REQUIRED);
    assert!(message.contains("restart the app completely"));
}

#[tokio::test]
async fn test_duplicate_registration_inside_one_run() {
    let mut h = harness_with(|registry| {
        Arc::new(
            ScriptedEngine::new(vec![
                ScriptStep::Register("tunnel_requests".to_string()),
                ScriptStep::Register("tunnel_requests".to_string()),
            ])
            .with_registry(registry),
        )
    });

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;
    assert!(events.iter().any(|event| matches!(
        event,
        ServiceEvent::Error { code, .. } if *code == fault_codes::RESTART_REQUIRED
    )));
}

#[tokio::test]
async fn test_force_reset_then_start_with_same_token() {
    let mut h = harness_with(|registry| {
        Arc::new(
            ScriptedEngine::new(vec![
                ScriptStep::Register("tunnel_ha_connections".to_string()),
                ScriptStep::Connect,
                ScriptStep::WaitForCancel,
            ])
            .with_registry(registry),
        )
    });

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    collect_until(&mut h.events, is_state(TunnelState::Connected)).await;

    h.manager.force_reset().await;
    assert_eq!(h.manager.state(), TunnelState::Disconnected);
    collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    let events = collect_until(&mut h.events, |event| {
        matches!(
            event,
            ServiceEvent::StateChanged {
                state: TunnelState::Connected | TunnelState::Error,
                ..
            }
        )
    })
    .await;

    assert_eq!(states(&events).last(), Some(&TunnelState::Connected));
    assert!(!events
        .iter()
        .any(|event| matches!(event, ServiceEvent::Error { .. })));
    h.manager.stop();
}

#[tokio::test]
async fn test_force_reset_without_session() {
    let h = harness(vec![]);
    h.manager.force_reset().await;
    h.manager.force_reset().await;
    assert_eq!(h.manager.state(), TunnelState::Disconnected);
    assert_eq!(h.registry.generation(), 2);
}

#[tokio::test]
async fn test_validate_token_concurrent_with_start() {
    let h = harness(vec![ScriptStep::WaitForCancel]);
    let token = token();

    h.manager.start(&request("http://127.0.0.1:1")).unwrap();
    for _ in 0..10 {
        assert_eq!(
            h.manager.validate_token(&token).unwrap(),
            "6ff42ae2-765d-4adf-8112-31c55c1551ef"
        );
        assert_eq!(h.manager.state(), TunnelState::Connecting);
    }
    assert!(h.manager.validate_token("not-a-token").is_err());
    assert!(h.manager.is_running());
    h.manager.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_origin_probe_engine_connects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let app = axum::Router::new().route("/", axum::routing::get(|| async { "ok" }));
    let origin_task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut h = harness_with(|registry| {
        Arc::new(OriginProbeEngine::new(
            ProbeEngineSettings::default(),
            registry,
        ))
    });

    h.manager.start(&request(&origin)).unwrap();
    let events = collect_until(&mut h.events, is_state(TunnelState::Connected)).await;
    assert_eq!(states(&events).last(), Some(&TunnelState::Connected));
    assert_eq!(h.registry.registered().len(), pt_tunnel::probe::METRICS.len());

    h.manager.stop();
    origin_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_origin_probe_engine_gives_up() {
    // Bind and drop to get a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let settings = ProbeEngineSettings {
        max_failures: 2,
        timeout: Duration::from_secs(1),
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..ProbeEngineSettings::default()
    };

    let mut h = harness_with(|registry| Arc::new(OriginProbeEngine::new(settings, registry)));
    h.manager
        .start(&request(&format!("http://127.0.0.1:{}", port)))
        .unwrap();

    let events = collect_until(&mut h.events, is_state(TunnelState::Disconnected)).await;
    assert!(states(&events).contains(&TunnelState::Error));
    assert!(events.iter().any(|event| matches!(
        event,
        ServiceEvent::Error { code, message }
            if *code == fault_codes::ENGINE_FAULT && message.contains("unreachable")
    )));
}
