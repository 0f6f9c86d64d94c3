//! CLI integration tests
//!
//! Tests the ptctl CLI using assert_cmd, against an in-process service.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tokio_util::sync::CancellationToken;

use pt_core::config::ServiceConfig;
use pt_service::ipc::IpcServer;
use pt_service::{ServiceHost, UiBridge};
use pt_tunnel::{ProcessRegistry, ScriptStep, ScriptedEngine};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Unique port for this test, starting from 39700
fn get_test_port() -> u16 {
    39700 + PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn ptctl() -> Command {
    Command::cargo_bin("ptctl")
        .expect("Failed to locate ptctl binary - ensure it's built before running tests")
}

/// Start an IPC server in the background, returning its address
async fn spawn_service() -> (String, UiBridge, CancellationToken) {
    let address = format!("127.0.0.1:{}", get_test_port());

    let mut config = ServiceConfig::default();
    config.server.bind_host = "127.0.0.1".to_string();
    config.tunnel.reset_settle = Duration::from_millis(20);
    let registry = Arc::new(ProcessRegistry::new());
    let engine = Arc::new(ScriptedEngine::new(vec![ScriptStep::WaitForCancel]));
    let bridge = UiBridge::new(ServiceHost::new(engine, registry, config));

    let cancel = CancellationToken::new();
    let server =
        IpcServer::new(address.clone(), bridge.clone()).with_shutdown_token(cancel.clone());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Wait until the listener accepts connections
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(&address).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    (address, bridge, cancel)
}

/// Run ptctl against `address` off the async runtime
async fn run_ptctl(address: &str, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = ptctl();
    cmd.arg("--address").arg(address).args(args);
    tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .expect("ptctl task panicked")
}

#[test]
fn test_cli_help() {
    ptctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ptctl"))
        .stdout(predicate::str::contains(
            "Control the pocket-tunnel background service",
        ));
}

#[test]
fn test_cli_version_flag() {
    ptctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ptctl"));
}

#[test]
fn test_cli_start_help() {
    ptctl()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--token"))
        .stdout(predicate::str::contains("--origin"));
}

#[test]
fn test_cli_serve_help() {
    ptctl()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Directory to serve"));
}

#[test]
fn test_cli_invalid_command() {
    ptctl().arg("not-a-command").assert().failure();
}

#[test]
fn test_cli_start_requires_token() {
    ptctl()
        .arg("start")
        .env_remove("PT_TUNNEL_TOKEN")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--token"));
}

#[test]
fn test_cli_ping_without_service() {
    // Nothing listens on this port
    let address = format!("127.0.0.1:{}", get_test_port());
    ptctl()
        .args(["--address", &address, "ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Is it running?"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_ping_and_status() {
    let (address, _bridge, cancel) = spawn_service().await;

    run_ptctl(&address, &["ping"])
        .await
        .success()
        .stdout(predicate::str::contains("Service is up"));

    run_ptctl(&address, &["status"])
        .await
        .success()
        .stdout(predicate::str::contains("Service: Idle"))
        .stdout(predicate::str::contains("Tunnel: disconnected [0]"))
        .stdout(predicate::str::contains("Server: stopped [0]"))
        .stdout(predicate::str::contains("pocket-tunnel-mobile/"));

    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_validate_rejects_garbage() {
    let (address, bridge, cancel) = spawn_service().await;

    run_ptctl(&address, &["validate", "not-a-token"])
        .await
        .failure()
        .stderr(predicate::str::contains("INVALID_TOKEN"));

    assert!(!bridge.is_service_running());
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_serve_logs_and_shutdown() {
    let (address, bridge, cancel) = spawn_service().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();
    let port = get_test_port();
    let root = dir.path().to_string_lossy().to_string();

    run_ptctl(&address, &["serve", &root, "--port", &port.to_string()])
        .await
        .success()
        .stdout(predicate::str::contains(format!("http://127.0.0.1:{}", port)));

    let body = reqwest::get(format!("http://127.0.0.1:{}/index.html", port))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("hello"));

    run_ptctl(&address, &["logs"])
        .await
        .success()
        .stdout(predicate::str::contains("/index.html"));

    run_ptctl(&address, &["status"])
        .await
        .success()
        .stdout(predicate::str::contains("Server: running [2]"))
        .stdout(predicate::str::contains(format!("Root: {}", root)))
        .stdout(predicate::str::contains("Requests logged: 1"));

    run_ptctl(&address, &["ls", &root])
        .await
        .success()
        .stdout(predicate::str::contains("index.html"));

    run_ptctl(&address, &["logs", "--clear"])
        .await
        .success()
        .stdout(predicate::str::contains("Request log cleared"));
    assert!(bridge.get_request_logs().await.is_empty());

    run_ptctl(&address, &["shutdown"])
        .await
        .success()
        .stdout(predicate::str::contains("Service stopped"));
    assert!(!bridge.is_service_running());
    assert!(!bridge.is_server_running().await);

    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_watch_prints_resync() {
    let (address, _bridge, cancel) = spawn_service().await;

    run_ptctl(&address, &["watch", "--limit", "2"])
        .await
        .success()
        .stdout(predicate::str::contains("resync] tunnel disconnected"))
        .stdout(predicate::str::contains("resync] server stopped"));

    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_ls_missing_path() {
    let (address, _bridge, cancel) = spawn_service().await;

    run_ptctl(&address, &["ls", "/definitely/not/here"])
        .await
        .failure()
        .stderr(predicate::str::contains("LIST_ERROR"));

    cancel.cancel();
}
