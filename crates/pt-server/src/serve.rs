//! HTTP/1 accept loop
//!
//! Every connection runs in a task owned by the loop's `JoinSet`. Once
//! `shutdown` fires the loop stops accepting and asks each connection to
//! finish its in-flight request. Dropping the loop, for example by aborting
//! its task, aborts every connection that is still open.

use std::io;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::add_extension::AddExtension;

pub(crate) async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!("Dropped connection before accept: {}", e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                connections.spawn(serve_connection(
                    stream,
                    remote_addr,
                    app.clone(),
                    shutdown.clone(),
                ));
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) {
    let service = TowerToHyperService::new(AddExtension::new(app, ConnectInfo(remote_addr)));
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        tracing::trace!(%remote_addr, "Connection closed: {}", e);
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
