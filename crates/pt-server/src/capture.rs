//! Request capture middleware
//!
//! Wraps the file service, recording every request into the request log and
//! emitting a `requestLog` event once the response is produced.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use pt_core::{EventSink, RequestLogEntry, ServiceEvent};

use crate::log::RequestLog;

/// Shared state of the capture layer
#[derive(Clone)]
pub(crate) struct CaptureContext {
    pub(crate) log: Arc<RequestLog>,
    pub(crate) events: EventSink,
    /// Largest body copied into an entry
    pub(crate) max_body: usize,
}

impl CaptureContext {
    fn record(&self, entry: RequestLogEntry) {
        tracing::debug!(
            method = %entry.method,
            path = %entry.path,
            status = entry.status_code,
            duration_ms = entry.duration_ms,
            "Request served"
        );
        self.log.push(entry.clone());
        self.events.emit(ServiceEvent::RequestLog { entry });
    }
}

pub(crate) async fn capture_request(
    State(capture): State<CaptureContext>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let timestamp = pt_core::time::now_rfc3339();

    let (parts, body) = request.into_parts();

    // Only bodies with a declared, small enough length are buffered
    let declared_len = header_value(&parts.headers, CONTENT_LENGTH.as_str())
        .parse::<usize>()
        .ok();
    let (body, captured) = match declared_len {
        Some(len) if len > 0 && len <= capture.max_body => {
            match axum::body::to_bytes(body, capture.max_body).await {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    (Body::from(bytes), text)
                }
                Err(e) => {
                    tracing::warn!("Failed to read request body: {}", e);
                    (Body::empty(), String::new())
                }
            }
        }
        _ => (body, String::new()),
    };

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let mut entry = RequestLogEntry {
        timestamp,
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        remote_addr,
        user_agent: header_value(&parts.headers, USER_AGENT.as_str()),
        content_type: header_value(&parts.headers, CONTENT_TYPE.as_str()),
        headers: flatten_headers(&parts.headers),
        query: flatten_query(&parts.uri),
        body: captured,
        status_code: 0,
        duration_ms: 0,
    };

    let response = next.run(Request::from_parts(parts, body)).await;

    entry.status_code = response.status().as_u16();
    entry.duration_ms = started.elapsed().as_millis() as u64;
    capture.record(entry);

    response
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Multi-valued headers are joined with ", "
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        flat.insert(name.as_str().to_string(), values.join(", "));
    }
    flat
}

/// Repeated query parameters are joined with ", "
fn flatten_query(uri: &axum::http::Uri) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(uri) else {
        return flat;
    };
    for (key, value) in pairs {
        flat.entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}
