//! Persistent status indicator
//!
//! While the coordinator runs it keeps an ongoing status summary visible
//! through a [`StatusNotifier`]; the host platform decides how to render it.

use serde::Serialize;

/// What the status indicator shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub title: String,
    pub text: String,
    /// Cannot be dismissed without stopping the service
    pub ongoing: bool,
}

pub trait StatusNotifier: Send + Sync {
    fn show(&self, summary: &StatusSummary);

    fn clear(&self);
}

/// Notifier that reports the indicator through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn show(&self, summary: &StatusSummary) {
        tracing::info!(ongoing = summary.ongoing, "[{}] {}", summary.title, summary.text);
    }

    fn clear(&self) {
        tracing::info!("Status indicator cleared");
    }
}
