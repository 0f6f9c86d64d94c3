//! Origin probe engine
//!
//! Built-in engine used when no edge protocol engine is linked into the
//! host. It keeps a session alive against the origin only: the session is
//! Connected while the origin answers HTTP requests, Reconnecting while
//! probes fail, and faults after too many consecutive failures.

mod backoff;

pub use backoff::ExponentialBackoff;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use pt_core::config::ProbeEngineSettings;
use pt_core::LogLevel;

use crate::engine::{EngineConfig, EngineObserver, TunnelEngine};
use crate::error::EngineFault;
use crate::metrics::MetricsRegistry;

/// Metric names registered on every run
pub const METRICS: &[&str] = &["tunnel_ha_connections", "tunnel_origin_probes"];

/// Engine that supervises reachability of the origin
pub struct OriginProbeEngine {
    settings: ProbeEngineSettings,
    registry: Arc<dyn MetricsRegistry>,
}

impl OriginProbeEngine {
    pub fn new(settings: ProbeEngineSettings, registry: Arc<dyn MetricsRegistry>) -> Self {
        Self { settings, registry }
    }

    async fn supervise(
        &self,
        config: &EngineConfig,
        observer: &EngineObserver,
        cancel: &CancellationToken,
    ) -> Result<(), EngineFault> {
        let client = reqwest::Client::builder()
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| EngineFault::Failed(format!("failed to build HTTP client: {}", e)))?;

        let mut backoff = ExponentialBackoff::from_config(&self.settings.backoff);
        let mut failures = 0u32;
        let mut connected = false;

        loop {
            let delay = match client.get(&config.origin_url).send().await {
                Ok(response) => {
                    tracing::trace!(status = %response.status(), "Origin probe succeeded");
                    failures = 0;
                    backoff.reset();
                    if !connected {
                        observer.connected();
                        connected = true;
                    }
                    self.settings.interval
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_failures {
                        return Err(EngineFault::Failed(format!(
                            "origin {} unreachable after {} attempts: {}",
                            config.origin_url, failures, e
                        )));
                    }
                    let reason = format!("Origin unreachable ({}), retrying", e);
                    if connected {
                        observer.reconnecting(reason);
                        connected = false;
                    } else {
                        observer.log(LogLevel::Warn, reason);
                    }
                    backoff.next_delay()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    observer.log(LogLevel::Info, "Tunnel shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl TunnelEngine for OriginProbeEngine {
    fn run(
        &self,
        config: EngineConfig,
        observer: EngineObserver,
        cancel: CancellationToken,
    ) -> Result<(), EngineFault> {
        for name in METRICS {
            self.registry.register(name)?;
        }

        let runtime = Handle::try_current().map_err(|e| EngineFault::Failed(e.to_string()))?;

        observer.log(
            LogLevel::Debug,
            format!(
                "Tunnel {} ({}), {} HA connections, post-quantum {}",
                config.credentials.tunnel_id,
                config.version,
                config.ha_connections,
                if config.enable_post_quantum { "on" } else { "off" }
            ),
        );
        observer.progress(format!("Probing origin {}", config.origin_url));

        runtime.block_on(self.supervise(&config, &observer, &cancel))
    }
}
