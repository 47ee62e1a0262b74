// src/health/checker.rs
use crate::health::ProbeOutcome;
use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Periodic probe loop for a single backend.
pub struct HealthChecker {
    backend: Arc<Backend>,
    cooldown: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthChecker {
    pub fn new(backend: Arc<Backend>, cooldown: Duration) -> Self {
        Self {
            backend,
            cooldown,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Probe every `cooldown` until `shutdown_rx` turns true or its sender is dropped.
    ///
    /// The first probe fires one cooldown after start. Ticks missed while a
    /// slow probe was running are skipped rather than replayed.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow() {
            return;
        }

        // interval_at panics on a zero period
        let period = self.cooldown.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            backend = %self.backend.url(),
            cooldown = ?self.cooldown,
            "Starting health checks"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(backend = %self.backend.url(), "Health checks stopped");
                        break;
                    }
                }
            }
        }
    }

    async fn check(&self) -> ProbeOutcome {
        let was_healthy = self.backend.is_healthy();
        let outcome = self.backend.probe_health().await;
        let backend = self.backend.url().as_str();

        if let Some(metrics) = &self.metrics {
            metrics.record_health_probe(backend, outcome.as_label());
            metrics.update_backend_connections(backend, self.backend.active_connections());
            if outcome != ProbeOutcome::Skipped {
                metrics.update_backend_health(backend, outcome.is_healthy());
            }
        }

        match &outcome {
            ProbeOutcome::Skipped => trace!(backend, "Probe already in flight, skipping"),
            ProbeOutcome::Healthy if !was_healthy => info!(backend, "Backend is healthy again"),
            ProbeOutcome::Healthy => trace!(backend, "Backend is healthy"),
            ProbeOutcome::Unhealthy { reason } if was_healthy => {
                warn!(backend, %reason, "Backend is now unhealthy")
            }
            ProbeOutcome::Unhealthy { reason } => debug!(backend, %reason, "Backend still unhealthy"),
        }

        outcome
    }
}
