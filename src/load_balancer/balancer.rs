// src/load_balancer/balancer.rs
use crate::health::HealthChecker;
use crate::load_balancer::{BalancerError, Strategy};
use crate::metrics::MetricsCollector;
use crate::proxy::Backend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Backends of one virtual host plus the strategy that picks among them.
pub struct LoadBalancer {
    backends: Vec<Arc<Backend>>,
    strategy: Arc<dyn Strategy>,
    health_check_cooldown: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LoadBalancer {
    pub fn new(
        backends: Vec<Arc<Backend>>,
        strategy: Arc<dyn Strategy>,
        health_check_cooldown: Duration,
    ) -> Self {
        Self {
            backends,
            strategy,
            health_check_cooldown,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn next_backend(&self) -> Result<Arc<Backend>, BalancerError> {
        self.strategy.next_backend(&self.backends)
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Spawn one probe loop per backend. Every loop exits once `shutdown_rx` flips to true.
    pub fn start_health_checks(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            backends = self.backends.len(),
            cooldown = ?self.health_check_cooldown,
            "Starting health checks"
        );

        self.backends
            .iter()
            .map(|backend| {
                let checker = HealthChecker::new(backend.clone(), self.health_check_cooldown)
                    .with_metrics(self.metrics.clone());
                tokio::spawn(checker.run(shutdown_rx.clone()))
            })
            .collect()
    }
}
