// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Backend metrics
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,
    pub health_probes_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of proxied requests"),
            &["host", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["host"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "Active backend connections",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let health_probes_total = IntCounterVec::new(
            Opts::new("lb_health_probes_total", "Health probes by result"),
            &["backend", "result"],
        )?;
        registry.register(Box::new(health_probes_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            backend_connections_active,
            backend_health_status,
            health_probes_total,
        })
    }

    pub fn record_request(&self, host: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[host, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[host])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_connections(&self, backend: &str, count: i32) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(i64::from(count));
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn record_health_probe(&self, backend: &str, result: &str) {
        self.health_probes_total
            .with_label_values(&[backend, result])
            .inc();
    }
}
