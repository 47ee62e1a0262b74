// src/health/status.rs

/// Result of a single [`Backend::probe_health`](crate::proxy::Backend::probe_health) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Another probe for the same backend was still in flight.
    Skipped,
    Healthy,
    Unhealthy { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }

    /// Label used for the probe counter metric.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProbeOutcome::Skipped => "skipped",
            ProbeOutcome::Healthy => "healthy",
            ProbeOutcome::Unhealthy { .. } => "unhealthy",
        }
    }
}
