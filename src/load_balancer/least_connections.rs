// src/load_balancer/least_connections.rs
use crate::load_balancer::{BalancerError, Strategy};
use crate::proxy::Backend;
use std::sync::Arc;

/// Picks the healthy backend with the fewest active connections.
///
/// Counts are read one backend at a time without a shared lock, so the
/// result is a best-effort minimum. Ties go to the earliest backend.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnectionsBalancer {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError> {
        if backends.is_empty() {
            return Err(BalancerError::NoRegisteredBackends);
        }

        let mut selected: Option<(&Arc<Backend>, i32)> = None;
        for backend in backends.iter().filter(|be| be.is_healthy()) {
            let connections = backend.active_connections();
            if selected.map_or(true, |(_, min)| connections < min) {
                selected = Some((backend, connections));
            }
        }

        selected
            .map(|(backend, _)| backend.clone())
            .ok_or(BalancerError::NoHealthyBackends)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
