// src/load_balancer/round_robin.rs
use crate::load_balancer::{BalancerError, Strategy};
use crate::proxy::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotates through the list, skipping unhealthy backends.
///
/// `cursor` only ever grows and is reduced modulo the list length on read.
/// Each successful selection moves it just past the winner with a single
/// compare-and-swap, so concurrent callers never share a rotation slot.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinBalancer {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError> {
        if backends.is_empty() {
            return Err(BalancerError::NoRegisteredBackends);
        }

        let len = backends.len();
        let mut current = self.cursor.load(Ordering::Acquire);

        loop {
            let offset = (0..len)
                .find(|offset| backends[current.wrapping_add(*offset) % len].is_healthy())
                .ok_or(BalancerError::NoHealthyBackends)?;

            let start = current.wrapping_add(offset);
            match self.cursor.compare_exchange_weak(
                current,
                start.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(backends[start % len].clone()),
                Err(observed) => current = observed,
            }
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
