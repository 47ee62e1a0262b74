// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BalancerError {
    #[error("no registered backends")]
    NoRegisteredBackends,

    #[error("no healthy backends available")]
    NoHealthyBackends,
}

/// Picks one healthy backend out of an ordered list.
///
/// Implementations are shared by every request task, so any state they keep
/// must be atomic.
pub trait Strategy: Send + Sync {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError>;

    fn name(&self) -> &'static str;
}
