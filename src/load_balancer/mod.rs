// src/load_balancer/mod.rs
mod algorithm;
mod balancer;
mod least_connections;
mod round_robin;

pub use algorithm::{BalancerError, Strategy};
pub use balancer::LoadBalancer;
pub use least_connections::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use crate::config::LoadBalancerAlgorithm;

use std::sync::Arc;

pub fn create_strategy(algorithm: LoadBalancerAlgorithm) -> Arc<dyn Strategy> {
    match algorithm {
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
    }
}
