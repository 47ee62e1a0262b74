// src/lib.rs
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod server;
