// src/config/models.rs
use anyhow::{bail, ensure, Result};
use hyper::http::uri::Authority;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    pub apps: Vec<ApplicationConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long in-flight connections get to finish after a shutdown signal.
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

/// One virtual host and the instances behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub host: String,

    #[serde(default)]
    pub instances: Vec<InstanceConfig>,

    #[serde(default)]
    pub health_uri: String,

    /// Timeout of a single health probe.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub health_check_cooldown: Duration,

    #[serde(default)]
    pub strategy: String,
}

impl ApplicationConfig {
    pub fn algorithm(&self) -> LoadBalancerAlgorithm {
        LoadBalancerAlgorithm::from_name(&self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerAlgorithm {
    #[default]
    RoundRobin,
    LeastConnections,
}

impl LoadBalancerAlgorithm {
    /// Map a configured strategy name. Empty and unknown names fall back to
    /// round robin instead of failing startup.
    pub fn from_name(name: &str) -> Self {
        match name {
            "round_robin" | "" => LoadBalancerAlgorithm::RoundRobin,
            "least_connections" => LoadBalancerAlgorithm::LeastConnections,
            other => {
                tracing::warn!(
                    "Unsupported load balancing strategy {:?}, falling back to round robin",
                    other
                );
                LoadBalancerAlgorithm::RoundRobin
            }
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.apps.is_empty(), "no apps configured");

        let mut hosts = HashSet::new();
        for app in &self.apps {
            ensure!(!app.host.trim().is_empty(), "app host must not be empty");
            if !hosts.insert(normalize_host(&app.host)) {
                bail!("duplicate app host {}", app.host);
            }
            ensure!(!app.timeout.is_zero(), "app {} has a zero timeout", app.host);
            ensure!(
                !app.health_check_cooldown.is_zero(),
                "app {} has a zero health_check_cooldown",
                app.host
            );
        }

        ensure!(
            !self.metrics.enabled || self.metrics.path.starts_with('/'),
            "metrics path must start with '/'"
        );

        Ok(())
    }
}

/// Routing key for a host: lowercased, port and IPv6 brackets removed.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let name = match host.parse::<Authority>() {
        Ok(authority) => authority.host().trim_start_matches('[').trim_end_matches(']').to_string(),
        Err(_) => host.to_string(),
    };
    name.to_ascii_lowercase()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
