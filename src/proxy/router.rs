//
// src/proxy/router.rs
//

use super::backend::Backend;
use super::report::{LoadBalancerReport, ReportApp, ReportInstance};
use crate::config::{normalize_host, Config};
use crate::load_balancer::{create_strategy, LoadBalancer};
use crate::metrics::MetricsCollector;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Maps virtual hosts to their load balancers. Fixed after construction.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
}

struct Route {
    // host as configured, reported verbatim
    host: String,
    balancer: Arc<LoadBalancer>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one load balancer per configured app. Any invalid instance URL,
    /// health path or clashing host fails the whole build.
    pub fn from_config(config: &Config, metrics: Option<Arc<MetricsCollector>>) -> Result<Self> {
        let mut router = Self::new();

        for app in &config.apps {
            let client = reqwest::Client::builder()
                .timeout(app.timeout)
                .build()
                .context("Failed to create health check client")?;

            let backends = app
                .instances
                .iter()
                .map(|instance| {
                    Backend::parse(&instance.url, &app.health_uri, client.clone())
                        .map(Arc::new)
                        .with_context(|| format!("Invalid instance {} for host {}", instance.url, app.host))
                })
                .collect::<Result<Vec<_>>>()?;

            if backends.is_empty() {
                tracing::warn!(host = %app.host, "App has no instances, its requests will be rejected");
            }

            let balancer = LoadBalancer::new(backends, create_strategy(app.algorithm()), app.health_check_cooldown)
                .with_metrics(metrics.clone());

            tracing::info!(
                host = %app.host,
                backends = balancer.backends().len(),
                strategy = balancer.strategy_name(),
                "Registered load balancer"
            );

            router.insert(&app.host, balancer)?;
        }

        Ok(router)
    }

    /// Register `balancer` for `host`. Hosts that only differ in case or port
    /// resolve to the same key and are rejected.
    pub fn insert(&mut self, host: &str, balancer: LoadBalancer) -> Result<()> {
        let key = normalize_host(host);
        if let Some(existing) = self.routes.get(&key) {
            bail!("host {} clashes with already registered host {}", host, existing.host);
        }

        self.routes.insert(
            key,
            Route {
                host: host.to_string(),
                balancer: Arc::new(balancer),
            },
        );
        Ok(())
    }

    /// Look up the load balancer for a Host header value. Ports are ignored.
    pub fn resolve(&self, host: &str) -> Option<Arc<LoadBalancer>> {
        self.routes
            .get(&normalize_host(host))
            .map(|route| route.balancer.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn start_health_checks(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.routes
            .values()
            .flat_map(|route| route.balancer.start_health_checks(shutdown_rx.clone()))
            .collect()
    }

    pub fn report(&self) -> LoadBalancerReport {
        let mut apps: Vec<ReportApp> = self
            .routes
            .values()
            .map(|route| ReportApp {
                host: route.host.clone(),
                instances: route
                    .balancer
                    .backends()
                    .iter()
                    .map(|backend| ReportInstance {
                        url: backend.url().to_string(),
                        healthy: backend.is_healthy(),
                    })
                    .collect(),
            })
            .collect();
        apps.sort_by(|a, b| a.host.cmp(&b.host));

        LoadBalancerReport { apps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationConfig, InstanceConfig, MetricsConfig, ServerConfig};
    use std::time::Duration;

    fn app(host: &str, urls: &[&str], strategy: &str) -> ApplicationConfig {
        ApplicationConfig {
            host: host.to_string(),
            instances: urls.iter().map(|url| InstanceConfig { url: url.to_string() }).collect(),
            health_uri: "/health".to_string(),
            timeout: Duration::from_secs(1),
            health_check_cooldown: Duration::from_secs(30),
            strategy: strategy.to_string(),
        }
    }

    fn config(apps: Vec<ApplicationConfig>) -> Config {
        Config {
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            apps,
        }
    }

    #[test]
    fn test_from_config_and_resolve() {
        let router = Router::from_config(
            &config(vec![
                app("App1.local", &["http://10.0.0.1:8080", "http://10.0.0.2:8080"], "least_connections"),
                app("app2.local", &["https://10.0.1.1"], "bogus"),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(router.len(), 2);

        let lb = router.resolve("app1.local:8080").unwrap();
        assert_eq!(lb.backends().len(), 2);
        assert_eq!(lb.strategy_name(), "least_connections");

        let lb = router.resolve("APP2.LOCAL").unwrap();
        assert_eq!(lb.strategy_name(), "round_robin");

        assert!(router.resolve("unknown.local").is_none());
    }

    #[test]
    fn test_from_config_rejects_bad_instances() {
        let bad_scheme = config(vec![app("app.local", &["localhost"], "")]);
        assert!(Router::from_config(&bad_scheme, None).is_err());

        let mut no_health = app("app.local", &["http://10.0.0.1"], "");
        no_health.health_uri.clear();
        assert!(Router::from_config(&config(vec![no_health]), None).is_err());
    }

    #[test]
    fn test_from_config_rejects_clashing_hosts() {
        let clash = config(vec![
            app("a.local", &["http://10.0.0.1"], ""),
            app("A.local:8080", &["http://10.0.0.2"], ""),
        ]);
        let err = Router::from_config(&clash, None).err().unwrap();
        assert!(err.to_string().contains("clashes"), "{err}");

        let mut router = Router::new();
        assert!(router.is_empty());
        let lb = || LoadBalancer::new(Vec::new(), create_strategy(Default::default()), Duration::from_secs(30));
        router.insert("a.local", lb()).unwrap();
        assert!(router.insert("a.local:9000", lb()).is_err());
        assert_eq!(router.len(), 1);
        assert!(!router.is_empty());
    }

    #[test]
    fn test_from_config_accepts_app_without_instances() {
        let router = Router::from_config(&config(vec![app("empty.local", &[], "")]), None).unwrap();
        let lb = router.resolve("empty.local").unwrap();
        assert!(lb.backends().is_empty());
        assert_eq!(
            lb.next_backend().err(),
            Some(crate::load_balancer::BalancerError::NoRegisteredBackends)
        );
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.com:8080"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("127.0.0.1:80"), "127.0.0.1");
    }

    #[test]
    fn test_report() {
        let router = Router::from_config(
            &config(vec![
                app("b.local:8080", &["http://10.0.0.3"], ""),
                app("a.local", &["http://10.0.0.1", "http://10.0.0.2"], ""),
            ]),
            None,
        )
        .unwrap();
        router.resolve("a.local").unwrap().backends()[1].set_health(false);

        let report = serde_json::to_value(router.report()).unwrap();
        assert_eq!(
            report,
            serde_json::json!({
                "apps": [
                    {
                        "host": "a.local",
                        "instances": [
                            {"url": "http://10.0.0.1/", "healthy": true},
                            {"url": "http://10.0.0.2/", "healthy": false}
                        ]
                    },
                    {
                        "host": "b.local:8080",
                        "instances": [{"url": "http://10.0.0.3/", "healthy": true}]
                    }
                ]
            })
        );
    }
}
