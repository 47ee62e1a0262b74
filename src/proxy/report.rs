// src/proxy/report.rs
use serde::Serialize;

/// Body of the status endpoint: every virtual host and the health of its instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancerReport {
    pub apps: Vec<ReportApp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportApp {
    pub host: String,
    pub instances: Vec<ReportInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportInstance {
    pub url: String,
    pub healthy: bool,
}
