// src/proxy/backend.rs
use crate::health::ProbeOutcome;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::{ParseError, Url};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("missing or invalid scheme in {0}")]
    InvalidScheme(String),

    #[error("missing host in {0}")]
    MissingHost(String),

    #[error("missing health check path")]
    MissingHealthCheckPath,
}

/// One upstream instance.
///
/// Health flag and connection counter are plain atomics so the request path
/// never blocks on them. `probe_guard` is only ever taken with `try_lock`,
/// which keeps at most one probe in flight per backend.
#[derive(Debug)]
pub struct Backend {
    url: Url,
    health_url: Url,
    client: Client,

    // Runtime state
    healthy: AtomicBool,
    active_connections: AtomicI32,
    probe_guard: Mutex<()>,
}

impl Backend {
    /// Parse and validate `raw_url`, then build the backend.
    pub fn parse(raw_url: &str, health_path: &str, client: Client) -> Result<Self, BackendError> {
        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(ParseError::EmptyHost) => return Err(BackendError::MissingHost(raw_url.to_string())),
            // No scheme at all ("localhost", ""), unless a colon shows up before
            // the first path separator, which makes the whole thing malformed.
            Err(ParseError::RelativeUrlWithoutBase) if !has_colon_before_path(raw_url) => {
                return Err(BackendError::InvalidScheme(raw_url.to_string()))
            }
            Err(_) => return Err(BackendError::InvalidUrl(raw_url.to_string())),
        };

        Self::new(url, health_path, client)
    }

    pub fn new(url: Url, health_path: &str, client: Client) -> Result<Self, BackendError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BackendError::InvalidScheme(url.to_string()));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(BackendError::MissingHost(url.to_string()));
        }

        if health_path.is_empty() {
            return Err(BackendError::MissingHealthCheckPath);
        }

        let health_url = join_path(&url, health_path);

        Ok(Self {
            url,
            health_url,
            client,
            healthy: AtomicBool::new(true),
            active_connections: AtomicI32::new(0),
            probe_guard: Mutex::new(()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> i32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn add_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release_connection(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Count one in-flight request until the returned guard is dropped.
    pub fn acquire_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.add_connection();
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }

    /// Issue one health probe unless another one is already running.
    ///
    /// A probe that finds the guard taken returns [`ProbeOutcome::Skipped`]
    /// without touching the health flag. Otherwise the flag is set from the
    /// result: any 2xx response is healthy, every other status and every
    /// transport error (timeouts included) is unhealthy.
    pub async fn probe_health(&self) -> ProbeOutcome {
        let Ok(_guard) = self.probe_guard.try_lock() else {
            return ProbeOutcome::Skipped;
        };

        let outcome = match self.client.get(self.health_url.clone()).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => ProbeOutcome::Unhealthy {
                reason: format!("HTTP {}", response.status()),
            },
            Err(e) => ProbeOutcome::Unhealthy {
                reason: e.to_string(),
            },
        };

        self.set_health(outcome.is_healthy());
        outcome
    }
}

/// Releases its connection slot on drop, including during unwinding.
#[must_use = "the connection is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.release_connection();
    }
}

fn has_colon_before_path(raw: &str) -> bool {
    let head = raw.split(['/', '?', '#']).next().unwrap_or_default();
    head.contains(':')
}

fn join_path(base: &Url, path: &str) -> Url {
    let mut joined = base.clone();
    let prefix = base.path().trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    joined.set_path(&format!("{prefix}/{suffix}"));
    joined
}
