// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::bind_tcp;
use anyhow::{Context, Result};
use hyper::{server::conn::Http, Body, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::Service;

/// Builder pattern so `main.rs` can inject its handler and shutdown signal.
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    listener: Option<TcpListener>,
    handler: Option<H>,
    shutdown: Option<watch::Receiver<bool>>,
    grace_period: Duration,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            listener: None,
            handler: None,
            shutdown: None,
            grace_period: Duration::from_secs(5),
        }
    }

    /// Serve on an already bound listener instead of binding `addr`.
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Stop accepting once the channel turns true (or its sender goes away).
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Upper bound on how long open connections may keep running after shutdown.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Accept connections until shutdown, then drain them.
    pub async fn serve(self) -> Result<()> {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;

        let listener = match self.listener {
            Some(listener) => listener,
            None => bind_tcp(self.addr).await?,
        };
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        let mut shutdown = self.shutdown;
        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let svc = handler.clone();
                    let mut drain_rx = drain_rx.clone();

                    // One Tokio task per connection.
                    connections.spawn(async move {
                        let conn = Http::new().serve_connection(stream, svc);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = drain_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };

                        if let Err(err) = result {
                            tracing::warn!(%peer, %err, "connection error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        drop(listener);
        tracing::info!(
            open_connections = connections.len(),
            "HTTP server shutting down"
        );

        let _ = drain_tx.send(());
        let drained = tokio::time::timeout(self.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Grace period elapsed, aborting open connections"
            );
            connections.shutdown().await;
        }

        Ok(())
    }
}

async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };

    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
