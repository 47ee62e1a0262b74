// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind so the builder can also take a pre-bound listener.
// ────────────────────────────────
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}
