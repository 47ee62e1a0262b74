// src/main.rs
use anyhow::{Context, Result};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use vhost_balancer::{
    config,
    metrics::MetricsRegistry,
    proxy::{Proxy, Router},
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vhost_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initialize metrics
    let metrics_registry = if config.metrics.enabled {
        Some(MetricsRegistry::new()?)
    } else {
        None
    };
    let metrics = metrics_registry.as_ref().map(MetricsRegistry::collector);

    // One load balancer per virtual host
    let router = Arc::new(Router::from_config(&config, metrics.clone())?);
    let health_checks = router.start_health_checks(shutdown_rx.clone());

    if let Some(registry) = metrics_registry {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, registry, config.metrics.path.clone(), shutdown_rx.clone())?;
    }

    let handler = RequestHandler::new(Arc::new(Proxy::new(router, metrics)));

    let addr: SocketAddr = ([0, 0, 0, 0], config.server.port).into();
    info!("Starting load balancer on {}", addr);

    let mut server = tokio::spawn(
        ServerBuilder::new(addr)
            .with_handler(handler)
            .with_shutdown(shutdown_rx)
            .with_grace_period(config.server.shutdown_grace)
            .serve(),
    );

    tokio::select! {
        result = &mut server => {
            let _ = shutdown_tx.send(true);
            return result.context("server task failed")?;
        }
        _ = shutdown_signal() => {}
    }

    let _ = shutdown_tx.send(true);
    server.await.context("server task failed")??;
    futures::future::join_all(health_checks).await;

    info!("Load balancer stopped");
    Ok(())
}

fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path); // keep this for logging
    let service_path = metrics_path.clone(); // clone for the service closure

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != path.as_str() {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("Not Found");
                        return Ok::<_, Infallible>(response);
                    }

                    match registry.gather() {
                        Ok(metrics) => {
                            response.headers_mut().insert(
                                hyper::header::CONTENT_TYPE,
                                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                            );
                            *response.body_mut() = Body::from(metrics);
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        });

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
