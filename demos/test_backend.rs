//! demos/test_backend.rs
//! Run: cargo run --example test_backend -- <port> [name]
//!
//! A toy upstream for trying the balancer locally. `GET /health` answers 200
//! or 503 depending on a flag that `POST /health/toggle` flips.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use rand::Rng;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Clone)]
struct BackendState {
    port:            u16,
    name:            String,
    health_path:     String,
    req_counter:     Arc<AtomicU64>,
    probe_counter:   Arc<AtomicU64>,
    healthy_flag:    Arc<AtomicBool>,
    health_delay_ms: u64,
    jitter_ms:       u64,
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

async fn handle(
    req: Request<Body>,
    state: BackendState,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_owned();

    if path == state.health_path {
        let probes = state.probe_counter.fetch_add(1, Ordering::SeqCst) + 1;
        // A slow health endpoint makes overlapping probes visible.
        if state.health_delay_ms > 0 {
            sleep(Duration::from_millis(state.health_delay_ms)).await;
        }
        let healthy = state.healthy_flag.load(Ordering::SeqCst);
        println!("[{}] probe #{} -> {}", state.name, probes, if healthy { "200" } else { "503" });
        return Ok(if healthy {
            status_response(StatusCode::OK, "OK")
        } else {
            status_response(StatusCode::SERVICE_UNAVAILABLE, "Unhealthy")
        });
    }

    if req.method() == Method::POST && path == format!("{}/toggle", state.health_path) {
        let was = state.healthy_flag.fetch_xor(true, Ordering::SeqCst);
        println!("[{}] health flipped -> {}", state.name, if was { "unhealthy" } else { "healthy" });
        return Ok(status_response(StatusCode::NO_CONTENT, ""));
    }

    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = rand::thread_rng().gen_range(0..=state.jitter_ms);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }

    let body = format!(
        r#"{{"backend":"{}","port":{},"req":{},"path":"{}","delay_ms":{}}}"#,
        state.name, state.port, n, path, delay
    );

    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert("content-type", "application/json".parse().expect("static header"));
    response
        .headers_mut()
        .insert("x-backend-name", state.name.parse().unwrap_or_else(|_| "backend".parse().expect("static header")));
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8001".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_NAME").ok())
        .unwrap_or_else(|| format!("backend-{port}"));

    let env_u64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(0);

    let state = BackendState {
        port,
        name: name.clone(),
        health_path: std::env::var("HEALTH_PATH").unwrap_or_else(|_| "/health".into()),
        req_counter: Arc::new(AtomicU64::new(0)),
        probe_counter: Arc::new(AtomicU64::new(0)),
        healthy_flag: Arc::new(AtomicBool::new(true)),
        health_delay_ms: env_u64("HEALTH_DELAY_MS"),
        jitter_ms: env_u64("JITTER_MS"),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, st.clone())
            }))
        }
    });

    println!("Demo backend '{}' on http://{}", name, addr);

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
