// tests/load_balancer_tests.rs
use hyper::{Body, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

use vhost_balancer::config::Config;
use vhost_balancer::load_balancer::{LeastConnectionsBalancer, LoadBalancer, RoundRobinBalancer};
use vhost_balancer::proxy::{Backend, Proxy, Router};
use vhost_balancer::server::{RequestHandler, REPORT_PATH};

async fn upstream(name: &str, path: &str) -> (mockito::ServerGuard, mockito::Mock) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", path)
        .with_status(200)
        .with_body(name)
        .create_async()
        .await;
    (server, mock)
}

async fn send(handler: &RequestHandler, host: &str, path: &str) -> (StatusCode, String) {
    let req = Request::get(path).header("host", host).body(Body::empty()).unwrap();
    let response = handler.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_round_robin_distribution() {
    let (a, _a) = upstream("a", "/").await;
    let (b, _b) = upstream("b", "/").await;

    let config: Config = serde_json::from_value(serde_json::json!({
        "apps": [{
            "host": "shop.local",
            "health_uri": "/health",
            "timeout": "1s",
            "health_check_cooldown": "1m",
            "instances": [{ "url": a.url() }, { "url": b.url() }]
        }]
    }))
    .unwrap();
    config.validate().unwrap();

    let router = Arc::new(Router::from_config(&config, None).unwrap());
    let handler = RequestHandler::new(Arc::new(Proxy::new(router, None)));

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (status, body) = send(&handler, "shop.local", "/").await;
        assert_eq!(status, StatusCode::OK);
        seen.push(body);
    }
    assert_eq!(seen, ["a", "b", "a", "b"]);

    let (status, _) = send(&handler, "unknown.local", "/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_check_removes_unhealthy_backends() {
    let (mut a, _a) = upstream("a", "/items").await;
    let (mut b, _b) = upstream("b", "/items").await;
    let _a_health = a
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;
    let _b_health = b
        .mock("GET", "/health")
        .with_status(503)
        .create_async()
        .await;

    let backends = vec![
        Arc::new(Backend::parse(&a.url(), "/health", client()).unwrap()),
        Arc::new(Backend::parse(&b.url(), "/health", client()).unwrap()),
    ];
    let mut router = Router::new();
    router.insert(
        "shop.local",
        LoadBalancer::new(
            backends.clone(),
            Arc::new(RoundRobinBalancer::new()),
            Duration::from_millis(25),
        ),
    )
    .unwrap();
    let router = Arc::new(router);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checks = router.start_health_checks(shutdown_rx);
    assert_eq!(checks.len(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(backends[0].is_healthy());
    assert!(!backends[1].is_healthy());

    let handler = RequestHandler::new(Arc::new(Proxy::new(router, None)));
    for _ in 0..4 {
        let (status, body) = send(&handler, "shop.local", "/items").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "a");
    }

    let (status, body) = send(&handler, "anything", REPORT_PATH).await;
    assert_eq!(status, StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["apps"][0]["host"], "shop.local");
    assert_eq!(report["apps"][0]["instances"][0]["healthy"], true);
    assert_eq!(report["apps"][0]["instances"][1]["healthy"], false);

    shutdown_tx.send(true).unwrap();
    for check in checks {
        tokio::time::timeout(Duration::from_secs(2), check)
            .await
            .expect("health check did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_all_backends_down_returns_service_unavailable() {
    let backend = Arc::new(Backend::parse("http://10.0.0.1", "/health", client()).unwrap());
    backend.set_health(false);

    let mut router = Router::new();
    router.insert(
        "shop.local",
        LoadBalancer::new(
            vec![backend],
            Arc::new(LeastConnectionsBalancer::new()),
            Duration::from_secs(30),
        ),
    )
    .unwrap();
    let handler = RequestHandler::new(Arc::new(Proxy::new(Arc::new(router), None)));

    let (status, body) = send(&handler, "shop.local", "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "no healthy backends available");
}

#[tokio::test]
async fn test_least_connections_avoids_busy_backend() {
    let backends: Vec<Arc<Backend>> = ["http://10.0.0.1", "http://10.0.0.2"]
        .iter()
        .map(|url| Arc::new(Backend::parse(url, "/health", client()).unwrap()))
        .collect();
    let balancer = LoadBalancer::new(
        backends.clone(),
        Arc::new(LeastConnectionsBalancer::new()),
        Duration::from_secs(30),
    );

    let busy = backends[0].acquire_connection();
    let picked = balancer.next_backend().unwrap();
    assert!(Arc::ptr_eq(&picked, &backends[1]));

    drop(busy);
    let picked = balancer.next_backend().unwrap();
    assert!(Arc::ptr_eq(&picked, &backends[0]));
}

#[tokio::test]
async fn test_app_without_instances_reports_no_registered_backends() {
    let config: Config = serde_json::from_value(serde_json::json!({
        "apps": [{
            "host": "Empty.local",
            "health_uri": "/health",
            "timeout": "1s",
            "health_check_cooldown": "1m",
            "instances": []
        }]
    }))
    .unwrap();
    config.validate().unwrap();

    let router = Arc::new(Router::from_config(&config, None).unwrap());
    assert!(router.start_health_checks(watch::channel(false).1).is_empty());
    let handler = RequestHandler::new(Arc::new(Proxy::new(router, None)));

    let (status, body) = send(&handler, "empty.local:8080", "/").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "no registered backends");

    let (_, body) = send(&handler, "anything", REPORT_PATH).await;
    let report: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        report,
        serde_json::json!({ "apps": [{ "host": "Empty.local", "instances": [] }] })
    );
}
