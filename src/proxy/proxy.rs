// ────────────────────────────────
// src/proxy/proxy.rs
// Proxy component that handles HTTP request forwarding
// ────────────────────────────────

use super::router::Router;
use crate::load_balancer::BalancerError;
use crate::metrics::MetricsCollector;
use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, warn, Instrument};
use url::{Position, Url};
use uuid::Uuid;

const X_REQUEST_ID: &str = "x-request-id";

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards a request to one backend of the virtual host it was addressed to.
pub struct Proxy {
    router: Arc<Router>,
    client: Client<HttpsConnector<HttpConnector>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(router: Arc<Router>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        Self {
            router,
            client,
            metrics,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let started = Instant::now();
        let host = request_host(&req);
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = info_span!(
            "request",
            %request_id,
            %host,
            method = %req.method(),
            path = %req.uri().path()
        );

        let result = self.forward(req, &host, &request_id).instrument(span.clone()).await;

        if let Err(err) = &result {
            span.in_scope(|| match err {
                ProxyError::BackendError(_) => error!(%err, "Proxy error"),
                _ => warn!(%err, "Request not routed"),
            });
        }

        if let Some(metrics) = &self.metrics {
            let status = match &result {
                Ok(response) => response.status(),
                Err(err) => err.status_code(),
            };
            metrics.record_request(&host, status.as_u16(), started.elapsed());
        }

        result
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
        host: &str,
        request_id: &str,
    ) -> Result<Response<Body>, ProxyError> {
        let balancer = self
            .router
            .resolve(host)
            .ok_or_else(|| ProxyError::NoLoadBalancer(host.to_string()))?;
        let backend = balancer.next_backend()?;

        // Held until the response body has been fully streamed back.
        let guard = backend.acquire_connection();
        debug!(
            backend = %backend.url(),
            active_connections = backend.active_connections(),
            "Forwarding request"
        );

        *req.uri_mut() = upstream_uri(backend.url(), req.uri())?;
        strip_hop_by_hop(req.headers_mut());
        if let Ok(value) = HeaderValue::from_str(request_id) {
            req.headers_mut()
                .insert(HeaderName::from_static(X_REQUEST_ID), value);
        }

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::BackendError(format!("{}: {}", backend.url(), e)))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = body.map(move |chunk| {
            let _held = &guard;
            chunk
        });

        Ok(Response::from_parts(parts, Body::wrap_stream(body)))
    }
}

fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default()
        .to_string()
}

/// Rebase the request's path and query onto the backend URL.
fn upstream_uri(base: &Url, original: &Uri) -> Result<Uri, ProxyError> {
    let authority = &base[Position::BeforeHost..Position::AfterPort];
    let prefix = base.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", base.scheme(), authority, prefix, path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidUri(e.to_string()))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no load balancer found for host {0:?}")]
    NoLoadBalancer(String),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("invalid upstream uri: {0}")]
    InvalidUri(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoLoadBalancer(_) | ProxyError::InvalidUri(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Balancer(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match &err {
            ProxyError::BackendError(_) => "Bad gateway".to_string(),
            other => other.to_string(),
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status_code();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{LoadBalancer, RoundRobinBalancer};
    use crate::proxy::Backend;
    use std::time::Duration;

    fn router_for(host: &str, urls: &[String]) -> (Arc<Router>, Vec<Arc<Backend>>) {
        let backends: Vec<Arc<Backend>> = urls
            .iter()
            .map(|url| Arc::new(Backend::parse(url, "/health", reqwest::Client::new()).unwrap()))
            .collect();
        let mut router = Router::new();
        router.insert(
            host,
            LoadBalancer::new(backends.clone(), Arc::new(RoundRobinBalancer::new()), Duration::from_secs(30)),
        )
        .unwrap();
        (Arc::new(router), backends)
    }

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_upstream_uri() {
        let base = Url::parse("http://10.0.0.1:8080").unwrap();
        let uri: Uri = "/users/7?expand=true".parse().unwrap();
        assert_eq!(
            upstream_uri(&base, &uri).unwrap(),
            "http://10.0.0.1:8080/users/7?expand=true"
        );

        let base = Url::parse("https://api.internal/v2/").unwrap();
        let uri: Uri = "/users".parse().unwrap();
        assert_eq!(upstream_uri(&base, &uri).unwrap(), "https://api.internal/v2/users");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("secret"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ProxyError::NoLoadBalancer("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ProxyError::Balancer(BalancerError::NoHealthyBackends), StatusCode::SERVICE_UNAVAILABLE),
            (ProxyError::Balancer(BalancerError::NoRegisteredBackends), StatusCode::SERVICE_UNAVAILABLE),
            (ProxyError::BackendError("refused".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(Response::<Body>::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_forwards_to_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Regex("^/orders".to_string()))
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header(X_REQUEST_ID, mockito::Matcher::Regex(".+".to_string()))
            .with_status(201)
            .with_body("created")
            .create_async()
            .await;

        let (router, backends) = router_for("shop.local", &[server.url()]);
        let proxy = Proxy::new(router, None);

        let response = proxy.handle(request("shop.local:8080", "/orders?page=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"created");
        assert_eq!(backends[0].active_connections(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let (router, _) = router_for("shop.local", &["http://127.0.0.1:9".to_string()]);
        let proxy = Proxy::new(router, None);

        let err = proxy.handle(request("other.local", "/")).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoLoadBalancer(ref host) if host == "other.local"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_no_healthy_backends() {
        let (router, backends) = router_for("shop.local", &["http://127.0.0.1:9".to_string()]);
        backends[0].set_health(false);
        let proxy = Proxy::new(router, None);

        let err = proxy.handle(request("shop.local", "/")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Balancer(BalancerError::NoHealthyBackends)));
        assert_eq!(backends[0].active_connections(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_releases_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (router, backends) = router_for("shop.local", &[format!("http://{addr}")]);
        let proxy = Proxy::new(router, None);

        let err = proxy.handle(request("shop.local", "/")).await.unwrap_err();
        assert!(matches!(err, ProxyError::BackendError(_)));
        assert_eq!(backends[0].active_connections(), 0);
    }
}
