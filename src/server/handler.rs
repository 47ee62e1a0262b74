// src/server/handler.rs
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use crate::proxy::{Proxy, Router};

pub const REPORT_PATH: &str = "/api/v1/loadBalancers/report";

/// Serves the status report and proxies everything else.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<Proxy>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        Box::pin(async move {
            if req.method() == Method::GET && req.uri().path() == REPORT_PATH {
                return Ok(report_response(proxy.router()));
            }

            Ok(proxy.handle(req).await.unwrap_or_else(Response::from))
        })
    }
}

fn report_response(router: &Router) -> Response<Body> {
    match serde_json::to_vec(&router.report()) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!("Error encoding report: {}", e);
            let mut response = Response::new(Body::from(format!("error encoding JSON: {e}")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
