//
// src/proxy/mod.rs
//
mod backend;
mod proxy;
mod report;
mod router;

pub use backend::{Backend, BackendError, ConnectionGuard};
pub use proxy::{Proxy, ProxyError};
pub use report::{LoadBalancerReport, ReportApp, ReportInstance};
pub use router::Router;
