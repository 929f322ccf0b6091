//! Probe module: HTTP health checks and their classification.

mod classify;
mod http;

pub use classify::*;
pub use http::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{CheckResult, Endpoint};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Runs one check against one endpoint.
///
/// Implementations never fail: every fault is reported as an `Unhealthy` result.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, endpoint: &Endpoint) -> CheckResult;
}
