//! HTTP checker implementation.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{classify, Checker, HttpOutcome, ProbeError};
use crate::clock::{Clock, SystemClock};
use crate::db::{CheckFormat, CheckResult, Endpoint};

/// Issues GET requests with reqwest and classifies the outcome.
#[derive(Clone)]
pub struct HttpChecker {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl HttpChecker {
    pub fn new(user_agent: &str) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check an arbitrary URL under the given contract and time budget.
    pub async fn probe(
        &self,
        url: &str,
        format: CheckFormat,
        timeout_ms: u64,
        headers: &BTreeMap<String, String>,
    ) -> CheckResult {
        let start = Instant::now();
        let outcome = self.fetch(url, timeout_ms, headers).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        classify(format, outcome, latency_ms, self.clock.now_millis())
    }

    async fn fetch(&self, url: &str, timeout_ms: u64, headers: &BTreeMap<String, String>) -> HttpOutcome {
        let headers = match header_map(headers) {
            Ok(h) => h,
            Err(e) => return HttpOutcome::Transport(e),
        };

        let attempt = async {
            let response = self.client.get(url).headers(headers).send().await?;
            let status = response.status();
            // Read the whole body before any parsing.
            let body = response.text().await.map_err(|e| describe(&e));
            Ok::<_, reqwest::Error>((status, body))
        };

        // Dropping the attempt on expiry aborts the request and frees its connection.
        match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
            Err(_) => HttpOutcome::Timeout { timeout_ms },
            Ok(Err(e)) if e.is_timeout() => HttpOutcome::Timeout { timeout_ms },
            Ok(Err(e)) => HttpOutcome::Transport(describe(&e)),
            Ok(Ok((status, body))) => HttpOutcome::Response {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            },
        }
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, endpoint: &Endpoint) -> CheckResult {
        tracing::debug!("Checking {} ({})", endpoint.name, endpoint.url);
        self.probe(&endpoint.url, endpoint.format, endpoint.timeout_ms, &endpoint.headers)
            .await
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("Invalid header name {:?}: {}", name, e))?;
        let val = HeaderValue::from_str(value)
            .map_err(|e| format!("Invalid value for header {:?}: {}", name, e))?;
        map.insert(key, val);
    }
    Ok(map)
}

/// Flatten an error and its sources into one line.
fn describe(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Environment, HealthStatus};
    use axum::{http::HeaderMap as AxumHeaders, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    async fn spawn_server() -> SocketAddr {
        let router = Router::new()
            .route("/ok", get(|| async { "OK\n" }))
            .route("/nope", get(|| async { "maintenance" }))
            .route(
                "/json",
                get(|| async {
                    r#"{"status":"healthy","health":[{"dependency":"db","status":"unhealthy","message":"down"}]}"#
                }),
            )
            .route(
                "/unavailable",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "ok") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "ok"
                }),
            )
            .route(
                "/auth",
                get(|headers: AxumHeaders| async move {
                    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
                        Some("secret") => (StatusCode::OK, "ok"),
                        _ => (StatusCode::UNAUTHORIZED, "denied"),
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn endpoint(url: String, format: CheckFormat, timeout_ms: u64) -> Endpoint {
        Endpoint {
            id: "e1".to_string(),
            name: "test".to_string(),
            url,
            format,
            environment: Environment::Development,
            group: None,
            description: None,
            check_interval_seconds: 60,
            timeout_ms,
            headers: BTreeMap::new(),
            public_visible: false,
            webhook_url: None,
            created_at: 0,
            updated_at: 0,
            last_check: None,
        }
    }

    fn checker() -> HttpChecker {
        HttpChecker::new("healthwatch-test")
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(42)))
    }

    #[tokio::test]
    async fn test_ok_text_healthy() {
        let addr = spawn_server().await;
        let result = checker()
            .check(&endpoint(format!("http://{}/ok", addr), CheckFormat::PlainOkText, 2000))
            .await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.error.is_none());
        assert_eq!(result.timestamp, 42);
    }

    #[tokio::test]
    async fn test_ok_text_mismatch() {
        let addr = spawn_server().await;
        let result = checker()
            .check(&endpoint(format!("http://{}/nope", addr), CheckFormat::PlainOkText, 2000))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("Expected \"ok\", got \"maintenance\""));
    }

    #[tokio::test]
    async fn test_json_dependencies() {
        let addr = spawn_server().await;
        let result = checker()
            .check(&endpoint(format!("http://{}/json", addr), CheckFormat::StructuredJson, 2000))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        let deps = result.dependencies.unwrap();
        assert_eq!(deps[0].name, "db");
        assert_eq!(deps[0].description.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_unhealthy() {
        let addr = spawn_server().await;
        let result = checker()
            .check(&endpoint(format!("http://{}/unavailable", addr), CheckFormat::PlainOkText, 2000))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("HTTP 503: Service Unavailable"));
    }

    #[tokio::test]
    async fn test_timeout_bounds_latency() {
        let addr = spawn_server().await;
        let result = checker()
            .check(&endpoint(format!("http://{}/slow", addr), CheckFormat::PlainOkText, 300))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("Timeout after 300ms"));
        assert!(result.latency_ms >= 300, "latency {}", result.latency_ms);
        assert!(result.latency_ms < 2000, "latency {}", result.latency_ms);
    }

    #[tokio::test]
    async fn test_custom_headers_are_sent() {
        let addr = spawn_server().await;
        let mut target = endpoint(format!("http://{}/auth", addr), CheckFormat::PlainOkText, 2000);

        let denied = checker().check(&target).await;
        assert_eq!(denied.error.as_deref(), Some("HTTP 401: Unauthorized"));

        target.headers.insert("X-Api-Key".to_string(), "secret".to_string());
        let allowed = checker().check(&target).await;
        assert_eq!(allowed.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unhealthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = checker()
            .check(&endpoint(format!("http://{}/ok", addr), CheckFormat::PlainOkText, 2000))
            .await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(!result.error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_header_is_unhealthy() {
        let mut target = endpoint("http://127.0.0.1:9/ok".to_string(), CheckFormat::PlainOkText, 1000);
        target.headers.insert("bad header".to_string(), "x".to_string());

        let result = checker().check(&target).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error.unwrap().starts_with("Invalid header name"));
    }
}
