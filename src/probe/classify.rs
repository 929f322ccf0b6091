//! Status classification of a finished HTTP attempt.
//!
//! Pure function over the attempt outcome and the endpoint's declared
//! response format. Every path yields a `CheckResult`.

use serde_json::Value;

use crate::db::{CheckFormat, CheckResult, HealthDependency, HealthStatus};

/// Array fields that may carry the dependency list, in lookup order.
const DEPENDENCY_FIELDS: [&str; 2] = ["health", "dependencies"];

/// How an HTTP attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpOutcome {
    /// A response arrived. `body` is the full text, or the error hit while reading it.
    Response {
        status: u16,
        reason: String,
        body: Result<String, String>,
    },
    /// The time budget ran out first.
    Timeout { timeout_ms: u64 },
    /// DNS, connect, TLS or other transport failure.
    Transport(String),
}

/// Map an outcome to a normalized result.
pub fn classify(format: CheckFormat, outcome: HttpOutcome, latency_ms: u64, timestamp: i64) -> CheckResult {
    let (status, reason, body) = match outcome {
        HttpOutcome::Transport(error) => return CheckResult::unhealthy(error, latency_ms, timestamp),
        HttpOutcome::Timeout { timeout_ms } => {
            return CheckResult::unhealthy(format!("Timeout after {}ms", timeout_ms), latency_ms, timestamp)
        }
        HttpOutcome::Response { status, reason, body } => (status, reason, body),
    };

    if !(200..300).contains(&status) {
        return CheckResult::unhealthy(format!("HTTP {}: {}", status, reason), latency_ms, timestamp);
    }

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            return CheckResult::unhealthy(
                format!("Failed to read response body: {}", e),
                latency_ms,
                timestamp,
            )
        }
    };

    match format {
        CheckFormat::PlainOkText => classify_ok_text(&body, latency_ms, timestamp),
        CheckFormat::StructuredJson => classify_json(&body, latency_ms, timestamp),
    }
}

fn classify_ok_text(body: &str, latency_ms: u64, timestamp: i64) -> CheckResult {
    if body.trim().eq_ignore_ascii_case("ok") {
        CheckResult {
            status: HealthStatus::Healthy,
            latency_ms,
            timestamp,
            dependencies: None,
            error: None,
        }
    } else {
        CheckResult::unhealthy(format!("Expected \"ok\", got \"{}\"", body), latency_ms, timestamp)
    }
}

fn classify_json(body: &str, latency_ms: u64, timestamp: i64) -> CheckResult {
    if body.trim().is_empty() {
        return CheckResult::unhealthy("Empty response body (expected JSON)", latency_ms, timestamp);
    }

    let doc: Value = match serde_json::from_str(body) {
        Ok(doc) => doc,
        Err(e) => {
            return CheckResult::unhealthy(format!("Invalid JSON response: {}", e), latency_ms, timestamp)
        }
    };

    let reported = status_field(&doc);
    let dependencies = dependency_list(&doc);
    let status = match &dependencies {
        Some(deps) => aggregate(reported, deps),
        None => reported,
    };

    CheckResult {
        status,
        latency_ms,
        timestamp,
        dependencies,
        error: None,
    }
}

fn status_field(value: &Value) -> HealthStatus {
    value
        .get("status")
        .and_then(Value::as_str)
        .map(HealthStatus::from_reported)
        .unwrap_or(HealthStatus::Unknown)
}

fn dependency_list(doc: &Value) -> Option<Vec<HealthDependency>> {
    let items = DEPENDENCY_FIELDS
        .iter()
        .find_map(|field| doc.get(field).and_then(Value::as_array))?;

    Some(items.iter().map(dependency).collect())
}

fn dependency(item: &Value) -> HealthDependency {
    let name = ["dependency", "name"]
        .iter()
        .find_map(|k| item.get(k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or("Unknown")
        .to_string();

    let description = ["message", "description"]
        .iter()
        .find_map(|k| match item.get(k) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        });

    HealthDependency {
        name,
        status: status_field(item),
        description,
    }
}

/// Dependencies may escalate the reported status, never soften it.
fn aggregate(reported: HealthStatus, deps: &[HealthDependency]) -> HealthStatus {
    if deps.iter().any(|d| d.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if reported == HealthStatus::Healthy && deps.iter().any(|d| d.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        reported
    }
}
