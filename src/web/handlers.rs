//! HTTP request handlers.

use super::AppState;
use crate::db::{
    CheckFormat, CheckResult, EndpointInput, Environment, HealthStatus, HistoryStats, SettingsUpdate, StoreError,
};
use crate::scheduler::{CheckOutcome, MonitorError};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entries returned by the history endpoint when no limit is given.
const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;
/// Timeout for ad-hoc checks that do not name one.
const DEFAULT_ADHOC_TIMEOUT_MS: u64 = 10_000;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, format!("invalid {}", msg)),
        StoreError::NotFound => error_response(StatusCode::NOT_FOUND, "Endpoint not found"),
        other => {
            tracing::error!("Store error: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ============================================================================
// API: Endpoints
// ============================================================================

pub async fn handle_get_endpoints(State(state): State<AppState>) -> Response {
    match state.store.list_endpoints() {
        Ok(endpoints) => Json(endpoints).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_create_endpoint(
    State(state): State<AppState>,
    Json(input): Json<EndpointInput>,
) -> Response {
    match state.store.add_endpoint(input) {
        Ok(endpoint) => {
            tracing::info!("Added endpoint {} ({})", endpoint.name, endpoint.url);
            (StatusCode::CREATED, Json(endpoint)).into_response()
        }
        Err(e) => store_error(e),
    }
}

pub async fn handle_get_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_endpoint(&id) {
        Ok(Some(endpoint)) => Json(endpoint).into_response(),
        Ok(None) => store_error(StoreError::NotFound),
        Err(e) => store_error(e),
    }
}

pub async fn handle_update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EndpointInput>,
) -> Response {
    match state.store.update_endpoint(&id, input) {
        Ok(endpoint) => Json(endpoint).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_delete_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_endpoint(&id) {
        Ok(()) => {
            tracing::info!("Deleted endpoint {}", id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e),
    }
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_check_endpoint(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.monitor.check_endpoint(&id).await {
        Ok(CheckOutcome::Checked(result)) => Json(result).into_response(),
        Ok(CheckOutcome::Skipped) => error_response(StatusCode::CONFLICT, "Check skipped: already in progress or checks disabled"),
        Ok(CheckOutcome::Discarded) => error_response(StatusCode::GONE, "Endpoint removed during check"),
        Err(MonitorError::NotFound(_)) => store_error(StoreError::NotFound),
        Err(MonitorError::Store(e)) => store_error(e),
    }
}

pub async fn handle_check_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.check_all().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub enabled: bool,
    pub interval_seconds: u64,
    pub history_entries: usize,
}

pub async fn handle_monitor_status(State(state): State<AppState>) -> Response {
    let history_entries = match state.store.history_len() {
        Ok(n) => n,
        Err(e) => return store_error(e),
    };

    Json(MonitorStatus {
        running: state.monitor.is_running().await,
        enabled: state.monitor.is_enabled(),
        interval_seconds: state.monitor.interval().as_secs(),
        history_entries,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AdhocCheckRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<CheckFormat>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Run a one-off check against any URL without storing the result.
pub async fn handle_adhoc_check(
    State(state): State<AppState>,
    Json(req): Json<AdhocCheckRequest>,
) -> Response {
    let (Some(url), Some(format)) = (req.url.filter(|u| !u.is_empty()), req.format) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields: url, format");
    };

    let result: CheckResult = state
        .checker
        .probe(
            &url,
            format,
            req.timeout.unwrap_or(DEFAULT_ADHOC_TIMEOUT_MS),
            &req.headers.unwrap_or_default(),
        )
        .await;

    Json(result).into_response()
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match state.store.endpoint_history(&id, limit) {
        Ok(history) => Json(history).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_get_stats(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.endpoint_history(&id, DEFAULT_HISTORY_LIMIT) {
        Ok(history) => Json(HistoryStats::from_entries(&history)).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DashboardSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    /// Includes endpoints that were never checked.
    pub unknown: usize,
}

pub async fn handle_summary(State(state): State<AppState>) -> Response {
    let endpoints = match state.store.list_endpoints() {
        Ok(e) => e,
        Err(e) => return store_error(e),
    };

    let mut summary = DashboardSummary {
        total: endpoints.len(),
        ..Default::default()
    };
    for endpoint in &endpoints {
        match endpoint.last_check.as_ref().map(|c| c.status) {
            Some(HealthStatus::Healthy) => summary.healthy += 1,
            Some(HealthStatus::Degraded) => summary.degraded += 1,
            Some(HealthStatus::Unhealthy) => summary.unhealthy += 1,
            Some(HealthStatus::Unknown) | None => summary.unknown += 1,
        }
    }

    Json(summary).into_response()
}

// ============================================================================
// API: Settings
// ============================================================================

pub async fn handle_get_settings(State(state): State<AppState>) -> Response {
    match state.store.settings() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    match state.store.update_settings(&update) {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Public status
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEndpoint {
    pub id: String,
    pub name: String,
    pub url: String,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: CheckFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<CheckResult>,
}

pub async fn handle_public_endpoints(State(state): State<AppState>) -> Response {
    match state.store.list_endpoints() {
        Ok(endpoints) => {
            let public: Vec<PublicEndpoint> = endpoints
                .into_iter()
                .filter(|e| e.public_visible)
                .map(|e| PublicEndpoint {
                    id: e.id,
                    name: e.name,
                    url: e.url,
                    environment: e.environment,
                    group: e.group,
                    description: e.description,
                    format: e.format,
                    last_check: e.last_check,
                })
                .collect();
            Json(public).into_response()
        }
        Err(e) => store_error(e),
    }
}
