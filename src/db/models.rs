//! Database model types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum per-endpoint check interval accepted at creation.
pub const MIN_CHECK_INTERVAL_SECONDS: u64 = 10;
/// Longest per-endpoint or global check interval accepted (one day).
pub const MAX_CHECK_INTERVAL_SECONDS: u64 = 86_400;
/// Minimum per-endpoint timeout accepted at creation.
pub const MIN_TIMEOUT_MS: u64 = 1000;

/// Expected response contract of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckFormat {
    /// JSON document with a `status` field and an optional dependency list.
    #[serde(rename = "HealthJson", alias = "StructuredJSON")]
    StructuredJson,
    /// Plain text body that must read `ok`.
    #[serde(rename = "OkText", alias = "PlainOkText")]
    PlainOkText,
}

impl CheckFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckFormat::StructuredJson => "HealthJson",
            CheckFormat::PlainOkText => "OkText",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HealthJson" | "StructuredJSON" => Some(CheckFormat::StructuredJson),
            "OkText" | "PlainOkText" => Some(CheckFormat::PlainOkText),
            _ => None,
        }
    }
}

/// Normalized health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Unknown => "Unknown",
        }
    }

    /// Case-insensitive parse of a reported status; anything unrecognized is `Unknown`.
    pub fn from_reported(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment label. Opaque to the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
    QA,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "Production",
            Environment::Staging => "Staging",
            Environment::Development => "Development",
            Environment::QA => "QA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Production" => Some(Environment::Production),
            "Staging" => Some(Environment::Staging),
            "Development" => Some(Environment::Development),
            "QA" => Some(Environment::QA),
            _ => None,
        }
    }
}

/// A sub-component health reported inside a structured JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDependency {
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of one check attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: HealthStatus,
    pub latency_ms: u64,
    /// Completion time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<HealthDependency>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn unhealthy(error: impl Into<String>, latency_ms: u64, timestamp: i64) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms,
            timestamp,
            dependencies: None,
            error: Some(error.into()),
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub url: String,
    pub format: CheckFormat,
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub check_interval_seconds: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub public_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<CheckResult>,
}

/// User-supplied endpoint definition, used for both create and replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInput {
    pub name: String,
    pub url: String,
    pub format: CheckFormat,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_check_interval", alias = "checkInterval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub public_visible: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_check_interval() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
impl EndpointInput {
    pub fn new(name: &str, url: &str, format: CheckFormat) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
            environment: Environment::default(),
            group: None,
            description: None,
            check_interval_seconds: default_check_interval(),
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
            public_visible: false,
            webhook_url: None,
        }
    }
}

/// One row of the append-only check log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub endpoint_id: String,
    pub timestamp: i64,
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn from_result(endpoint_id: &str, result: &CheckResult) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            timestamp: result.timestamp,
            status: result.status,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "system" => Some(Theme::System),
            _ => None,
        }
    }
}

/// Process-wide user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub auto_refresh_interval_seconds: u64,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
    pub history_retention_days: u32,
    pub theme: Theme,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_refresh_interval_seconds: 60,
            notifications_enabled: true,
            sound_enabled: false,
            history_retention_days: 30,
            theme: Theme::System,
        }
    }
}

/// Partial settings update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub auto_refresh_interval_seconds: Option<u64>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub sound_enabled: Option<bool>,
    #[serde(default)]
    pub history_retention_days: Option<u32>,
    #[serde(default)]
    pub theme: Option<Theme>,
}

impl AppSettings {
    pub fn merged(&self, update: &SettingsUpdate) -> Self {
        Self {
            auto_refresh_interval_seconds: update
                .auto_refresh_interval_seconds
                .unwrap_or(self.auto_refresh_interval_seconds),
            notifications_enabled: update.notifications_enabled.unwrap_or(self.notifications_enabled),
            sound_enabled: update.sound_enabled.unwrap_or(self.sound_enabled),
            history_retention_days: update.history_retention_days.unwrap_or(self.history_retention_days),
            theme: update.theme.unwrap_or(self.theme),
        }
    }
}
