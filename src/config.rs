//! Configuration module for healthwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

use crate::db::DEFAULT_HISTORY_MAX;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "healthwatch.db")
    pub db_path: String,
    /// Bearer token required on non-public routes; open access when unset
    pub api_token: Option<String>,
    /// Maximum number of retained history entries (default: 1000)
    pub history_max: usize,
    /// User-Agent sent with outbound checks
    pub user_agent: String,
    /// Whether the monitor runs checks at all (default: true)
    pub checks_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "healthwatch.db".to_string(),
            api_token: None,
            history_max: DEFAULT_HISTORY_MAX,
            user_agent: concat!("healthwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            checks_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HEALTHWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `HEALTHWATCH_DB_PATH`: Database file path (default: "healthwatch.db")
    /// - `HEALTHWATCH_API_TOKEN`: API bearer token (default: unset)
    /// - `HEALTHWATCH_HISTORY_MAX`: history cap (default: 1000)
    /// - `HEALTHWATCH_USER_AGENT`: outbound User-Agent
    /// - `HEALTHWATCH_CHECKS_ENABLED`: `false` or `0` pauses all checks
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("HEALTHWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("HEALTHWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        cfg.api_token = lookup("HEALTHWATCH_API_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(max) = lookup("HEALTHWATCH_HISTORY_MAX")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|m| *m > 0)
        {
            cfg.history_max = max;
        }

        if let Some(agent) = lookup("HEALTHWATCH_USER_AGENT") {
            cfg.user_agent = agent;
        }

        if let Some(enabled) = lookup("HEALTHWATCH_CHECKS_ENABLED") {
            cfg.checks_enabled = !matches!(enabled.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no");
        }

        cfg
    }
}
