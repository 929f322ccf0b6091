//! SQLite database store implementation.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row, Transaction};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;

use super::models::*;
use crate::clock::{Clock, SystemClock};

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Default cap on retained history entries.
pub const DEFAULT_HISTORY_MAX: usize = 1000;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const ENDPOINT_COLUMNS: &str = "id, name, url, format, environment, group_name, description, \
     check_interval_seconds, timeout_ms, headers, public_visible, webhook_url, last_check, \
     created_at, updated_at";

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
}

/// Change notifications published by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    EndpointAdded(String),
    EndpointUpdated(String),
    EndpointDeleted(String),
    CheckRecorded(String),
    SettingsChanged(AppSettings),
}

/// Thread-safe database store holding endpoints, check history and settings.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    events: broadcast::Sender<StoreEvent>,
    clock: Arc<dyn Clock>,
    history_max: usize,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        let (events, _) = broadcast::channel(64);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            events,
            clock: Arc::new(SystemClock),
            history_max: DEFAULT_HISTORY_MAX,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_history_max(mut self, max: usize) -> Self {
        self.history_max = max.max(1);
        self
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // --- Endpoint CRUD ---

    /// Add a new endpoint and return it with its assigned id.
    pub fn add_endpoint(&self, input: EndpointInput) -> Result<Endpoint, StoreError> {
        validate_endpoint(&input)?;

        let now = self.clock.now_millis();
        let endpoint = Endpoint {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            url: input.url,
            format: input.format,
            environment: input.environment,
            group: input.group,
            description: input.description,
            check_interval_seconds: input.check_interval_seconds,
            timeout_ms: input.timeout_ms,
            headers: input.headers,
            public_visible: input.public_visible,
            webhook_url: input.webhook_url,
            created_at: now,
            updated_at: now,
            last_check: None,
        };

        let headers = serde_json::to_string(&endpoint.headers)?;
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO endpoints (id, name, url, format, environment, group_name, description, \
                 check_interval_seconds, timeout_ms, headers, public_visible, webhook_url, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    endpoint.id,
                    endpoint.name,
                    endpoint.url,
                    endpoint.format.as_str(),
                    endpoint.environment.as_str(),
                    endpoint.group,
                    endpoint.description,
                    endpoint.check_interval_seconds as i64,
                    endpoint.timeout_ms as i64,
                    headers,
                    endpoint.public_visible,
                    endpoint.webhook_url,
                    endpoint.created_at,
                    endpoint.updated_at,
                ],
            )?;
        }

        self.publish(StoreEvent::EndpointAdded(endpoint.id.clone()));
        Ok(endpoint)
    }

    /// Replace an endpoint's definition, keeping its id, creation time and last check.
    pub fn update_endpoint(&self, id: &str, input: EndpointInput) -> Result<Endpoint, StoreError> {
        validate_endpoint(&input)?;

        let headers = serde_json::to_string(&input.headers)?;
        let now = self.clock.now_millis();
        let changed = {
            let conn = self.conn();
            conn.execute(
                "UPDATE endpoints SET name=?1, url=?2, format=?3, environment=?4, group_name=?5, description=?6, \
                 check_interval_seconds=?7, timeout_ms=?8, headers=?9, public_visible=?10, webhook_url=?11, \
                 updated_at=?12 WHERE id=?13",
                params![
                    input.name,
                    input.url,
                    input.format.as_str(),
                    input.environment.as_str(),
                    input.group,
                    input.description,
                    input.check_interval_seconds as i64,
                    input.timeout_ms as i64,
                    headers,
                    input.public_visible,
                    input.webhook_url,
                    now,
                    id,
                ],
            )?
        };

        if changed == 0 {
            return Err(StoreError::NotFound);
        }

        self.publish(StoreEvent::EndpointUpdated(id.to_string()));
        self.get_endpoint(id)?.ok_or(StoreError::NotFound)
    }

    /// Get all endpoints in creation order.
    pub fn list_endpoints(&self) -> Result<Vec<Endpoint>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM endpoints ORDER BY created_at ASC, rowid ASC",
            ENDPOINT_COLUMNS
        ))?;

        let endpoints = stmt
            .query_map([], endpoint_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(endpoints)
    }

    /// Get an endpoint by id.
    pub fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>, StoreError> {
        let conn = self.conn();
        let endpoint = conn
            .query_row(
                &format!("SELECT {} FROM endpoints WHERE id = ?1", ENDPOINT_COLUMNS),
                params![id],
                endpoint_from_row,
            )
            .optional()?;
        Ok(endpoint)
    }

    /// Delete an endpoint and its history.
    pub fn delete_endpoint(&self, id: &str) -> Result<(), StoreError> {
        let changed = {
            let conn = self.conn();
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM history WHERE endpoint_id = ?1", params![id])?;
            let changed = tx.execute("DELETE FROM endpoints WHERE id = ?1", params![id])?;
            tx.commit()?;
            changed
        };

        if changed == 0 {
            return Err(StoreError::NotFound);
        }

        self.publish(StoreEvent::EndpointDeleted(id.to_string()));
        Ok(())
    }

    /// Record a check result as the endpoint's `lastCheck`.
    ///
    /// Returns `false` without writing when the endpoint no longer exists or
    /// already holds a result with a later timestamp.
    pub fn upsert_check_result(&self, id: &str, result: &CheckResult) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(result)?;
        let now = self.clock.now_millis();
        let changed = {
            let conn = self.conn();
            conn.execute(
                "UPDATE endpoints SET last_check=?2, last_check_at=?3, updated_at=?4 \
                 WHERE id=?1 AND (last_check_at IS NULL OR last_check_at <= ?3)",
                params![id, payload, result.timestamp, now],
            )?
        };

        if changed == 0 {
            return Ok(false);
        }
        self.publish(StoreEvent::CheckRecorded(id.to_string()));
        Ok(true)
    }

    // --- History ---

    /// Append a history entry, evicting the oldest entries beyond the cap.
    ///
    /// Entries for endpoints that no longer exist are dropped; returns
    /// whether the entry was written.
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<bool, StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let written = insert_history(&tx, entry, self.history_max)?;
        tx.commit()?;
        Ok(written)
    }

    /// Most recent `limit` entries for an endpoint, oldest first.
    pub fn endpoint_history(&self, endpoint_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT endpoint_id, timestamp, status, latency_ms, error FROM history \
             WHERE endpoint_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let mut entries = stmt
            .query_map(params![endpoint_id, limit as i64], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        entries.reverse();

        Ok(entries)
    }

    /// Number of retained history entries across all endpoints.
    pub fn history_len(&self) -> Result<usize, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Delete history entries older than `days` days. Returns the number removed.
    pub fn prune_history_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = self.clock.now_millis() - i64::from(days) * MS_PER_DAY;
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM history WHERE timestamp <= ?1", params![cutoff])?;
        Ok(removed)
    }

    // --- Settings ---

    /// Current settings, or the defaults when none were saved.
    pub fn settings(&self) -> Result<AppSettings, StoreError> {
        read_settings(&self.conn())
    }

    /// Merge a partial update into the current settings and persist it.
    ///
    /// The read, merge and write happen under one connection guard so
    /// concurrent partial updates do not overwrite each other.
    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<AppSettings, StoreError> {
        let settings = {
            let conn = self.conn();
            let tx = conn.unchecked_transaction()?;
            let settings = read_settings(&tx)?.merged(update);
            validate_settings(&settings)?;
            tx.execute(
                "INSERT INTO settings (id, auto_refresh_interval_seconds, notifications_enabled, sound_enabled, \
                 history_retention_days, theme) VALUES (1, ?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                 auto_refresh_interval_seconds=excluded.auto_refresh_interval_seconds, \
                 notifications_enabled=excluded.notifications_enabled, \
                 sound_enabled=excluded.sound_enabled, \
                 history_retention_days=excluded.history_retention_days, \
                 theme=excluded.theme",
                params![
                    settings.auto_refresh_interval_seconds as i64,
                    settings.notifications_enabled,
                    settings.sound_enabled,
                    settings.history_retention_days,
                    settings.theme.as_str(),
                ],
            )?;
            tx.commit()?;
            settings
        };

        self.publish(StoreEvent::SettingsChanged(settings.clone()));
        Ok(settings)
    }
}

fn read_settings(conn: &Connection) -> Result<AppSettings, StoreError> {
    let settings = conn
        .query_row(
            "SELECT auto_refresh_interval_seconds, notifications_enabled, sound_enabled, \
             history_retention_days, theme FROM settings WHERE id = 1",
            [],
            |row| {
                let theme: String = row.get(4)?;
                Ok(AppSettings {
                    auto_refresh_interval_seconds: row.get::<_, i64>(0)? as u64,
                    notifications_enabled: row.get(1)?,
                    sound_enabled: row.get(2)?,
                    history_retention_days: row.get(3)?,
                    theme: Theme::parse(&theme).ok_or_else(|| invalid_text(4, "theme", &theme))?,
                })
            },
        )
        .optional()?;
    Ok(settings.unwrap_or_default())
}

/// Insert a history row only while its endpoint exists, then evict beyond `max`.
fn insert_history(tx: &Transaction<'_>, entry: &HistoryEntry, max: usize) -> Result<bool, StoreError> {
    let written = tx.execute(
        "INSERT INTO history (endpoint_id, timestamp, status, latency_ms, error) \
         SELECT ?1, ?2, ?3, ?4, ?5 WHERE EXISTS (SELECT 1 FROM endpoints WHERE id = ?1)",
        params![
            entry.endpoint_id,
            entry.timestamp,
            entry.status.as_str(),
            entry.latency_ms as i64,
            entry.error,
        ],
    )?;
    if written == 0 {
        return Ok(false);
    }
    tx.execute(
        "DELETE FROM history WHERE id NOT IN (SELECT id FROM history ORDER BY id DESC LIMIT ?1)",
        params![max as i64],
    )?;
    Ok(true)
}

fn validate_endpoint(input: &EndpointInput) -> Result<(), StoreError> {
    if input.name.trim().is_empty() {
        return Err(StoreError::Validation("name: must not be empty".to_string()));
    }
    if input.url.trim().is_empty() {
        return Err(StoreError::Validation("url: must not be empty".to_string()));
    }
    match reqwest::Url::parse(&input.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => {
            return Err(StoreError::Validation(format!("url: unsupported scheme {}", url.scheme())));
        }
        Err(e) => return Err(StoreError::Validation(format!("url: {}", e))),
    }
    if input.check_interval_seconds < MIN_CHECK_INTERVAL_SECONDS {
        return Err(StoreError::Validation(format!(
            "checkIntervalSeconds: must be at least {}",
            MIN_CHECK_INTERVAL_SECONDS
        )));
    }
    if input.check_interval_seconds > MAX_CHECK_INTERVAL_SECONDS {
        return Err(StoreError::Validation(format!(
            "checkIntervalSeconds: must be at most {}",
            MAX_CHECK_INTERVAL_SECONDS
        )));
    }
    if input.timeout_ms < MIN_TIMEOUT_MS {
        return Err(StoreError::Validation(format!(
            "timeoutMs: must be at least {}",
            MIN_TIMEOUT_MS
        )));
    }
    Ok(())
}

fn validate_settings(settings: &AppSettings) -> Result<(), StoreError> {
    if settings.auto_refresh_interval_seconds < MIN_CHECK_INTERVAL_SECONDS {
        return Err(StoreError::Validation(format!(
            "autoRefreshIntervalSeconds: must be at least {}",
            MIN_CHECK_INTERVAL_SECONDS
        )));
    }
    if settings.auto_refresh_interval_seconds > MAX_CHECK_INTERVAL_SECONDS {
        return Err(StoreError::Validation(format!(
            "autoRefreshIntervalSeconds: must be at most {}",
            MAX_CHECK_INTERVAL_SECONDS
        )));
    }
    if !(1..=365).contains(&settings.history_retention_days) {
        return Err(StoreError::Validation(
            "historyRetentionDays: must be between 1 and 365".to_string(),
        ));
    }
    Ok(())
}

fn invalid_text(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {} {:?}", what, value).into(),
    )
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqlResult<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn endpoint_from_row(row: &Row<'_>) -> SqlResult<Endpoint> {
    let format: String = row.get(3)?;
    let environment: String = row.get(4)?;
    let last_check: Option<String> = row.get(12)?;
    let last_check = match last_check {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };

    Ok(Endpoint {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        format: CheckFormat::parse(&format).ok_or_else(|| invalid_text(3, "format", &format))?,
        environment: Environment::parse(&environment)
            .ok_or_else(|| invalid_text(4, "environment", &environment))?,
        group: row.get(5)?,
        description: row.get(6)?,
        check_interval_seconds: row.get::<_, i64>(7)? as u64,
        timeout_ms: row.get::<_, i64>(8)? as u64,
        headers: json_column(row, 9)?,
        public_visible: row.get(10)?,
        webhook_url: row.get(11)?,
        last_check,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn history_from_row(row: &Row<'_>) -> SqlResult<HistoryEntry> {
    let status: String = row.get(2)?;
    Ok(HistoryEntry {
        endpoint_id: row.get(0)?,
        timestamp: row.get(1)?,
        status: HealthStatus::from_reported(&status),
        latency_ms: row.get::<_, i64>(3)? as u64,
        error: row.get(4)?,
    })
}
