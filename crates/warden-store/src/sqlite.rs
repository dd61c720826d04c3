//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use warden_util::{AppId, DAY_KEY_FORMAT};

use crate::{AuditEvent, AuditEventType, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Foreground time per app and local calendar day
            CREATE TABLE IF NOT EXISTS app_usage (
                app_id TEXT NOT NULL,
                day TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (app_id, day)
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_app_usage_day ON app_usage(day);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn day_string(day: NaiveDate) -> String {
    day.format(DAY_KEY_FORMAT).to_string()
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| warden_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn get_usage(&self, app_id: &AppId, day: NaiveDate) -> StoreResult<Duration> {
        let conn = self.conn()?;

        let ms: Option<i64> = conn
            .query_row(
                "SELECT duration_ms FROM app_usage WHERE app_id = ? AND day = ?",
                params![app_id.as_str(), day_string(day)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Duration::from_millis(ms.unwrap_or(0).max(0) as u64))
    }

    fn add_usage(&self, app_id: &AppId, day: NaiveDate, duration: Duration) -> StoreResult<()> {
        if duration.is_zero() {
            return Ok(());
        }

        let conn = self.conn()?;
        let day_str = day_string(day);
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);

        conn.execute(
            r#"
            INSERT INTO app_usage (app_id, day, duration_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(app_id, day)
            DO UPDATE SET duration_ms = duration_ms + excluded.duration_ms
            "#,
            params![app_id.as_str(), day_str, ms],
        )?;

        debug!(app_id = %app_id, day = %day_str, added_ms = ms, "Usage added");
        Ok(())
    }

    fn usage_for_day(&self, day: NaiveDate) -> StoreResult<Vec<(AppId, Duration)>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT app_id, duration_ms FROM app_usage WHERE day = ? ORDER BY app_id",
        )?;

        let rows = stmt.query_map([day_string(day)], |row| {
            let app_id: String = row.get(0)?;
            let ms: i64 = row.get(1)?;
            Ok((app_id, ms))
        })?;

        let mut usage = Vec::new();
        for row in rows {
            let (app_id, ms) = row?;
            usage.push((AppId::new(app_id), Duration::from_millis(ms.max(0) as u64)));
        }

        Ok(usage)
    }

    fn prune_usage_before(&self, day: NaiveDate) -> StoreResult<usize> {
        let conn = self.conn()?;
        // Day keys sort lexically in date order
        let removed = conn.execute("DELETE FROM app_usage WHERE day < ?", [day_string(day)])?;

        if removed > 0 {
            debug!(before = %day_string(day), removed, "Pruned old usage rows");
        }
        Ok(removed)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
