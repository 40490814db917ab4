use chrono::{DateTime, Utc};
use geoetl_core::types::{DataSource, ExternalSync, Pipeline, RunSession};
use rusqlite::Connection;

/// Initialise every table. Idempotent, safe on each startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS data_sources (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id      INTEGER NOT NULL,
            name          TEXT    NOT NULL,
            provider      TEXT    NOT NULL,   -- postgresql | postgres | mysql
            host          TEXT    NOT NULL,
            port          INTEGER NOT NULL,
            database_name TEXT    NOT NULL,
            username      TEXT    NOT NULL,
            password      TEXT    NOT NULL,   -- hex(nonce || AES-GCM seal)
            created_at    TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipelines (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id       INTEGER NOT NULL,
            data_source_id INTEGER NOT NULL REFERENCES data_sources (id) ON DELETE CASCADE,
            name           TEXT    NOT NULL,
            config         TEXT    NOT NULL,  -- JSON document
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS erp_integrations (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id          INTEGER NOT NULL,
            name              TEXT    NOT NULL,
            url               TEXT    NOT NULL,
            method            TEXT    NOT NULL DEFAULT 'GET',
            auth_header_key   TEXT    NOT NULL DEFAULT '',
            auth_header_value TEXT    NOT NULL DEFAULT '',
            cron_schedule     TEXT    NOT NULL DEFAULT '',
            last_sync_at      TEXT,
            created_at        TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comparison_sessions (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id         INTEGER NOT NULL,
            total_count      INTEGER NOT NULL,
            accurate_count   INTEGER NOT NULL,
            fairly_count     INTEGER NOT NULL,
            inaccurate_count INTEGER NOT NULL,
            error_count      INTEGER NOT NULL,
            created_at       TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_points (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id    INTEGER NOT NULL,
            batch_id    TEXT    NOT NULL,
            latitude    REAL    NOT NULL,
            longitude   REAL    NOT NULL,
            reported_at TEXT,
            metadata    TEXT    NOT NULL DEFAULT '{}',
            received_at TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pipelines_owner ON pipelines (owner_id);
        CREATE INDEX IF NOT EXISTS idx_sync_points_batch ON sync_points (batch_id);
        ",
    )
}

pub(crate) const DATA_SOURCE_COLUMNS: &str =
    "id, owner_id, name, provider, host, port, database_name, username, password";

pub(crate) fn row_to_data_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<DataSource> {
    Ok(DataSource {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        provider: row.get(3)?,
        host: row.get(4)?,
        port: row.get(5)?,
        database: row.get(6)?,
        username: row.get(7)?,
        password: row.get(8)?,
    })
}

pub(crate) const PIPELINE_COLUMNS: &str = "id, owner_id, data_source_id, name, config";

/// Config is decoded separately so a corrupt document surfaces as a
/// serialization error instead of a SQLite one.
pub(crate) fn row_to_pipeline_raw(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, i64, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

pub(crate) fn pipeline_from_raw(
    (id, owner_id, data_source_id, name, config): (i64, i64, i64, String, String),
) -> serde_json::Result<Pipeline> {
    Ok(Pipeline {
        id,
        owner_id,
        data_source_id,
        name,
        config: serde_json::from_str(&config)?,
    })
}

pub(crate) const SYNC_COLUMNS: &str = "id, owner_id, name, url, method, auth_header_key, \
                                       auth_header_value, cron_schedule, last_sync_at";

pub(crate) fn row_to_sync(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExternalSync> {
    Ok(ExternalSync {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        method: row.get(4)?,
        auth_header_key: row.get(5)?,
        auth_header_value: row.get(6)?,
        cron_schedule: row.get(7)?,
        last_sync_at: row.get::<_, Option<String>>(8)?.as_deref().and_then(parse_time),
    })
}

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunSession> {
    let created_at: String = row.get(6)?;
    Ok(RunSession {
        owner_id: row.get(0)?,
        total_count: row.get::<_, i64>(1)? as u64,
        accurate_count: row.get::<_, i64>(2)? as u64,
        fairly_count: row.get::<_, i64>(3)? as u64,
        inaccurate_count: row.get::<_, i64>(4)? as u64,
        error_count: row.get::<_, i64>(5)? as u64,
        created_at: parse_time(&created_at).unwrap_or_default(),
    })
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
