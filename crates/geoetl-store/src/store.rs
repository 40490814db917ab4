use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geoetl_core::types::{DataSource, ExternalSync, Pipeline, RunSession};
use geoetl_core::BoxError;
use geoetl_pipeline::{SessionSink, SourceLookup};
use geoetl_sync::{CoordinatePayload, IngestReceipt, PayloadIngest, SyncStore};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::db::{self, DATA_SOURCE_COLUMNS, PIPELINE_COLUMNS, SYNC_COLUMNS};
use crate::error::{Result, StoreError};

/// Fields needed to create a data source. The password must already be sealed.
#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub owner_id: i64,
    pub name: String,
    pub provider: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct NewSync {
    pub owner_id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    pub auth_header_key: String,
    /// Already sealed, or empty.
    pub auth_header_value: String,
    pub cron_schedule: String,
}

/// SQLite-backed persistence for every entity the daemon schedules.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, creating its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        info!(path = %path.display(), "opened store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // -------------------------------------------------------------------------
    // Data sources
    // -------------------------------------------------------------------------

    #[instrument(skip(self, source), fields(owner_id = source.owner_id, name = %source.name))]
    pub fn insert_data_source(&self, source: &NewDataSource) -> Result<DataSource> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO data_sources
                 (owner_id, name, provider, host, port, database_name, username, password, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                source.owner_id,
                source.name,
                source.provider,
                source.host,
                source.port,
                source.database,
                source.username,
                source.password,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, "data source created");
        Ok(DataSource {
            id,
            owner_id: source.owner_id,
            name: source.name.clone(),
            provider: source.provider.clone(),
            host: source.host.clone(),
            port: source.port,
            database: source.database.clone(),
            username: source.username.clone(),
            password: source.password.clone(),
        })
    }

    /// Fetch a data source only if it belongs to `owner_id`.
    pub fn get_data_source(&self, id: i64, owner_id: i64) -> Result<Option<DataSource>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {DATA_SOURCE_COLUMNS} FROM data_sources WHERE id = ?1 AND owner_id = ?2"
        );
        let source = conn
            .query_row(&sql, params![id, owner_id], db::row_to_data_source)
            .optional()?;
        Ok(source)
    }

    // -------------------------------------------------------------------------
    // Pipelines
    // -------------------------------------------------------------------------

    #[instrument(skip(self, config))]
    pub fn insert_pipeline(
        &self,
        owner_id: i64,
        data_source_id: i64,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Pipeline> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pipelines (owner_id, data_source_id, name, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![owner_id, data_source_id, name, serde_json::to_string(config)?, now],
        )?;
        Ok(Pipeline {
            id: conn.last_insert_rowid(),
            owner_id,
            data_source_id,
            name: name.to_string(),
            config: config.clone(),
        })
    }

    /// Replace a pipeline's config document. Returns false when no row matched.
    pub fn update_pipeline_config(&self, id: i64, config: &serde_json::Value) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE pipelines SET config = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(config)?, Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = ?1");
        let raw = conn
            .query_row(&sql, params![id], db::row_to_pipeline_raw)
            .optional()?;
        raw.map(db::pipeline_from_raw)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Every pipeline across all owners, used to rebuild the schedule at boot.
    pub fn list_all_pipelines(&self) -> Result<Vec<Pipeline>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PIPELINE_COLUMNS} FROM pipelines ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], db::row_to_pipeline_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|raw| db::pipeline_from_raw(raw).map_err(StoreError::from))
            .collect()
    }

    pub fn delete_pipeline(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM pipelines WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // -------------------------------------------------------------------------
    // External syncs
    // -------------------------------------------------------------------------

    pub fn insert_sync(&self, sync: &NewSync) -> Result<ExternalSync> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO erp_integrations
                 (owner_id, name, url, method, auth_header_key, auth_header_value,
                  cron_schedule, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sync.owner_id,
                sync.name,
                sync.url,
                sync.method,
                sync.auth_header_key,
                sync.auth_header_value,
                sync.cron_schedule,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(ExternalSync {
            id: conn.last_insert_rowid(),
            owner_id: sync.owner_id,
            name: sync.name.clone(),
            url: sync.url.clone(),
            method: sync.method.clone(),
            auth_header_key: sync.auth_header_key.clone(),
            auth_header_value: sync.auth_header_value.clone(),
            cron_schedule: sync.cron_schedule.clone(),
            last_sync_at: None,
        })
    }

    pub fn get_sync(&self, id: i64) -> Result<Option<ExternalSync>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SYNC_COLUMNS} FROM erp_integrations WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], db::row_to_sync).optional()?)
    }

    pub fn list_all_syncs(&self) -> Result<Vec<ExternalSync>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SYNC_COLUMNS} FROM erp_integrations ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let syncs = stmt
            .query_map([], db::row_to_sync)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(syncs)
    }

    pub fn update_last_sync(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE erp_integrations SET last_sync_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Run sessions
    // -------------------------------------------------------------------------

    pub fn insert_run_session(&self, session: &RunSession) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO comparison_sessions
                 (owner_id, total_count, accurate_count, fairly_count, inaccurate_count,
                  error_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.owner_id,
                session.total_count as i64,
                session.accurate_count as i64,
                session.fairly_count as i64,
                session.inaccurate_count as i64,
                session.error_count as i64,
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Sessions for one owner, newest first.
    pub fn list_run_sessions(&self, owner_id: i64, limit: u32) -> Result<Vec<RunSession>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT owner_id, total_count, accurate_count, fairly_count, inaccurate_count,
                    error_count, created_at
             FROM comparison_sessions
             WHERE owner_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let sessions = stmt
            .query_map(params![owner_id, limit], db::row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // -------------------------------------------------------------------------
    // Sync points
    // -------------------------------------------------------------------------

    /// Store every point of a payload in one transaction.
    pub fn insert_points(&self, owner_id: i64, payload: &CoordinatePayload) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let received_at = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sync_points
                     (owner_id, batch_id, latitude, longitude, reported_at, metadata, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for point in &payload.points {
                stmt.execute(params![
                    owner_id,
                    payload.batch_id,
                    point.latitude,
                    point.longitude,
                    point.timestamp,
                    serde_json::to_string(&point.metadata)?,
                    received_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(payload.points.len())
    }

    pub fn count_points(&self, batch_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM sync_points WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?)
    }
}

// -----------------------------------------------------------------------------
// Collaborator seams
// -----------------------------------------------------------------------------

#[async_trait]
impl SourceLookup for SqliteStore {
    async fn data_source(
        &self,
        id: i64,
        owner_id: i64,
    ) -> std::result::Result<Option<DataSource>, BoxError> {
        Ok(self.get_data_source(id, owner_id)?)
    }
}

#[async_trait]
impl SessionSink for SqliteStore {
    async fn save_run_session(&self, session: &RunSession) -> std::result::Result<(), BoxError> {
        let id = self.insert_run_session(session)?;
        debug!(id, owner_id = session.owner_id, total = session.total_count, "run session saved");
        Ok(())
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn find_sync(&self, id: i64) -> std::result::Result<Option<ExternalSync>, BoxError> {
        Ok(self.get_sync(id)?)
    }

    async fn record_sync_time(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> std::result::Result<(), BoxError> {
        Ok(self.update_last_sync(id, at)?)
    }
}

#[async_trait]
impl PayloadIngest for SqliteStore {
    async fn ingest(
        &self,
        owner_id: i64,
        payload: &CoordinatePayload,
    ) -> std::result::Result<IngestReceipt, BoxError> {
        let accepted = self.insert_points(owner_id, payload)?;
        Ok(IngestReceipt {
            batch_id: payload.batch_id.clone(),
            accepted,
        })
    }
}
