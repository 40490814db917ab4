//! Credential resolution: encrypted descriptor in, live pooled connection out.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use geoetl_core::config::ExtractConfig;
use geoetl_core::crypto;
use geoetl_core::types::DataSource;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::{BigDecimal, JsonValue, Uuid};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::dialect::{ConnectParams, Dialect};
use crate::error::{PipelineError, Result};
use crate::value::{GenericRow, SqlValue};

/// Decrypts stored secrets and opens pooled connections. Never retries.
pub struct CredentialResolver {
    aes_key: String,
    max_connections: u32,
    connect_timeout: Duration,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    pub fn new(aes_key: impl Into<String>, extract: &ExtractConfig) -> Self {
        Self {
            aes_key: aes_key.into(),
            max_connections: extract.max_connections.max(1),
            connect_timeout: Duration::from_secs(extract.connect_timeout_secs),
        }
    }

    /// Pick the dialect and decrypt the password. The plaintext lives only in
    /// the returned params.
    pub fn connect_params(&self, source: &DataSource) -> Result<(Dialect, ConnectParams)> {
        let dialect = Dialect::from_provider(&source.provider)?;
        let password = crypto::decrypt(&source.password, &self.aes_key).map_err(|e| {
            warn!(source_id = source.id, code = e.code(), "credential decrypt failed");
            PipelineError::Connection("failed to decrypt source credentials".to_string())
        })?;
        Ok((
            dialect,
            ConnectParams {
                host: source.host.clone(),
                port: source.port,
                database: source.database.clone(),
                username: source.username.clone(),
                password,
            },
        ))
    }

    /// Open a pool against `source` and ping it once before handing it back.
    pub async fn resolve(&self, source: &DataSource) -> Result<SourcePool> {
        let (dialect, params) = self.connect_params(source)?;
        let dsn = dialect.build_dsn(&params)?;
        drop(params);

        let pool = match dialect {
            Dialect::Postgres => SourcePool::Postgres(
                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(self.connect_timeout)
                    .connect(&dsn)
                    .await
                    .map_err(connection_error)?,
            ),
            Dialect::MySql => SourcePool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(self.connect_timeout)
                    .connect(&dsn)
                    .await
                    .map_err(connection_error)?,
            ),
        };

        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(e);
        }
        info!(source_id = source.id, %dialect, host = %source.host, "source connection ready");
        Ok(pool)
    }

    /// Resolve, ping, then drop the pool again.
    pub async fn test_connection(&self, source: &DataSource) -> Result<()> {
        let pool = self.resolve(source).await?;
        pool.close().await;
        Ok(())
    }
}

fn connection_error(e: sqlx::Error) -> PipelineError {
    PipelineError::Connection(e.to_string())
}

fn execution_error(e: sqlx::Error) -> PipelineError {
    PipelineError::Execution(e.to_string())
}

/// A live pool for one of the supported dialects.
#[derive(Debug, Clone)]
pub enum SourcePool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl SourcePool {
    pub async fn ping(&self) -> Result<()> {
        match self {
            SourcePool::Postgres(pool) => {
                let mut conn = pool.acquire().await.map_err(connection_error)?;
                conn.ping().await.map_err(connection_error)
            }
            SourcePool::MySql(pool) => {
                let mut conn = pool.acquire().await.map_err(connection_error)?;
                conn.ping().await.map_err(connection_error)
            }
        }
    }

    /// Run `sql` as a forward-only cursor. Rows are decoded one at a time.
    pub fn fetch_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<GenericRow>> {
        debug!("opening cursor");
        match self {
            SourcePool::Postgres(pool) => sqlx::query(sql)
                .fetch(pool)
                .map(|row| row.and_then(|r| decode_pg_row(&r)).map_err(execution_error))
                .boxed(),
            SourcePool::MySql(pool) => sqlx::query(sql)
                .fetch(pool)
                .map(|row| row.and_then(|r| decode_mysql_row(&r)).map_err(execution_error))
                .boxed(),
        }
    }

    pub async fn close(&self) {
        match self {
            SourcePool::Postgres(pool) => pool.close().await,
            SourcePool::MySql(pool) => pool.close().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_pg_row(row: &PgRow) -> std::result::Result<GenericRow, sqlx::Error> {
    let mut columns = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push((column.name().to_string(), decode_pg_value(row, idx)?));
    }
    Ok(GenericRow::new(columns))
}

/// How a column is read, chosen from the driver's type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    UnsignedInt,
    Float32,
    Float64,
    Decimal,
    Text,
    Bytes,
    Uuid,
    Json,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Interval,
    /// Anything else: read as text, then bytes, else logged and dropped.
    Other,
}

fn pg_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOL" => ColumnKind::Bool,
        "INT2" | "INT4" | "INT8" => ColumnKind::Int,
        "FLOAT4" => ColumnKind::Float32,
        "FLOAT8" => ColumnKind::Float64,
        "NUMERIC" => ColumnKind::Decimal,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => ColumnKind::Text,
        "BYTEA" => ColumnKind::Bytes,
        "UUID" => ColumnKind::Uuid,
        "JSON" | "JSONB" => ColumnKind::Json,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "INTERVAL" => ColumnKind::Interval,
        _ => ColumnKind::Other,
    }
}

fn mysql_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "BOOLEAN" => ColumnKind::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => ColumnKind::Int,
        unsigned if unsigned.ends_with("UNSIGNED") => ColumnKind::UnsignedInt,
        "FLOAT" => ColumnKind::Float32,
        "DOUBLE" => ColumnKind::Float64,
        "DECIMAL" => ColumnKind::Decimal,
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            ColumnKind::Text
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            ColumnKind::Bytes
        }
        "JSON" => ColumnKind::Json,
        "TIMESTAMP" => ColumnKind::TimestampTz,
        "DATETIME" => ColumnKind::Timestamp,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        _ => ColumnKind::Other,
    }
}

/// Render an interval the way Postgres prints it, e.g. `1 mon 2 days 03:04:05.5`.
fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    for (n, unit) in [(years, "year"), (months, "mon"), (days, "day")] {
        if n != 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{n} {unit}{plural}"));
        }
    }
    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let (secs, micros) = (total / 1_000_000, total % 1_000_000);
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        if micros != 0 {
            let frac = format!("{micros:06}");
            clock.push('.');
            clock.push_str(frac.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

fn unsigned_value(v: u64) -> SqlValue {
    i64::try_from(v)
        .map(SqlValue::Int)
        .unwrap_or(SqlValue::Float(v as f64))
}

/// Last resort for types without an explicit decoder.
fn fallback_value(
    text: std::result::Result<String, sqlx::Error>,
    bytes: impl FnOnce() -> std::result::Result<Vec<u8>, sqlx::Error>,
    column: &str,
    type_name: &str,
) -> SqlValue {
    if let Ok(s) = text {
        return SqlValue::Text(s);
    }
    match bytes() {
        Ok(b) => SqlValue::Bytes(b),
        Err(e) => {
            warn!(column, type_name, error = %e, "unsupported column type, value dropped");
            SqlValue::Null
        }
    }
}

fn decode_pg_value(row: &PgRow, idx: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }
    let column = row.column(idx);
    let type_name = column.type_info().name();
    let value = match pg_kind(type_name) {
        ColumnKind::Bool => SqlValue::Bool(row.try_get(idx)?),
        ColumnKind::Int | ColumnKind::UnsignedInt => match type_name {
            "INT2" => SqlValue::Int(row.try_get::<i16, _>(idx)?.into()),
            "INT4" => SqlValue::Int(row.try_get::<i32, _>(idx)?.into()),
            _ => SqlValue::Int(row.try_get(idx)?),
        },
        ColumnKind::Float32 => SqlValue::Float(row.try_get::<f32, _>(idx)?.into()),
        ColumnKind::Float64 => SqlValue::Float(row.try_get(idx)?),
        ColumnKind::Decimal => SqlValue::Text(row.try_get::<BigDecimal, _>(idx)?.to_string()),
        ColumnKind::Text => SqlValue::Text(row.try_get(idx)?),
        ColumnKind::Bytes => SqlValue::Bytes(row.try_get(idx)?),
        ColumnKind::Uuid => SqlValue::Text(row.try_get::<Uuid, _>(idx)?.to_string()),
        ColumnKind::Json => SqlValue::Text(row.try_get::<JsonValue, _>(idx)?.to_string()),
        ColumnKind::TimestampTz => {
            SqlValue::Text(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339())
        }
        ColumnKind::Timestamp => SqlValue::Text(row.try_get::<NaiveDateTime, _>(idx)?.to_string()),
        ColumnKind::Date => SqlValue::Text(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        ColumnKind::Time => SqlValue::Text(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        ColumnKind::Interval => {
            let interval: PgInterval = row.try_get(idx)?;
            SqlValue::Text(format_interval(
                interval.months,
                interval.days,
                interval.microseconds,
            ))
        }
        ColumnKind::Other => fallback_value(
            row.try_get::<String, _>(idx),
            || row.try_get::<Vec<u8>, _>(idx),
            column.name(),
            type_name,
        ),
    };
    Ok(value)
}

fn decode_mysql_row(row: &MySqlRow) -> std::result::Result<GenericRow, sqlx::Error> {
    let mut columns = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push((column.name().to_string(), decode_mysql_value(row, idx)?));
    }
    Ok(GenericRow::new(columns))
}

fn decode_mysql_value(row: &MySqlRow, idx: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(SqlValue::Null);
    }
    let column = row.column(idx);
    let type_name = column.type_info().name();
    let value = match mysql_kind(type_name) {
        ColumnKind::Bool => SqlValue::Bool(row.try_get(idx)?),
        ColumnKind::Int => SqlValue::Int(row.try_get(idx)?),
        ColumnKind::UnsignedInt => unsigned_value(row.try_get(idx)?),
        ColumnKind::Float32 => SqlValue::Float(row.try_get::<f32, _>(idx)?.into()),
        ColumnKind::Float64 => SqlValue::Float(row.try_get(idx)?),
        ColumnKind::Decimal => SqlValue::Text(row.try_get::<BigDecimal, _>(idx)?.to_string()),
        // text columns with a binary collation arrive as bytes
        ColumnKind::Text => match row.try_get::<String, _>(idx) {
            Ok(s) => SqlValue::Text(s),
            Err(_) => SqlValue::Bytes(row.try_get(idx)?),
        },
        ColumnKind::Bytes => SqlValue::Bytes(row.try_get(idx)?),
        ColumnKind::Uuid => SqlValue::Text(row.try_get::<Uuid, _>(idx)?.to_string()),
        ColumnKind::Json => SqlValue::Text(row.try_get::<JsonValue, _>(idx)?.to_string()),
        ColumnKind::TimestampTz => {
            SqlValue::Text(row.try_get::<DateTime<Utc>, _>(idx)?.to_rfc3339())
        }
        ColumnKind::Timestamp => SqlValue::Text(row.try_get::<NaiveDateTime, _>(idx)?.to_string()),
        ColumnKind::Date => SqlValue::Text(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        // TIME can exceed 24h in MySQL; those values fall through to text
        ColumnKind::Time => match row.try_get::<NaiveTime, _>(idx) {
            Ok(t) => SqlValue::Text(t.to_string()),
            Err(_) => fallback_value(
                row.try_get::<String, _>(idx),
                || row.try_get::<Vec<u8>, _>(idx),
                column.name(),
                type_name,
            ),
        },
        ColumnKind::Interval | ColumnKind::Other => fallback_value(
            row.try_get::<String, _>(idx),
            || row.try_get::<Vec<u8>, _>(idx),
            column.name(),
            type_name,
        ),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoetl_core::config::ExtractConfig;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn source(provider: &str, password: String) -> DataSource {
        DataSource {
            id: 3,
            owner_id: 1,
            name: "crm".into(),
            provider: provider.into(),
            host: "127.0.0.1".into(),
            port: 5432,
            database: "crm".into(),
            username: "etl".into(),
            password,
        }
    }

    #[test]
    fn params_decrypt_password() {
        let resolver = CredentialResolver::new(KEY, &ExtractConfig::default());
        let sealed = crypto::encrypt("hunter2", KEY).unwrap();
        let (dialect, params) = resolver
            .connect_params(&source("postgresql", sealed))
            .unwrap();
        assert_eq!(dialect, Dialect::Postgres);
        assert_eq!(params.password, "hunter2");
    }

    #[test]
    fn undecryptable_secret_is_connection_error() {
        let resolver = CredentialResolver::new(KEY, &ExtractConfig::default());
        let err = resolver
            .connect_params(&source("mysql", "zz-not-hex".into()))
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");
        assert!(err.to_string().contains("decrypt"));
    }

    #[tokio::test]
    async fn unsupported_provider_fails_before_dialing() {
        let resolver = CredentialResolver::new(KEY, &ExtractConfig::default());
        let sealed = crypto::encrypt("pw", KEY).unwrap();
        let err = resolver.resolve(&source("oracle", sealed)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Connection(_)));
    }

    #[test]
    fn postgres_textual_types_have_decoders() {
        assert_eq!(pg_kind("UUID"), ColumnKind::Uuid);
        assert_eq!(pg_kind("JSON"), ColumnKind::Json);
        assert_eq!(pg_kind("JSONB"), ColumnKind::Json);
        assert_eq!(pg_kind("TIME"), ColumnKind::Time);
        assert_eq!(pg_kind("INTERVAL"), ColumnKind::Interval);
        assert_eq!(pg_kind("VARCHAR"), ColumnKind::Text);
        assert_eq!(pg_kind("NUMERIC"), ColumnKind::Decimal);
        assert_eq!(pg_kind("TSVECTOR"), ColumnKind::Other);
    }

    #[test]
    fn mysql_types_have_decoders() {
        assert_eq!(mysql_kind("JSON"), ColumnKind::Json);
        assert_eq!(mysql_kind("TIME"), ColumnKind::Time);
        assert_eq!(mysql_kind("BIGINT UNSIGNED"), ColumnKind::UnsignedInt);
        assert_eq!(mysql_kind("LONGTEXT"), ColumnKind::Text);
        assert_eq!(mysql_kind("VARBINARY"), ColumnKind::Bytes);
        assert_eq!(mysql_kind("GEOMETRY"), ColumnKind::Other);
    }

    #[test]
    fn uuid_and_json_render_as_text() {
        let id = Uuid::parse_str("6f1c2a0e-8d3b-4b7a-9c55-0a1b2c3d4e5f").unwrap();
        let row = GenericRow::new(vec![
            ("id".into(), SqlValue::Text(id.to_string())),
            ("full_address".into(), SqlValue::Text("Jl. Sudirman 1".into())),
            ("latitude".into(), SqlValue::Text("-6.2".into())),
            ("longitude".into(), SqlValue::Text("abc".into())),
        ]);
        let record = row.to_canonical();
        assert_eq!(record.id, "6f1c2a0e-8d3b-4b7a-9c55-0a1b2c3d4e5f");
        assert_eq!(record.latitude, -6.2);
        assert_eq!(record.longitude, 0.0);

        let tags: JsonValue = serde_json::json!({"zone": "A"});
        assert_eq!(tags.to_string(), r#"{"zone":"A"}"#);
    }

    #[test]
    fn intervals_render_like_postgres() {
        assert_eq!(format_interval(0, 0, 0), "00:00:00");
        assert_eq!(format_interval(0, 0, 3_600_000_000), "01:00:00");
        assert_eq!(format_interval(1, 2, 11_045_500_000), "1 mon 2 days 03:04:05.5");
        assert_eq!(format_interval(14, 1, 0), "1 year 2 mons 1 day");
        assert_eq!(format_interval(0, -1, -90_000_000), "-1 days -00:01:30");
    }

    #[test]
    fn unsupported_type_without_text_is_null() {
        let value = fallback_value(
            Err(sqlx::Error::RowNotFound),
            || Err(sqlx::Error::RowNotFound),
            "shape",
            "GEOMETRY",
        );
        assert_eq!(value, SqlValue::Null);

        let value = fallback_value(
            Err(sqlx::Error::RowNotFound),
            || Ok(b"POINT(1 2)".to_vec()),
            "shape",
            "GEOMETRY",
        );
        assert_eq!(value, SqlValue::Bytes(b"POINT(1 2)".to_vec()));
    }

    #[test]
    fn debug_hides_key() {
        let resolver = CredentialResolver::new(KEY, &ExtractConfig::default());
        assert!(!format!("{resolver:?}").contains(KEY));
    }
}
