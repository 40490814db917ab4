use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accuracy labels produced by the validation service.
pub const ACCURATE: &str = "accurate";
pub const FAIRLY_ACCURATE: &str = "fairly_accurate";
pub const INACCURATE: &str = "inaccurate";

/// A stored connection to an externally-owned relational database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// `postgresql` / `postgres` or `mysql`.
    pub provider: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Hex-encoded AES-256-GCM ciphertext. Never the plaintext.
    pub password: String,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<encrypted>")
            .finish()
    }
}

/// A saved pipeline. `config` is kept as an opaque document; it is parsed
/// into [`PipelineConfig`] or [`ScheduleConfig`] by whoever needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub owner_id: i64,
    pub data_source_id: i64,
    pub name: String,
    pub config: serde_json::Value,
}

impl Pipeline {
    /// Parse the extraction half of the config document.
    pub fn pipeline_config(&self) -> std::result::Result<PipelineConfig, serde_json::Error> {
        PipelineConfig::deserialize(&self.config)
    }

    /// Parse the scheduler half of the config document. Missing fields mean
    /// "not scheduled"; fields of the wrong type are an error.
    pub fn schedule_config(&self) -> std::result::Result<ScheduleConfig, serde_json::Error> {
        ScheduleConfig::deserialize(&self.config)
    }
}

/// Declarative description of one extraction query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub base_table: String,
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
    #[serde(default)]
    pub mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    /// `LEFT` or `INNER`; anything else is treated as `LEFT`.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub table: String,
    pub on_source: String,
    pub on_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub target_column: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    pub operator: String,
    pub value: String,
}

/// Scheduler-only fields carried in the same pipeline document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub cron_active: bool,
}

impl ScheduleConfig {
    /// The trimmed cron expression, if the pipeline should be scheduled at all.
    pub fn active_cron(&self) -> Option<&str> {
        if !self.cron_active {
            return None;
        }
        self.cron
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// The fixed four-field shape every pipeline must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    pub full_address: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Outcome of validating one canonical record against a geocoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: String,
    pub system_address: String,
    #[serde(default)]
    pub geo_lat: f64,
    #[serde(default)]
    pub geo_lng: f64,
    pub field_lat: f64,
    pub field_lng: f64,
    #[serde(default)]
    pub distance_km: f64,
    #[serde(default)]
    pub accuracy_level: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    /// Result for a record that could not be validated at all.
    pub fn failed(record: &CanonicalRecord, error: impl Into<String>) -> Self {
        Self {
            id: record.id.clone(),
            system_address: record.full_address.clone(),
            field_lat: record.latitude,
            field_lng: record.longitude,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Aggregate statistics for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSession {
    pub owner_id: i64,
    pub total_count: u64,
    pub accurate_count: u64,
    pub fairly_count: u64,
    pub inaccurate_count: u64,
    pub error_count: u64,
    pub created_at: DateTime<Utc>,
}

impl RunSession {
    pub fn new(owner_id: i64) -> Self {
        Self {
            owner_id,
            total_count: 0,
            accurate_count: 0,
            fairly_count: 0,
            inaccurate_count: 0,
            error_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Fold one validation result into the bucket counts.
    pub fn record(&mut self, result: &ValidationResult) {
        self.total_count += 1;
        if result.error.is_some() {
            self.error_count += 1;
            return;
        }
        match result.accuracy_level.as_str() {
            ACCURATE => self.accurate_count += 1,
            FAIRLY_ACCURATE => self.fairly_count += 1,
            INACCURATE => self.inaccurate_count += 1,
            _ => self.error_count += 1,
        }
    }
}

/// An external HTTP endpoint polled on a cron schedule for coordinates.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExternalSync {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub url: String,
    /// `GET` or `POST`.
    pub method: String,
    #[serde(default)]
    pub auth_header_key: String,
    /// Hex-encoded AES-256-GCM ciphertext, may be empty.
    #[serde(default)]
    pub auth_header_value: String,
    #[serde(default)]
    pub cron_schedule: String,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl ExternalSync {
    /// A sync is scheduled whenever it carries a cron expression.
    pub fn active_cron(&self) -> Option<&str> {
        let cron = self.cron_schedule.trim();
        (!cron.is_empty()).then_some(cron)
    }
}

impl std::fmt::Debug for ExternalSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalSync")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("auth_header_key", &self.auth_header_key)
            .field("cron_schedule", &self.cron_schedule)
            .field("last_sync_at", &self.last_sync_at)
            .finish_non_exhaustive()
    }
}
