use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::crypto::AES_KEY_LEN;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PREVIEW_ROWS: usize = 10;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_VALIDATION_RPS: u32 = 1;
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 30;

/// Top-level config (geoetl.toml + GEOETL_* env overrides).
///
/// Nested keys use a double underscore: `GEOETL_EXTRACT__BATCH_SIZE=500`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoEtlConfig {
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// AES-256 key used for connection passwords and sync auth headers.
    /// Must be exactly 32 bytes.
    pub aes_key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("aes_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Knobs for the streaming extractor and the source connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
        }
    }
}

/// Remote validation endpoint. One throttle is shared by every run in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_validation_url")]
    pub url: String,
    #[serde(default = "default_validation_rps")]
    pub requests_per_sec: u32,
    /// Per-request deadline. A slow validator must not stall the run.
    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            url: default_validation_url(),
            requests_per_sec: DEFAULT_VALIDATION_RPS,
            timeout_secs: DEFAULT_VALIDATION_TIMEOUT_SECS,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.geoetl/geoetl.db", home)
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_preview_rows() -> usize {
    DEFAULT_PREVIEW_ROWS
}
fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}
fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_sync_timeout_secs() -> u64 {
    DEFAULT_SYNC_TIMEOUT_SECS
}
fn default_validation_url() -> String {
    "http://localhost:8080/internal/validate".to_string()
}
fn default_validation_rps() -> u32 {
    DEFAULT_VALIDATION_RPS
}
fn default_validation_timeout_secs() -> u64 {
    DEFAULT_VALIDATION_TIMEOUT_SECS
}

impl GeoEtlConfig {
    /// Load config from a TOML file with GEOETL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.geoetl/geoetl.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: GeoEtlConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GEOETL_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.security.aes_key.len() != AES_KEY_LEN {
            return Err(crate::error::CoreError::Config(format!(
                "security.aes_key must be exactly {AES_KEY_LEN} bytes (got {})",
                self.security.aes_key.len()
            )));
        }
        if self.extract.batch_size == 0 {
            return Err(crate::error::CoreError::Config(
                "extract.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.validation.requests_per_sec == 0 {
            return Err(crate::error::CoreError::Config(
                "validation.requests_per_sec must be greater than zero".to_string(),
            ));
        }
        if self.validation.timeout_secs == 0 {
            return Err(crate::error::CoreError::Config(
                "validation.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.geoetl/geoetl.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn load_applies_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "geoetl.toml",
                r#"
                [security]
                aes_key = "0123456789abcdef0123456789abcdef"
                "#,
            )?;
            let config = GeoEtlConfig::load(Some("geoetl.toml")).expect("config loads");
            assert_eq!(config.extract.batch_size, DEFAULT_BATCH_SIZE);
            assert_eq!(config.extract.preview_rows, DEFAULT_PREVIEW_ROWS);
            assert_eq!(config.sync.timeout_secs, DEFAULT_SYNC_TIMEOUT_SECS);
            assert_eq!(config.validation.requests_per_sec, 1);
            assert_eq!(config.validation.timeout_secs, DEFAULT_VALIDATION_TIMEOUT_SECS);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "geoetl.toml",
                r#"
                [security]
                aes_key = "0123456789abcdef0123456789abcdef"

                [extract]
                batch_size = 500
                "#,
            )?;
            jail.set_env("GEOETL_EXTRACT__PREVIEW_ROWS", "25");
            let config = GeoEtlConfig::load(Some("geoetl.toml")).expect("config loads");
            assert_eq!(config.extract.batch_size, 500);
            assert_eq!(config.extract.preview_rows, 25);
            Ok(())
        });
    }

    #[test]
    fn short_aes_key_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "geoetl.toml",
                r#"
                [security]
                aes_key = "too-short"
                "#,
            )?;
            let err = GeoEtlConfig::load(Some("geoetl.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            assert!(err.to_string().contains("32 bytes"));
            Ok(())
        });
    }

    #[test]
    fn debug_output_redacts_key() {
        let security = SecurityConfig {
            aes_key: "0123456789abcdef0123456789abcdef".to_string(),
        };
        let rendered = format!("{security:?}");
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
