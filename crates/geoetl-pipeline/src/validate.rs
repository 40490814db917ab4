use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geoetl_core::config::ValidationConfig;
use geoetl_core::types::{CanonicalRecord, ValidationResult};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::run::Validator;

/// Process-wide request pacing. Clone the `Arc`, never the throttle.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next: Mutex<Instant>,
}

impl Throttle {
    pub fn per_second(requests: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / requests.max(1),
            next: Mutex::new(Instant::now()),
        }
    }

    /// Wait for the next free slot. Callers queue on the lock in order.
    pub async fn acquire(&self) {
        let mut next = self.next.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = (*next).max(now) + self.interval;
    }
}

/// Validation collaborator reached over HTTP.
pub struct RemoteValidator {
    client: reqwest::Client,
    url: String,
    throttle: Arc<Throttle>,
}

impl RemoteValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        Self::with_throttle(
            config.url.clone(),
            Arc::new(Throttle::per_second(config.requests_per_sec)),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_throttle(url: String, throttle: Arc<Throttle>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("validation client: {e}")))?;
        Ok(Self {
            client,
            url,
            throttle,
        })
    }

    async fn call(
        &self,
        owner_id: i64,
        record: &CanonicalRecord,
    ) -> std::result::Result<ValidationResult, String> {
        self.throttle.acquire().await;
        let body = serde_json::json!({
            "owner_id": owner_id,
            "record": record,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(record_id = %record.id, "validation service timed out");
                    "validation service timed out".to_string()
                } else {
                    e.to_string()
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "validation service error");
            return Err(format!("validation service returned {status}"));
        }

        resp.json::<ValidationResult>()
            .await
            .map_err(|e| format!("invalid validation response: {e}"))
    }
}

#[async_trait]
impl Validator for RemoteValidator {
    async fn validate_single(&self, owner_id: i64, record: &CanonicalRecord) -> ValidationResult {
        debug!(record_id = %record.id, "validating record");
        self.call(owner_id, record)
            .await
            .unwrap_or_else(|e| ValidationResult::failed(record, e))
    }
}
