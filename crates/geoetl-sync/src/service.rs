//! Pull coordinates from an external HTTP endpoint and hand them to ingest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geoetl_core::config::SyncConfig;
use geoetl_core::crypto;
use geoetl_core::error::BoxError;
use geoetl_core::types::ExternalSync;
use geoetl_scheduler::SyncJob;
use reqwest::header::ACCEPT;
use reqwest::Method;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};
use crate::payload::{CoordinatePayload, IngestReceipt};

/// Storage side of external syncs.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn find_sync(&self, id: i64) -> std::result::Result<Option<ExternalSync>, BoxError>;
    async fn record_sync_time(
        &self,
        id: i64,
        at: chrono::DateTime<Utc>,
    ) -> std::result::Result<(), BoxError>;
}

/// Receives pulled payloads, the same way pushed webhooks are received.
#[async_trait]
pub trait PayloadIngest: Send + Sync {
    async fn ingest(
        &self,
        owner_id: i64,
        payload: &CoordinatePayload,
    ) -> std::result::Result<IngestReceipt, BoxError>;
}

pub struct SyncService {
    client: reqwest::Client,
    aes_key: String,
    store: Arc<dyn SyncStore>,
    ingest: Arc<dyn PayloadIngest>,
}

impl SyncService {
    pub fn new(
        config: &SyncConfig,
        aes_key: impl Into<String>,
        store: Arc<dyn SyncStore>,
        ingest: Arc<dyn PayloadIngest>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Request(e.to_string()))?;
        Ok(Self {
            client,
            aes_key: aes_key.into(),
            store,
            ingest,
        })
    }

    /// Look the sync up by id, then run it.
    pub async fn execute_by_id(&self, id: i64) -> Result<IngestReceipt> {
        let sync = self
            .store
            .find_sync(id)
            .await
            .map_err(|e| SyncError::Store(e.to_string()))?
            .ok_or(SyncError::NotFound(id))?;
        self.execute(&sync).await
    }

    /// Run one sync against the given descriptor.
    pub async fn execute(&self, sync: &ExternalSync) -> Result<IngestReceipt> {
        info!(sync_id = sync.id, name = %sync.name, "running external sync");

        let method = Method::from_bytes(sync.method.trim().to_uppercase().as_bytes())
            .map_err(|_| SyncError::Request(format!("invalid method `{}`", sync.method)))?;

        let mut request = self
            .client
            .request(method, &sync.url)
            .header(ACCEPT, "application/json");
        if let Some(value) = self.auth_value(sync) {
            request = request.header(sync.auth_header_key.as_str(), value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SyncError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SyncError::Status(resp.status().as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SyncError::Request(format!("failed to read response body: {e}")))?;
        let mut payload: CoordinatePayload = serde_json::from_slice(&body).map_err(|e| {
            warn!(sync_id = sync.id, error = %e, "response is not a coordinate payload");
            SyncError::Decode(e.to_string())
        })?;

        if payload.batch_id.is_empty() {
            payload.batch_id = format!("ERP-SYNC-{}-{}", sync.id, Utc::now().timestamp());
        }
        if payload.points.is_empty() {
            return Err(SyncError::Rejected("empty points payload".to_string()));
        }

        let receipt = self
            .ingest
            .ingest(sync.owner_id, &payload)
            .await
            .map_err(|e| {
                SyncError::Rejected(format!(
                    "integration {} fetched data but ingest rejected it: {e}",
                    sync.name
                ))
            })?;

        if let Err(e) = self.store.record_sync_time(sync.id, Utc::now()).await {
            warn!(sync_id = sync.id, error = %e, "failed recording sync time");
        }
        info!(
            sync_id = sync.id,
            batch_id = %receipt.batch_id,
            accepted = receipt.accepted,
            "external sync finished"
        );
        Ok(receipt)
    }

    /// Decrypted auth header value, if one is configured and decryptable.
    fn auth_value(&self, sync: &ExternalSync) -> Option<String> {
        if sync.auth_header_key.is_empty() || sync.auth_header_value.is_empty() {
            return None;
        }
        match crypto::decrypt(&sync.auth_header_value, &self.aes_key) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(sync_id = sync.id, code = e.code(), "auth header not decryptable, sending without it");
                None
            }
        }
    }
}

#[async_trait]
impl SyncJob for SyncService {
    async fn run_sync(&self, sync: &ExternalSync) {
        if let Err(e) = self.execute(sync).await {
            error!(sync_id = sync.id, code = e.code(), error = %e, "scheduled sync failed");
        }
    }
}
