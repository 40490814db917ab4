//! Streaming extraction: compiled SQL in, canonical records out.
//!
//! `stream_batches` fills one batch at a time and awaits the handler before
//! pulling the next row, so the source is never read ahead of the consumer.
//! At most `batch_size` canonical records are held at once.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use geoetl_core::types::{CanonicalRecord, DataSource, Pipeline};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::compiler::compile;
use crate::dialect::Dialect;
use crate::error::{BoxError, PipelineError, Result};
use crate::resolver::{CredentialResolver, SourcePool};
use crate::value::GenericRow;

/// Receives each full (or final partial) batch. Returning an error stops the
/// extraction.
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle(&mut self, batch: Vec<CanonicalRecord>) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl<F> BatchHandler for F
where
    F: FnMut(Vec<CanonicalRecord>) -> std::result::Result<(), BoxError> + Send,
{
    async fn handle(&mut self, batch: Vec<CanonicalRecord>) -> std::result::Result<(), BoxError> {
        (self)(batch)
    }
}

/// Looks up the data source a pipeline points at, scoped to its owner.
#[async_trait]
pub trait SourceLookup: Send + Sync {
    async fn data_source(
        &self,
        id: i64,
        owner_id: i64,
    ) -> std::result::Result<Option<DataSource>, BoxError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub rows: u64,
    pub batches: u64,
}

/// Read at most `row_cap` rows into memory.
pub async fn materialize_all<S>(mut rows: S, row_cap: usize) -> Result<Vec<GenericRow>>
where
    S: Stream<Item = Result<GenericRow>> + Unpin,
{
    let mut out = Vec::with_capacity(row_cap.min(1024));
    while out.len() < row_cap {
        match rows.next().await {
            Some(row) => out.push(row?),
            None => break,
        }
    }
    Ok(out)
}

/// Drive `rows` through `handler` in batches of `batch_size`.
///
/// Row errors surface as [`PipelineError::Execution`], handler errors as
/// [`PipelineError::Consumer`]; either stops the cursor. Batches already
/// delivered stay delivered.
pub async fn stream_batches<S, H>(
    mut rows: S,
    batch_size: usize,
    cancel: &CancellationToken,
    handler: &mut H,
) -> Result<ExtractStats>
where
    S: Stream<Item = Result<GenericRow>> + Unpin,
    H: BatchHandler + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut stats = ExtractStats::default();
    let mut batch = Vec::with_capacity(batch_size);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            next = rows.next() => next,
        };
        let Some(row) = next else { break };

        batch.push(row?.to_canonical());
        stats.rows += 1;

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            deliver(handler, full, &mut stats).await?;
        }
    }

    if !batch.is_empty() {
        deliver(handler, batch, &mut stats).await?;
    }
    Ok(stats)
}

async fn deliver<H>(handler: &mut H, batch: Vec<CanonicalRecord>, stats: &mut ExtractStats) -> Result<()>
where
    H: BatchHandler + ?Sized,
{
    let size = batch.len();
    handler.handle(batch).await.map_err(PipelineError::Consumer)?;
    stats.batches += 1;
    debug!(batch = stats.batches, size, "batch delivered");
    Ok(())
}

/// Runs saved pipelines against their data sources.
pub struct Extractor {
    resolver: CredentialResolver,
    sources: Arc<dyn SourceLookup>,
    preview_rows: usize,
}

impl Extractor {
    pub fn new(resolver: CredentialResolver, sources: Arc<dyn SourceLookup>, preview_rows: usize) -> Self {
        Self {
            resolver,
            sources,
            preview_rows: preview_rows.max(1),
        }
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Parse, look up the source, compile, then connect. Config and
    /// validation errors are raised before the external source is dialed.
    async fn prepare(&self, pipeline: &Pipeline, limit: Option<u64>) -> Result<(SourcePool, String)> {
        let mut config = pipeline
            .pipeline_config()
            .map_err(|e| PipelineError::Config(format!("invalid pipeline config: {e}")))?;
        if limit.is_some() {
            config.limit = limit;
        }

        let source = self
            .sources
            .data_source(pipeline.data_source_id, pipeline.owner_id)
            .await
            .map_err(|e| PipelineError::Connection(format!("data source lookup failed: {e}")))?
            .ok_or_else(|| {
                PipelineError::Connection("data source not found or unauthorized".to_string())
            })?;

        let dialect = Dialect::from_provider(&source.provider)?;
        let sql = compile(&config, dialect)?;
        let pool = self.resolver.resolve(&source).await?;
        Ok((pool, sql))
    }

    /// First few rows of the pipeline as column → value maps.
    pub async fn preview(&self, pipeline: &Pipeline) -> Result<Vec<Map<String, Value>>> {
        let (pool, sql) = self.prepare(pipeline, Some(self.preview_rows as u64)).await?;
        let rows = materialize_all(pool.fetch_rows(&sql), self.preview_rows).await;
        pool.close().await;
        Ok(rows?.iter().map(GenericRow::to_json_map).collect())
    }

    /// Stream the full result set through `handler`.
    pub async fn run<H>(
        &self,
        pipeline: &Pipeline,
        batch_size: usize,
        cancel: &CancellationToken,
        handler: &mut H,
    ) -> Result<ExtractStats>
    where
        H: BatchHandler + ?Sized,
    {
        let (pool, sql) = self.prepare(pipeline, None).await?;
        let result = stream_batches(pool.fetch_rows(&sql), batch_size, cancel, handler).await;
        pool.close().await;

        let stats = result?;
        info!(
            pipeline_id = pipeline.id,
            rows = stats.rows,
            batches = stats.batches,
            "extraction finished"
        );
        Ok(stats)
    }
}
