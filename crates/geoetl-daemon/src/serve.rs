use std::sync::Arc;

use geoetl_core::GeoEtlConfig;
use geoetl_pipeline::{CredentialResolver, Extractor, PipelineRunner, RemoteValidator};
use geoetl_scheduler::{CronDispatcher, Scheduler, SyncJob};
use geoetl_store::SqliteStore;
use geoetl_sync::SyncService;
use tracing::info;

/// Wire every subsystem to one store, load the schedule and block until Ctrl-C.
pub async fn run(config: GeoEtlConfig) -> anyhow::Result<()> {
    info!(path = %config.database.path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(&config.database.path)?);

    let resolver = CredentialResolver::new(config.security.aes_key.clone(), &config.extract);
    let extractor = Extractor::new(resolver, store.clone(), config.extract.preview_rows);
    // one validator, one throttle for the whole process
    let validator = Arc::new(RemoteValidator::new(&config.validation)?);
    let runner = Arc::new(PipelineRunner::new(
        Arc::new(extractor),
        validator,
        store.clone(),
        config.extract.batch_size,
    ));

    let syncs: Arc<dyn SyncJob> = Arc::new(SyncService::new(
        &config.sync,
        config.security.aes_key.clone(),
        store.clone(),
        store.clone(),
    )?);

    let dispatcher = Arc::new(CronDispatcher::new().await?);
    let scheduler = Scheduler::new(dispatcher, runner, Some(syncs));
    scheduler.start().await?;

    let pipelines = store.list_all_pipelines()?;
    let scheduled = scheduler.reload_pipelines(&pipelines).await;
    let integrations = store.list_all_syncs()?;
    let scheduled_syncs = scheduler.reload_syncs(&integrations).await;
    info!(
        pipelines = pipelines.len(),
        scheduled,
        syncs = integrations.len(),
        scheduled_syncs,
        "geoetl daemon running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.stop().await?;
    Ok(())
}
