use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use geoetl_core::types::{ExternalSync, Pipeline};
use geoetl_pipeline::PipelineRunner;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::{Dispatcher, JobFn},
    error::{Result, SchedulerError},
    schedule::normalize_cron,
    types::{ActiveJob, JobKey, TriggerHandle},
};

/// Body of a scheduled pipeline fire.
#[async_trait]
pub trait PipelineJob: Send + Sync {
    async fn run_pipeline(&self, pipeline: &Pipeline);
}

/// Body of a scheduled external-sync fire.
#[async_trait]
pub trait SyncJob: Send + Sync {
    async fn run_sync(&self, sync: &ExternalSync);
}

#[async_trait]
impl PipelineJob for PipelineRunner {
    async fn run_pipeline(&self, pipeline: &Pipeline) {
        // The runner logs its own failures; the next fire is the only retry.
        let _ = self.run_scheduled(pipeline).await;
    }
}

struct Registration {
    handle: TriggerHandle,
    cron: String,
    registered_at: DateTime<Utc>,
}

/// Live registry of recurring jobs, one trigger per [`JobKey`].
///
/// Every mutation takes the single write lock, so add/remove sequences never
/// leave two triggers for the same key. Job bodies never run under the lock.
/// A trigger captures its descriptor as of registration: edits take effect
/// only once the job is registered again.
pub struct Scheduler {
    dispatcher: Arc<dyn Dispatcher>,
    pipelines: Arc<dyn PipelineJob>,
    syncs: Option<Arc<dyn SyncJob>>,
    jobs: RwLock<HashMap<JobKey, Registration>>,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        pipelines: Arc<dyn PipelineJob>,
        syncs: Option<Arc<dyn SyncJob>>,
    ) -> Self {
        Self {
            dispatcher,
            pipelines,
            syncs,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.dispatcher.start().await?;
        info!("scheduler started");
        Ok(())
    }

    /// Halt future fires. Runs already in flight keep going.
    pub async fn stop(&self) -> Result<()> {
        self.dispatcher.stop().await?;
        info!("scheduler stopped");
        Ok(())
    }

    // --- pipelines ---------------------------------------------------------

    /// (Re-)register a pipeline from its current config.
    ///
    /// An inactive or cron-less pipeline just loses any existing trigger. A
    /// malformed cron or scheduler block is logged and returned; the pipeline
    /// stays unscheduled.
    pub async fn add_or_update_job(&self, pipeline: &Pipeline) -> Result<()> {
        let key = JobKey::Pipeline(pipeline.id);

        let mut jobs = self.jobs.write().await;
        self.unregister(&mut jobs, key).await;

        let schedule = pipeline.schedule_config().map_err(|e| {
            warn!(%key, pipeline_id = pipeline.id, error = %e, "unreadable schedule config");
            SchedulerError::Config(format!("pipeline {}: {e}", pipeline.id))
        })?;

        let Some(cron) = schedule.active_cron() else {
            debug!(%key, "pipeline not scheduled");
            return Ok(());
        };

        let snapshot = Arc::new(pipeline.clone());
        let runner = self.pipelines.clone();
        let job: JobFn = Arc::new(move || {
            let runner = runner.clone();
            let pipeline = snapshot.clone();
            async move {
                info!(pipeline_id = pipeline.id, name = %pipeline.name, "running scheduled pipeline");
                runner.run_pipeline(&pipeline).await;
            }
            .boxed()
        });
        self.register(&mut jobs, key, cron, job).await
    }

    /// No-op when the pipeline has no trigger.
    pub async fn remove_job(&self, pipeline_id: i64) {
        let mut jobs = self.jobs.write().await;
        self.unregister(&mut jobs, JobKey::Pipeline(pipeline_id)).await;
    }

    /// Register every eligible pipeline. Returns how many are scheduled.
    pub async fn reload_pipelines(&self, pipelines: &[Pipeline]) -> usize {
        let mut scheduled = 0;
        for pipeline in pipelines {
            if self.add_or_update_job(pipeline).await.is_ok()
                && self.is_registered(JobKey::Pipeline(pipeline.id)).await
            {
                scheduled += 1;
            }
        }
        info!(scheduled, total = pipelines.len(), "pipelines reloaded");
        scheduled
    }

    // --- external syncs ----------------------------------------------------

    /// (Re-)register a sync. Any non-empty cron schedule means active.
    pub async fn add_or_update_sync_job(&self, sync: &ExternalSync) -> Result<()> {
        let Some(runner) = self.syncs.clone() else {
            return Ok(());
        };
        let key = JobKey::Sync(sync.id);

        let mut jobs = self.jobs.write().await;
        self.unregister(&mut jobs, key).await;

        let Some(cron) = sync.active_cron() else {
            debug!(%key, "sync not scheduled");
            return Ok(());
        };

        let snapshot = Arc::new(sync.clone());
        let job: JobFn = Arc::new(move || {
            let runner = runner.clone();
            let sync = snapshot.clone();
            async move {
                info!(sync_id = sync.id, name = %sync.name, "running scheduled sync");
                runner.run_sync(&sync).await;
            }
            .boxed()
        });
        self.register(&mut jobs, key, cron, job).await
    }

    pub async fn remove_sync_job(&self, sync_id: i64) {
        let mut jobs = self.jobs.write().await;
        self.unregister(&mut jobs, JobKey::Sync(sync_id)).await;
    }

    pub async fn reload_syncs(&self, syncs: &[ExternalSync]) -> usize {
        if self.syncs.is_none() {
            return 0;
        }
        let mut scheduled = 0;
        for sync in syncs {
            if self.add_or_update_sync_job(sync).await.is_ok()
                && self.is_registered(JobKey::Sync(sync.id)).await
            {
                scheduled += 1;
            }
        }
        info!(scheduled, total = syncs.len(), "syncs reloaded");
        scheduled
    }

    // --- introspection -----------------------------------------------------

    /// Snapshot of the registry, ordered by key.
    pub async fn active_jobs(&self) -> Vec<ActiveJob> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<ActiveJob> = jobs
            .iter()
            .map(|(key, reg)| ActiveJob {
                key: *key,
                cron: reg.cron.clone(),
                registered_at: reg.registered_at,
            })
            .collect();
        out.sort_by_key(|job| job.key);
        out
    }

    pub async fn is_registered(&self, key: JobKey) -> bool {
        self.jobs.read().await.contains_key(&key)
    }

    // --- private helpers ---------------------------------------------------

    async fn unregister(&self, jobs: &mut HashMap<JobKey, Registration>, key: JobKey) {
        if let Some(reg) = jobs.remove(&key) {
            if let Err(e) = self.dispatcher.remove(&reg.handle).await {
                warn!(%key, error = %e, "failed to remove trigger");
            }
            info!(%key, "scheduled job removed");
        }
    }

    async fn register(
        &self,
        jobs: &mut HashMap<JobKey, Registration>,
        key: JobKey,
        cron: &str,
        job: JobFn,
    ) -> Result<()> {
        let registered = async {
            let normalized = normalize_cron(cron)?;
            let handle = self.dispatcher.add(&key.to_string(), &normalized, job).await?;
            Ok::<_, SchedulerError>((handle, normalized))
        }
        .await;

        match registered {
            Ok((handle, normalized)) => {
                info!(%key, cron = %normalized, "job scheduled");
                jobs.insert(
                    key,
                    Registration {
                        handle,
                        cron: normalized,
                        registered_at: Utc::now(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                warn!(%key, %cron, error = %e, "failed to schedule job");
                Err(e)
            }
        }
    }
}
