//! The process-wide trigger dispatcher behind the job registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::types::TriggerHandle;

/// Body executed on every fire. Returns a fresh future per fire.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Owns cron timing. Each fire must run on its own task, detached from
/// whoever registered the job.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stop future fires. Bodies already running are not awaited.
    async fn stop(&self) -> Result<()>;

    /// Register `job` to fire on `cron` (seconds-first form).
    async fn add(&self, name: &str, cron: &str, job: JobFn) -> Result<TriggerHandle>;

    async fn remove(&self, handle: &TriggerHandle) -> Result<()>;
}

/// [`Dispatcher`] backed by `tokio-cron-scheduler`.
///
/// `shutdown()` can still let one already-due tick through, so every fire
/// checks `stopped` before spawning its body.
pub struct CronDispatcher {
    inner: JobScheduler,
    stopped: Arc<AtomicBool>,
}

impl CronDispatcher {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Dispatcher(e.to_string()))?;
        Ok(Self {
            inner,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Dispatcher for CronDispatcher {
    async fn start(&self) -> Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        self.inner
            .start()
            .await
            .map_err(|e| SchedulerError::Dispatcher(e.to_string()))?;
        info!("cron dispatcher started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .map_err(|e| SchedulerError::Dispatcher(e.to_string()))?;
        info!("cron dispatcher stopped");
        Ok(())
    }

    async fn add(&self, name: &str, cron: &str, job: JobFn) -> Result<TriggerHandle> {
        let label = name.to_string();
        let stopped = self.stopped.clone();
        let trigger = Job::new_async(cron, move |_uuid, _sched| {
            let job = job.clone();
            let label = label.clone();
            let stopped = stopped.clone();
            Box::pin(async move {
                if stopped.load(Ordering::SeqCst) {
                    debug!(job = %label, "fire after stop ignored");
                    return;
                }
                debug!(job = %label, "trigger fired");
                tokio::spawn(job());
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(format!("`{cron}`: {e}")))?;

        let id = self
            .inner
            .add(trigger)
            .await
            .map_err(|e| SchedulerError::Dispatcher(e.to_string()))?;
        Ok(TriggerHandle(id))
    }

    async fn remove(&self, handle: &TriggerHandle) -> Result<()> {
        self.inner
            .remove(&handle.0)
            .await
            .map_err(|e| SchedulerError::Dispatcher(e.to_string()))
    }
}
