//! The job body: extract, validate each record, aggregate, persist.

use std::sync::Arc;

use async_trait::async_trait;
use geoetl_core::types::{CanonicalRecord, Pipeline, RunSession, ValidationResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{BoxError, PipelineError, Result};
use crate::extractor::{BatchHandler, ExtractStats, Extractor};

/// Validates one canonical record. Failures are carried inside the result.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate_single(&self, owner_id: i64, record: &CanonicalRecord) -> ValidationResult;
}

/// Persists a finished run aggregate.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn save_run_session(&self, session: &RunSession) -> std::result::Result<(), BoxError>;
}

/// Anything that can stream a pipeline's records through a batch handler.
#[async_trait]
pub trait PipelineSource: Send + Sync {
    async fn extract(
        &self,
        pipeline: &Pipeline,
        batch_size: usize,
        cancel: &CancellationToken,
        handler: &mut dyn BatchHandler,
    ) -> Result<ExtractStats>;
}

#[async_trait]
impl PipelineSource for Extractor {
    async fn extract(
        &self,
        pipeline: &Pipeline,
        batch_size: usize,
        cancel: &CancellationToken,
        handler: &mut dyn BatchHandler,
    ) -> Result<ExtractStats> {
        self.run(pipeline, batch_size, cancel, handler).await
    }
}

/// Background work that outlives the caller. It owns its cancellation scope;
/// cancelling the caller's token has no effect on it.
#[derive(Debug)]
pub struct DetachedTask {
    handle: JoinHandle<()>,
    scope: CancellationToken,
}

impl DetachedTask {
    pub fn spawn<F, Fut>(work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let scope = CancellationToken::new();
        let handle = tokio::spawn(work(scope.clone()));
        Self { handle, scope }
    }

    /// The task's own cancellation scope.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Wait for the task. A panicked task is logged.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "detached task failed");
        }
    }
}

/// What an interactive run hands back once the stream has ended.
#[derive(Debug)]
pub struct InteractiveRun {
    pub session: RunSession,
    pub outcome: Result<ExtractStats>,
    /// Session persistence, running on its own scope. `None` when no record
    /// was processed.
    pub persist: Option<DetachedTask>,
}

/// Validates each record and folds the result into the run session.
struct ValidatingHandler<'a, F> {
    validator: &'a dyn Validator,
    owner_id: i64,
    session: &'a mut RunSession,
    cancel: &'a CancellationToken,
    sink: F,
}

#[async_trait]
impl<'a, F> BatchHandler for ValidatingHandler<'a, F>
where
    F: FnMut(&ValidationResult) -> std::result::Result<(), BoxError> + Send,
{
    async fn handle(&mut self, batch: Vec<CanonicalRecord>) -> std::result::Result<(), BoxError> {
        for record in &batch {
            if self.cancel.is_cancelled() {
                return Err(Box::new(PipelineError::Cancelled));
            }
            let result = self.validator.validate_single(self.owner_id, record).await;
            self.session.record(&result);
            (self.sink)(&result)?;
        }
        Ok(())
    }
}

/// Runs pipelines end to end. One instance is shared by the scheduler and
/// interactive callers.
pub struct PipelineRunner {
    source: Arc<dyn PipelineSource>,
    validator: Arc<dyn Validator>,
    sessions: Arc<dyn SessionSink>,
    batch_size: usize,
}

impl PipelineRunner {
    pub fn new(
        source: Arc<dyn PipelineSource>,
        validator: Arc<dyn Validator>,
        sessions: Arc<dyn SessionSink>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            validator,
            sessions,
            batch_size: batch_size.max(1),
        }
    }

    async fn drive<F>(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
        sink: F,
    ) -> (RunSession, Result<ExtractStats>)
    where
        F: FnMut(&ValidationResult) -> std::result::Result<(), BoxError> + Send,
    {
        let mut session = RunSession::new(pipeline.owner_id);
        let outcome = {
            let mut handler = ValidatingHandler {
                validator: self.validator.as_ref(),
                owner_id: pipeline.owner_id,
                session: &mut session,
                cancel,
                sink,
            };
            self.source
                .extract(pipeline, self.batch_size, cancel, &mut handler)
                .await
                .map_err(unwrap_cancelled)
        };
        (session, outcome)
    }

    /// Scheduled fire. Runs on a fresh scope and persists the session only
    /// when the whole stream succeeded. A failed save is logged; the run
    /// itself still counts as successful.
    pub async fn run_scheduled(&self, pipeline: &Pipeline) -> Result<RunSession> {
        info!(pipeline_id = pipeline.id, name = %pipeline.name, "scheduled pipeline run starting");
        let scope = CancellationToken::new();
        let (session, outcome) = self.drive(pipeline, &scope, |_| Ok(())).await;

        if let Err(e) = outcome {
            error!(pipeline_id = pipeline.id, code = e.code(), error = %e, "scheduled pipeline run failed");
            return Err(e);
        }

        if let Err(e) = self.sessions.save_run_session(&session).await {
            warn!(pipeline_id = pipeline.id, error = %e, "failed to save run session");
        }
        info!(
            pipeline_id = pipeline.id,
            total = session.total_count,
            accurate = session.accurate_count,
            errors = session.error_count,
            "scheduled pipeline run finished"
        );
        Ok(session)
    }

    /// Caller-driven run. Each result goes to `sink` as soon as it exists;
    /// `cancel` is honoured between rows and between records. Whatever was
    /// processed is persisted afterwards on a detached task.
    pub async fn run_interactive<F>(
        &self,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
        sink: F,
    ) -> InteractiveRun
    where
        F: FnMut(&ValidationResult) -> std::result::Result<(), BoxError> + Send,
    {
        let (session, outcome) = self.drive(pipeline, cancel, sink).await;
        if let Err(e) = &outcome {
            warn!(pipeline_id = pipeline.id, code = e.code(), error = %e, "interactive pipeline run ended early");
        }

        let persist = (session.total_count > 0).then(|| {
            let sessions = self.sessions.clone();
            let snapshot = session.clone();
            DetachedTask::spawn(move |scope| async move {
                tokio::select! {
                    _ = scope.cancelled() => warn!("session persistence cancelled"),
                    res = sessions.save_run_session(&snapshot) => {
                        if let Err(e) = res {
                            warn!(error = %e, "failed to save streamed run session");
                        }
                    }
                }
            })
        });

        InteractiveRun {
            session,
            outcome,
            persist,
        }
    }
}

/// A cancellation raised inside the handler comes back wrapped as a consumer
/// error; report it as a plain cancellation.
fn unwrap_cancelled(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Consumer(inner)
            if matches!(inner.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled)) =>
        {
            PipelineError::Cancelled
        }
        other => other,
    }
}
