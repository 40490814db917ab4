//! `geoetl-scheduler`: cron-driven registry for pipeline and sync jobs.
//!
//! # Overview
//!
//! One [`Scheduler`] owns one [`dispatcher::Dispatcher`] and a registry of
//! `JobKey → trigger`. Pipelines and external syncs are registered from
//! their stored descriptors and re-registered on every save.
//!
//! # Job identities
//!
//! | Key            | Scheduled when                             |
//! |----------------|--------------------------------------------|
//! | `pipeline-<id>`| `cron_active` is true and `cron` non-empty |
//! | `erp-<id>`     | `cron_schedule` is non-empty               |

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use dispatcher::{CronDispatcher, Dispatcher, JobFn};
pub use engine::{PipelineJob, Scheduler, SyncJob};
pub use error::{Result, SchedulerError};
pub use types::{ActiveJob, JobKey, TriggerHandle};
