use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespaced identity of one schedulable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum JobKey {
    /// A saved extraction pipeline.
    Pipeline(i64),
    /// An external HTTP sync definition.
    Sync(i64),
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Pipeline(id) => write!(f, "pipeline-{id}"),
            JobKey::Sync(id) => write!(f, "erp-{id}"),
        }
    }
}

impl FromStr for JobKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |id: &str| {
            id.parse::<i64>()
                .map_err(|_| format!("invalid job id in key: {s}"))
        };
        if let Some(id) = s.strip_prefix("pipeline-") {
            Ok(JobKey::Pipeline(parse(id)?))
        } else if let Some(id) = s.strip_prefix("erp-") {
            Ok(JobKey::Sync(parse(id)?))
        } else {
            Err(format!("unknown job key: {s}"))
        }
    }
}

/// Opaque handle for an active trigger inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerHandle(pub Uuid);

/// Registry entry as reported by `Scheduler::active_jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveJob {
    pub key: JobKey,
    /// Normalised (seconds-first) cron expression.
    pub cron: String,
    pub registered_at: DateTime<Utc>,
}
