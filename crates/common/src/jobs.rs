//! Pollable status for detached background work.
//!
//! Long-running operations (binary downloads, renewal sweeps) run on their
//! own task and report into a [`JobHandle`]. Callers keep a clone of the
//! handle and poll [`JobHandle::snapshot`]; abandoning the handle does not
//! cancel the work.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ids::JobId;

/// State of a background job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running {
        /// Percent complete, when known
        progress: Option<f64>,
        message: Option<String>,
    },
    Succeeded,
    Failed {
        error: String,
    },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }
}

/// Point-in-time copy of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared, lock-guarded job status.
#[derive(Debug, Clone)]
pub struct JobHandle {
    inner: Arc<RwLock<JobRecord>>,
}

impl JobHandle {
    pub fn new(kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(RwLock::new(JobRecord {
                id: JobId::new(),
                kind: kind.into(),
                state: JobState::Pending,
                created_at: now,
                updated_at: now,
            })),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.read().id.clone()
    }

    pub fn snapshot(&self) -> JobRecord {
        self.inner.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.read().state.is_finished()
    }

    /// Report progress. Ignored once the job has finished.
    pub fn progress(&self, progress: Option<f64>, message: Option<String>) {
        self.transition(JobState::Running { progress, message });
    }

    pub fn succeed(&self) {
        self.transition(JobState::Succeeded);
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.transition(JobState::Failed {
            error: error.into(),
        });
    }

    fn transition(&self, next: JobState) {
        let mut record = self.inner.write();
        if record.state.is_finished() {
            return;
        }
        record.state = next;
        record.updated_at = Utc::now();
    }
}

/// Run `work` on a detached task, reporting into a fresh [`JobHandle`].
///
/// Must be called from within a tokio runtime.
pub fn spawn_job<F, Fut, E>(kind: &str, work: F) -> JobHandle
where
    F: FnOnce(JobHandle) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let handle = JobHandle::new(kind);
    handle.progress(None, None);
    let fut = work(handle.clone());
    let reporter = handle.clone();
    let kind = kind.to_string();

    tokio::spawn(async move {
        match fut.await {
            Ok(()) => {
                debug!(job = %reporter.id(), kind = %kind, "Background job finished");
                reporter.succeed();
            }
            Err(e) => {
                warn!(job = %reporter.id(), kind = %kind, error = %e, "Background job failed");
                reporter.fail(e.to_string());
            }
        }
    });

    handle
}
