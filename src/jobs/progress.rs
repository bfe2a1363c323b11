//! Per-job status and progress percentage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::JobId;
use crate::error::StorageError;

/// Sink for progress percentages coming out of a run.
pub trait ProgressReporter: Send + Sync {
    fn publish(&self, job_id: JobId, progress: f32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f32,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(job_id: JobId, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            progress: 0.0,
            input_path,
            output_path,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// What a poller sees. Unknown jobs report progress 0 and no status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressReport {
    pub progress: f32,
    pub status: Option<JobStatus>,
}

/// In-memory job table, optionally mirrored to `<dir>/<job_id>.json`.
///
/// Progress only moves forward while a job runs; the one exception is a
/// reset to 0 at the start of a run and on failure.
#[derive(Debug, Default)]
pub struct ProgressStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
    persist_dir: Option<PathBuf>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            records: RwLock::default(),
            persist_dir: Some(dir.into()),
        }
    }

    pub fn insert(&self, record: JobRecord) {
        self.persist(&record);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.job_id, record);
    }

    pub fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    pub fn report(&self, job_id: JobId) -> ProgressReport {
        match self.get(job_id) {
            Some(record) => ProgressReport {
                progress: record.progress,
                status: Some(record.status),
            },
            None => ProgressReport {
                progress: 0.0,
                status: None,
            },
        }
    }

    pub fn progress(&self, job_id: JobId) -> f32 {
        self.report(job_id).progress
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_running(&self, job_id: JobId) {
        self.modify(job_id, |r| {
            r.status = JobStatus::Running;
            r.progress = 0.0;
        });
    }

    pub fn mark_succeeded(&self, job_id: JobId) {
        self.modify(job_id, |r| {
            r.status = JobStatus::Succeeded;
            r.progress = 100.0;
            r.error = None;
        });
    }

    pub fn mark_failed(&self, job_id: JobId, error: impl Into<String>) {
        let error = error.into();
        self.modify(job_id, |r| {
            r.status = JobStatus::Failed;
            r.progress = 0.0;
            r.error = Some(error);
        });
    }

    pub fn mark_cancelled(&self, job_id: JobId) {
        self.modify(job_id, |r| {
            r.status = JobStatus::Cancelled;
            r.progress = 0.0;
        });
    }

    /// Drop a finished record. Pending and running jobs are kept.
    pub fn remove(&self, job_id: JobId) -> Option<JobRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !records.get(&job_id)?.status.is_terminal() {
            return None;
        }
        let record = records.remove(&job_id);
        drop(records);
        if let Some(dir) = &self.persist_dir {
            crate::storage::discard(&record_path(dir, job_id));
        }
        record
    }

    /// Drop finished records last updated before `cutoff`.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<JobId> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.status.is_terminal() && r.updated_at < cutoff)
            .map(|r| r.job_id)
            .collect();
        expired
            .into_iter()
            .filter(|id| self.remove(*id).is_some())
            .count()
    }

    fn modify(&self, job_id: JobId, change: impl FnOnce(&mut JobRecord)) -> bool {
        let snapshot = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let Some(record) = records.get_mut(&job_id) else {
                return false;
            };
            change(record);
            record.updated_at = Utc::now();
            record.clone()
        };
        self.persist(&snapshot);
        true
    }

    fn persist(&self, record: &JobRecord) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let path = record_path(dir, record.job_id);
        let result = serde_json::to_vec_pretty(record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                std::fs::create_dir_all(dir)?;
                std::fs::write(&path, bytes)
            });
        if let Err(source) = result {
            let e = StorageError::new(path, source);
            error!(job_id = %record.job_id, error = %e, "failed to persist job record");
        }
    }
}

fn record_path(dir: &Path, job_id: JobId) -> PathBuf {
    dir.join(format!("{job_id}.json"))
}

impl ProgressReporter for ProgressStore {
    fn publish(&self, job_id: JobId, progress: f32) {
        let progress = progress.clamp(0.0, 100.0);
        self.modify(job_id, |r| {
            let active = matches!(r.status, JobStatus::Pending | JobStatus::Running);
            if active && (progress >= r.progress || progress == 0.0) {
                r.progress = progress;
            }
        });
    }
}
