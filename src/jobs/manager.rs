//! Job submission and lifecycle on the tokio runtime.
//!
//! Each job runs on the blocking pool; a semaphore bounds how many run at
//! once and the rest wait as `Pending`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{JobId, JobRecord, JobStatus, ProgressReport, ProgressStore};
use crate::config::{Config, StorageConfig};
use crate::error::{JobError, PipelineError, StorageError};
use crate::integration::{Annotator, Detector};
use crate::orchestrator::Orchestrator;
use crate::storage::{self, SweepReport};
use crate::video::VideoBackend;

/// Returned to the submitter; the output only exists once the job succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub output_path: PathBuf,
}

/// `input` and `output` are canonical so that the sweep and the output
/// conflict check compare like with like.
struct JobHandle {
    input: PathBuf,
    output: PathBuf,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    fn is_active(&self) -> bool {
        !self.status.borrow().is_terminal()
    }
}

struct Inner<D: Detector> {
    orchestrator: Orchestrator<D>,
    store: Arc<ProgressStore>,
    storage: StorageConfig,
    max_active_jobs: usize,
    permits: Arc<Semaphore>,
    jobs: Mutex<HashMap<JobId, JobHandle>>,
    shutdown: CancellationToken,
}

impl<D: Detector> Inner<D> {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct JobManager<D: Detector> {
    inner: Arc<Inner<D>>,
}

impl<D: Detector> Clone for JobManager<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Detector + 'static> JobManager<D> {
    pub fn new(
        config: &Config,
        detector: Arc<D>,
        backend: Arc<dyn VideoBackend>,
        annotator: Annotator,
    ) -> Self {
        let store = match &config.storage.progress_dir {
            Some(dir) => ProgressStore::with_persistence(dir),
            None => ProgressStore::new(),
        };
        let orchestrator = Orchestrator::new(
            detector,
            backend,
            config.class_filter(),
            config.to_tracker_config(),
            Arc::new(annotator),
        )
        .with_progress_interval(config.jobs.progress_interval());

        Self {
            inner: Arc::new(Inner {
                orchestrator,
                store: Arc::new(store),
                storage: config.storage.clone(),
                max_active_jobs: config.jobs.max_active_jobs,
                permits: Arc::new(Semaphore::new(config.jobs.max_concurrent_jobs)),
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.inner.store
    }

    /// Validate `input` and start processing it in the background.
    ///
    /// Rejections leave no trace in the progress store. Must be called from
    /// within a tokio runtime.
    pub fn submit(&self, input: impl Into<PathBuf>) -> Result<JobTicket, JobError> {
        let input = input.into();
        let policy = &self.inner.storage;
        storage::validate_upload(&input, &policy.allowed_extensions, policy.max_upload_bytes)?;

        let mut jobs = self.inner.jobs();
        let active = jobs.values().filter(|h| h.is_active()).count();
        if active >= self.inner.max_active_jobs {
            warn!(active, path = %input.display(), "rejecting submission, too many active jobs");
            return Err(JobError::Busy {
                limit: self.inner.max_active_jobs,
            });
        }

        std::fs::create_dir_all(&policy.processed_dir)
            .map_err(|e| StorageError::new(&policy.processed_dir, e))?;

        let output = storage::output_path_for(&policy.processed_dir, &input);
        let (canonical_input, canonical_output) = canonical_paths(&input, &output)?;
        if jobs
            .values()
            .any(|h| h.is_active() && h.output == canonical_output)
        {
            warn!(path = %output.display(), "rejecting submission, output belongs to an active job");
            return Err(JobError::OutputInUse { path: output });
        }

        let job_id = Uuid::new_v4();
        self.inner
            .store
            .insert(JobRecord::pending(job_id, input.clone(), output.clone()));

        let (status_tx, status_rx) = watch::channel(JobStatus::Pending);
        let cancel = self.inner.shutdown.child_token();
        jobs.insert(
            job_id,
            JobHandle {
                input: canonical_input,
                output: canonical_output,
                cancel: cancel.clone(),
                status: status_rx,
            },
        );
        drop(jobs);

        info!(job_id = %job_id, path = %input.display(), "job submitted");
        tokio::spawn(run_job(
            Arc::clone(&self.inner),
            job_id,
            input,
            output.clone(),
            cancel,
            status_tx,
        ));

        Ok(JobTicket {
            job_id,
            output_path: output,
        })
    }

    pub fn report(&self, job_id: JobId) -> ProgressReport {
        self.inner.store.report(job_id)
    }

    /// Percentage in `[0, 100]`; 0 for unknown jobs.
    pub fn progress(&self, job_id: JobId) -> f32 {
        self.inner.store.progress(job_id)
    }

    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.report(job_id).status
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.jobs().values().filter(|h| h.is_active()).count()
    }

    /// Request cancellation. `false` if the job is unknown or already finished.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.inner.jobs().get(&job_id) {
            Some(handle) if handle.is_active() => {
                info!(job_id = %job_id, "cancellation requested");
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Resolve once the job reaches a terminal status.
    pub async fn wait(&self, job_id: JobId) -> Option<JobStatus> {
        let receiver = self.inner.jobs().get(&job_id).map(|h| h.status.clone());
        let Some(mut receiver) = receiver else {
            return self.status(job_id);
        };
        match receiver.wait_for(|s| s.is_terminal()).await {
            Ok(status) => Some(*status),
            Err(_) => self.status(job_id),
        }
    }

    /// Drop a finished job's record. Active jobs are left alone.
    pub fn forget(&self, job_id: JobId) -> Option<JobRecord> {
        let record = self.inner.store.remove(job_id)?;
        self.inner.jobs().remove(&job_id);
        Some(record)
    }

    /// One retention pass over the upload and processed directories.
    ///
    /// Files of active jobs are skipped; finished job records older than the
    /// retention window are dropped too.
    pub fn sweep(&self) -> SweepReport {
        let policy = &self.inner.storage;
        let keep: HashSet<PathBuf> = self
            .inner
            .jobs()
            .values()
            .filter(|h| h.is_active())
            .flat_map(|h| [h.input.clone(), h.output.clone()])
            .collect();
        let dirs = [policy.upload_dir.clone(), policy.processed_dir.clone()];
        let report = storage::sweep_expired(&dirs, policy.retention(), SystemTime::now(), &keep);
        for failure in &report.failed {
            warn!(error = %failure, "retention sweep could not remove file");
        }

        if let Ok(window) = chrono::Duration::from_std(policy.retention()) {
            let pruned = self.inner.store.prune_finished_before(Utc::now() - window);
            if pruned > 0 {
                let store = &self.inner.store;
                self.inner
                    .jobs()
                    .retain(|id, h| h.is_active() || store.get(*id).is_some());
                info!(pruned, "dropped expired job records");
            }
        }
        report
    }

    /// Run [`JobManager::sweep`] every `storage.sweep_interval_minutes` until
    /// [`JobManager::shutdown`].
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.storage.sweep_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let worker = manager.clone();
                match tokio::task::spawn_blocking(move || worker.sweep()).await {
                    Ok(report) => info!(
                        removed = report.removed.len(),
                        failed = report.failed.len(),
                        "retention sweep finished"
                    ),
                    Err(e) => error!(error = %e, "retention sweep panicked"),
                }
            }
        })
    }

    /// Cancel every job, refuse to start queued ones and stop the sweeper.
    pub fn shutdown(&self) {
        info!("job manager shutting down");
        self.inner.shutdown.cancel();
        self.inner.permits.close();
    }
}

async fn run_job<D: Detector + 'static>(
    inner: Arc<Inner<D>>,
    job_id: JobId,
    input: PathBuf,
    output: PathBuf,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
) {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        info!(job_id = %job_id, "job cancelled before it started");
        storage::discard(&input);
        inner.store.mark_cancelled(job_id);
        status.send_replace(JobStatus::Cancelled);
        return;
    };

    inner.store.mark_running(job_id);
    status.send_replace(JobStatus::Running);
    info!(job_id = %job_id, "job started");

    let worker = Arc::clone(&inner);
    let (source, target) = (input.clone(), output.clone());
    let result = tokio::task::spawn_blocking(move || {
        worker
            .orchestrator
            .run(job_id, &source, &target, &*worker.store, &cancel)
    })
    .await;
    drop(permit);

    let final_status = match result {
        Ok(Ok(_)) => {
            storage::discard(&input);
            inner.store.mark_succeeded(job_id);
            info!(job_id = %job_id, output = %output.display(), "job succeeded");
            JobStatus::Succeeded
        }
        Ok(Err(PipelineError::Cancelled)) => {
            inner.store.mark_cancelled(job_id);
            JobStatus::Cancelled
        }
        Ok(Err(e)) => {
            inner.store.mark_failed(job_id, e.to_string());
            JobStatus::Failed
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "job worker panicked");
            storage::discard(&input);
            storage::discard(&output);
            inner.store.mark_failed(job_id, e.to_string());
            JobStatus::Failed
        }
    };
    status.send_replace(final_status);
}

/// Resolve the input and the (not yet created) output to absolute paths.
fn canonical_paths(input: &Path, output: &Path) -> Result<(PathBuf, PathBuf), StorageError> {
    let canonical_input = input
        .canonicalize()
        .map_err(|e| StorageError::new(input, e))?;
    let dir = output
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let canonical_dir = dir.canonicalize().map_err(|e| StorageError::new(dir, e))?;
    let canonical_output = match output.file_name() {
        Some(name) => canonical_dir.join(name),
        None => canonical_dir,
    };
    Ok((canonical_input, canonical_output))
}
