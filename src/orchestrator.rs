//! One run of one video: source to sink, with throttled progress and
//! cleanup on failure.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{InputError, PipelineError};
use crate::integration::{Annotator, ClassFilter, Detector, TrackerPipeline};
use crate::jobs::{JobId, ProgressReporter};
use crate::storage;
use crate::tracker::TrackerConfig;
use crate::video::VideoBackend;

/// Progress is capped here until the output has been verified.
const IN_FLIGHT_CAP: f32 = 95.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    /// Frames written unannotated after a detection or annotation fault
    pub degraded_frames: u64,
    /// Distinct identities handed out over the whole video
    pub tracks_created: u64,
}

/// Emits at most one update per `interval`.
#[derive(Debug)]
struct ProgressThrottle {
    interval: Duration,
    last: Instant,
}

impl ProgressThrottle {
    fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    fn tick(&mut self, processed: u64, total: u64, now: Instant) -> Option<f32> {
        if now.duration_since(self.last) < self.interval {
            return None;
        }
        self.last = now;
        Some(in_flight_progress(processed, total))
    }
}

fn in_flight_progress(processed: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (processed as f32 / total as f32 * 100.0).min(IN_FLIGHT_CAP)
}

pub struct Orchestrator<D: Detector> {
    detector: Arc<D>,
    backend: Arc<dyn VideoBackend>,
    filter: ClassFilter,
    tracker_config: TrackerConfig,
    annotator: Arc<Annotator>,
    progress_interval: Duration,
}

impl<D: Detector> Orchestrator<D> {
    pub fn new(
        detector: Arc<D>,
        backend: Arc<dyn VideoBackend>,
        filter: ClassFilter,
        tracker_config: TrackerConfig,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            detector,
            backend,
            filter,
            tracker_config,
            annotator,
            progress_interval: Duration::from_secs(1),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Process `source` into `target`, blocking the calling thread.
    ///
    /// Progress goes to 0 at the start, climbs to at most 95 while frames
    /// are written and reaches 100 once the output is verified. Any failure,
    /// cancellation included, resets progress to 0 and deletes both files.
    pub fn run(
        &self,
        job_id: JobId,
        source: &Path,
        target: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        reporter.publish(job_id, 0.0);
        let started = Instant::now();

        match self.execute(job_id, source, target, reporter, cancel) {
            Ok(summary) => {
                reporter.publish(job_id, 100.0);
                info!(
                    job_id = %job_id,
                    frames = summary.frames_written,
                    degraded = summary.degraded_frames,
                    tracks = summary.tracks_created,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "video processed"
                );
                Ok(summary)
            }
            Err(e) => {
                match &e {
                    PipelineError::Cancelled => info!(job_id = %job_id, "run cancelled"),
                    _ => error!(job_id = %job_id, error = %e, "run failed"),
                }
                reporter.publish(job_id, 0.0);
                storage::discard(source);
                storage::discard(target);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        job_id: JobId,
        source_path: &Path,
        target_path: &Path,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let mut source = self
            .backend
            .open_source(source_path)
            .map_err(InputError::from)?;
        let meta = source.metadata();
        if meta.frame_count == 0 {
            return Err(InputError::NoFrames.into());
        }
        info!(
            job_id = %job_id,
            path = %source_path.display(),
            frames = meta.frame_count,
            fps = meta.fps,
            width = meta.width,
            height = meta.height,
            "starting run"
        );

        let mut sink = self
            .backend
            .create_sink(target_path, meta.fps, meta.resolution())
            .map_err(PipelineError::Sink)?;
        let mut pipeline = TrackerPipeline::new(
            Arc::clone(&self.detector),
            self.filter.clone(),
            self.tracker_config.clone(),
            Arc::clone(&self.annotator),
        );
        let mut throttle = ProgressThrottle::new(self.progress_interval, Instant::now());
        let mut summary = RunSummary::default();
        let mut max_track_id = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(frame) = source.read_next().map_err(InputError::from)? else {
                break;
            };
            if frame.index != summary.frames_read {
                warn!(
                    job_id = %job_id,
                    frame = frame.index,
                    expected = summary.frames_read,
                    "frame index out of sequence"
                );
            }
            summary.frames_read += 1;

            let processed = pipeline.process_frame(frame);
            if processed.fault.is_some() {
                summary.degraded_frames += 1;
            }
            max_track_id = processed
                .tracked
                .iter()
                .map(|t| t.track_id)
                .fold(max_track_id, u64::max);

            sink.write(&processed.frame).map_err(PipelineError::Sink)?;
            summary.frames_written += 1;

            if let Some(progress) =
                throttle.tick(summary.frames_written, meta.frame_count, Instant::now())
            {
                debug!(job_id = %job_id, progress, "progress");
                reporter.publish(job_id, progress);
            }
        }

        if let Err(e) = source.close() {
            warn!(job_id = %job_id, error = %e, "closing source failed");
        }
        sink.close().map_err(PipelineError::Sink)?;
        drop(sink);

        if summary.frames_read != meta.frame_count {
            warn!(
                job_id = %job_id,
                read = summary.frames_read,
                reported = meta.frame_count,
                "frame count differs from container metadata"
            );
        }
        verify_output(target_path)?;

        summary.tracks_created = max_track_id;
        Ok(summary)
    }
}

fn verify_output(path: &Path) -> Result<(), PipelineError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(PipelineError::OutputEmpty(path.to_path_buf())),
        Err(_) => Err(PipelineError::OutputMissing(path.to_path_buf())),
    }
}
