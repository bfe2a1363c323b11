//! Livestock counting on video: detect, keep a stable identity per animal,
//! draw the overlay and write the annotated video, one background job per
//! upload.

pub mod config;
pub mod error;
pub mod integration;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod tracker;
pub mod video;

pub use config::Config;
pub use error::{
    ConfigError, FrameError, InputError, JobError, PipelineError, StorageError, VideoError,
};
pub use integration::{Annotator, ClassFilter, Detector, FnDetector, ReplayDetector};
pub use jobs::{JobId, JobManager, JobStatus, JobTicket, ProgressReport, ProgressStore};
pub use orchestrator::{Orchestrator, RunSummary};
pub use tracker::{ByteTracker, Detection, Rect, TrackState, TrackedDetection, TrackerConfig};
pub use video::{Frame, VideoMetadata};
