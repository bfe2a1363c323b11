//! Error taxonomy, one enum per layer.
//!
//! `FrameError` never leaves a frame, `InputError` and the processing
//! variants of `PipelineError` abort a job, `StorageError` is logged next to
//! whatever failure caused the cleanup.

use std::path::PathBuf;

use thiserror::Error;

/// Frame source or sink failure.
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("cannot open video {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt video: {0}")]
    Corrupt(String),

    #[error("frame {index} is {got:?}, stream resolution is {expected:?}")]
    Resolution {
        index: u64,
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("video I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The submitted video can not be processed at all.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("unsupported file extension {extension:?}")]
    UnsupportedExtension { extension: String },

    #[error("input is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("input file not found: {0}")]
    Missing(PathBuf),

    #[error("input video reports no frames")]
    NoFrames,

    #[error(transparent)]
    Video(#[from] VideoError),
}

/// A single frame's detection or annotation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("detection failed: {0}")]
    Detection(String),

    #[error("annotation failed: {0}")]
    Annotation(String),
}

#[derive(Error, Debug)]
#[error("storage error on {path}: {source}")]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl StorageError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Job-level failure of one orchestrator run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("output video was not created: {0}")]
    OutputMissing(PathBuf),

    #[error("output video is empty: {0}")]
    OutputEmpty(PathBuf),

    #[error("writing output failed: {0}")]
    Sink(#[source] VideoError),

    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The loop ran but produced no usable output.
    pub fn is_processing_error(&self) -> bool {
        matches!(
            self,
            Self::OutputMissing(_) | Self::OutputEmpty(_) | Self::Sink(_)
        )
    }
}

/// A submission was refused before any job state was created.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("too many active jobs (limit {limit})")]
    Busy { limit: usize },

    #[error("output {path} belongs to a job that is still active")]
    OutputInUse { path: PathBuf },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
