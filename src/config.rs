//! Runtime configuration: TOML file, then environment overrides, then defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::integration::{Annotator, AnnotatorStyle, ClassFilter};
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub tracking: TrackerConfig,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
    pub annotation: AnnotationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detector class ids that are tracked (COCO: 18 sheep, 19 cow)
    pub selected_classes: Vec<u32>,
    /// Floor applied before tracking. Detections between this and
    /// `tracking.track_thresh` only feed the low-score association.
    pub confidence_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            selected_classes: vec![18, 19],
            confidence_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Where job records are mirrored as `<job_id>.json`; unset keeps them in memory only
    pub progress_dir: Option<PathBuf>,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub retention_hours: u64,
    pub sweep_interval_minutes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("processed"),
            progress_dir: None,
            allowed_extensions: ["mp4", "avi", "mov", "wmv"].map(String::from).to_vec(),
            max_upload_bytes: 100 * 1024 * 1024,
            retention_hours: 24,
            sweep_interval_minutes: 60,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs running at once; the rest wait as `pending`
    pub max_concurrent_jobs: usize,
    /// Pending plus running jobs before submissions are refused
    pub max_active_jobs: usize,
    pub progress_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_active_jobs: 16,
            progress_interval_ms: 1000,
        }
    }
}

impl JobsConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// TrueType/OpenType font replacing the bundled one
    pub font_path: Option<PathBuf>,
    #[serde(flatten)]
    pub style: AnnotatorStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Env {
            key: key.to_string(),
            value,
        }),
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")))
    }
}

impl Config {
    /// Read `path` if given, apply process environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply deployment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = parse_env(&lookup, "MODEL_CONFIDENCE")? {
            self.detection.confidence_threshold = v;
        }
        if let Some(v) = parse_env::<f32>(&lookup, "TRACK_THRESH")? {
            self.tracking.track_thresh = v;
            self.tracking.new_track_thresh = (v + 0.1).min(1.0);
        }
        if let Some(v) = parse_env(&lookup, "TRACK_BUFFER")? {
            self.tracking.track_buffer = v;
        }
        if let Some(v) = parse_env(&lookup, "MATCH_THRESH")? {
            self.tracking.match_thresh = v;
        }
        if let Some(v) = parse_env(&lookup, "FRAME_RATE")? {
            self.tracking.frame_rate = v;
        }
        if let Some(v) = parse_env(&lookup, "MAX_CONTENT_LENGTH")? {
            self.storage.max_upload_bytes = v;
        }
        if let Some(v) = lookup("UPLOAD_FOLDER") {
            self.storage.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROCESSED_FOLDER") {
            self.storage.processed_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("detection.confidence_threshold", self.detection.confidence_threshold)?;
        check_unit("tracking.track_thresh", self.tracking.track_thresh)?;
        check_unit("tracking.new_track_thresh", self.tracking.new_track_thresh)?;
        check_unit("tracking.match_thresh", self.tracking.match_thresh)?;
        check_unit("tracking.low_match_thresh", self.tracking.low_match_thresh)?;

        if !(self.tracking.frame_rate.is_finite() && self.tracking.frame_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tracking.frame_rate must be positive, got {}",
                self.tracking.frame_rate
            )));
        }
        if self.detection.selected_classes.is_empty() {
            return Err(ConfigError::Invalid("detection.selected_classes is empty".to_string()));
        }
        if self.storage.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("storage.allowed_extensions is empty".to_string()));
        }
        if self.jobs.max_concurrent_jobs == 0 || self.jobs.max_active_jobs == 0 {
            return Err(ConfigError::Invalid("job limits must be at least 1".to_string()));
        }
        if !self.low_score_association_enabled() {
            warn!(
                confidence_threshold = self.detection.confidence_threshold,
                track_thresh = self.tracking.track_thresh,
                "detection floor is not below track_thresh, low-score association never runs"
            );
        }
        Ok(())
    }

    /// Whether any detection can pass the class filter and still score below
    /// `track_thresh`.
    pub fn low_score_association_enabled(&self) -> bool {
        self.detection.confidence_threshold < self.tracking.track_thresh
    }

    /// Thresholds for one job's tracker.
    pub fn to_tracker_config(&self) -> TrackerConfig {
        self.tracking.clone()
    }

    pub fn class_filter(&self) -> ClassFilter {
        ClassFilter::new(
            self.detection.selected_classes.iter().copied(),
            self.detection.confidence_threshold,
        )
    }

    pub fn annotator(&self) -> Result<Annotator, ConfigError> {
        let font = self
            .annotation
            .font_path
            .as_deref()
            .map(Annotator::load_font)
            .transpose()?;
        Ok(Annotator::new(self.annotation.style.clone(), font))
    }
}
