//! Detector that replays precomputed detections from a JSON Lines file.
//!
//! One line per frame:
//!
//! ```text
//! {"frame": 0, "detections": [{"bbox": [x1, y1, x2, y2], "confidence": 0.9, "class_id": 18}]}
//! ```
//!
//! Frames with no line get no detections; several lines for the same frame
//! are concatenated.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::{DetectionBuilder, Detector};
use crate::tracker::Detection;
use crate::video::Frame;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("cannot read detections {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct FrameRecord {
    frame: u64,
    #[serde(default)]
    detections: Vec<BoxRecord>,
}

#[derive(Deserialize)]
struct BoxRecord {
    bbox: [f32; 4],
    confidence: f32,
    class_id: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn from_path(path: &Path) -> Result<Self, ReplayError> {
        let file = File::open(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            ReplayError::Io { source, .. } => ReplayError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, ReplayError> {
        let mut frames: HashMap<u64, Vec<Detection>> = HashMap::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReplayError::Io {
                path: PathBuf::new(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FrameRecord = serde_json::from_str(&line)
                .map_err(|source| ReplayError::Parse { line: i + 1, source })?;
            frames
                .entry(record.frame)
                .or_default()
                .extend(record.detections.into_iter().map(|b| {
                    let [x1, y1, x2, y2] = b.bbox;
                    DetectionBuilder::new()
                        .tlbr(x1, y1, x2, y2)
                        .score(b.confidence)
                        .class_id(b.class_id)
                        .build()
                }));
        }
        Ok(Self { frames })
    }

    /// Number of frames with at least one line.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    type Error = Infallible;

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    const LINES: &str = r#"{"frame": 0, "detections": [{"bbox": [10, 20, 50, 80], "confidence": 0.9, "class_id": 18}]}

{"frame": 2, "detections": []}
{"frame": 0, "detections": [{"bbox": [100, 20, 150, 80], "confidence": 0.4, "class_id": 16}]}
"#;

    #[test]
    fn test_replays_by_frame_index() {
        let detector = ReplayDetector::from_reader(LINES.as_bytes()).unwrap();
        assert_eq!(detector.len(), 2);

        let frame0 = Frame::new(0, 30.0, RgbImage::new(4, 4));
        let dets = detector.detect(&frame0).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox.to_tlbr(), [10.0, 20.0, 50.0, 80.0]);
        assert_eq!(dets[1].class_id, 16);

        let frame7 = Frame::new(7, 30.0, RgbImage::new(4, 4));
        assert!(detector.detect(&frame7).unwrap().is_empty());
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let input = "{\"frame\": 0}\nnot json\n";
        match ReplayDetector::from_reader(input.as_bytes()) {
            Err(ReplayError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
