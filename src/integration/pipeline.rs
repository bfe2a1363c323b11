//! TrackerPipeline for combining detection with tracking and annotation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Annotator, ClassFilter, Detector};
use crate::error::FrameError;
use crate::tracker::{ByteTracker, TrackedDetection, TrackerConfig};
use crate::video::Frame;

/// Result of pushing one frame through the chain.
#[derive(Debug)]
pub struct ProcessedFrame {
    /// Annotated copy, or the untouched input when `fault` is set
    pub frame: Frame,
    pub tracked: Vec<TrackedDetection>,
    pub fault: Option<FrameError>,
}

/// Detect, filter, track and annotate, one frame at a time.
///
/// Owns the tracker, so one pipeline serves exactly one video.
pub struct TrackerPipeline<D: Detector> {
    detector: Arc<D>,
    filter: ClassFilter,
    tracker: ByteTracker,
    annotator: Arc<Annotator>,
}

impl<D: Detector> TrackerPipeline<D> {
    pub fn new(
        detector: Arc<D>,
        filter: ClassFilter,
        config: TrackerConfig,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            detector,
            filter,
            tracker: ByteTracker::new(config),
            annotator,
        }
    }

    /// Detection, class filter and tracker update.
    ///
    /// A detector failure, panics included, leaves the tracker untouched for
    /// this frame.
    pub fn track_frame(&mut self, frame: &Frame) -> Result<Vec<TrackedDetection>, FrameError> {
        let detector = &self.detector;
        let detections = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)))
            .map_err(|payload| {
                FrameError::Detection(format!("detector panicked: {}", panic_message(&*payload)))
            })?
            .map_err(|e| FrameError::Detection(e.to_string()))?;
        let detections = self.filter.apply(detections);
        Ok(self.tracker.update(detections))
    }

    /// Full per-frame chain; never fails, a faulty frame comes back as it went in.
    pub fn process_frame(&mut self, frame: Frame) -> ProcessedFrame {
        let tracked = match self.track_frame(&frame) {
            Ok(tracked) => tracked,
            Err(fault) => {
                warn!(frame = frame.index, error = %fault, "detection failed, writing frame unannotated");
                return ProcessedFrame {
                    frame,
                    tracked: Vec::new(),
                    fault: Some(fault),
                };
            }
        };

        match self.annotator.try_annotate(&frame, &tracked) {
            Ok(annotated) => {
                debug!(frame = frame.index, tracked = tracked.len(), "frame annotated");
                ProcessedFrame {
                    frame: annotated,
                    tracked,
                    fault: None,
                }
            }
            Err(fault) => {
                warn!(frame = frame.index, error = %fault, "annotation failed, writing frame unannotated");
                ProcessedFrame {
                    frame,
                    tracked,
                    fault: Some(fault),
                }
            }
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn tracker(&self) -> &ByteTracker {
        &self.tracker
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{AnnotatorStyle, FnDetector};
    use crate::tracker::Detection;
    use image::RgbImage;
    use std::io;

    fn pipeline<F>(detect: F) -> TrackerPipeline<FnDetector<F, io::Error>>
    where
        F: Fn(&Frame) -> Result<Vec<Detection>, io::Error> + Send + Sync,
    {
        TrackerPipeline::new(
            Arc::new(FnDetector::new(detect)),
            ClassFilter::new([18, 19], 0.25),
            TrackerConfig::default(),
            Arc::new(Annotator::new(AnnotatorStyle::default(), None)),
        )
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, 30.0, RgbImage::new(160, 120))
    }

    #[test]
    fn test_filters_then_tracks() {
        let mut pipeline = pipeline(|_| {
            Ok(vec![
                Detection::new(10.0, 40.0, 50.0, 90.0, 0.9, 18),
                Detection::new(80.0, 40.0, 120.0, 90.0, 0.9, 16),
            ])
        });

        let first = pipeline.process_frame(frame(0));
        assert!(first.fault.is_none());
        assert_eq!(first.tracked.len(), 1);
        assert_eq!(first.tracked[0].detection.class_id, 18);

        let second = pipeline.process_frame(frame(1));
        assert_eq!(second.tracked[0].track_id, first.tracked[0].track_id);
        assert_eq!(pipeline.tracker().tracks().len(), 1);
    }

    #[test]
    fn test_detector_failure_passes_frame_through() {
        let mut pipeline = pipeline(|frame| {
            if frame.index == 1 {
                Err(io::Error::other("model crashed"))
            } else {
                Ok(vec![Detection::new(10.0, 40.0, 50.0, 90.0, 0.9, 18)])
            }
        });

        pipeline.process_frame(frame(0));
        let failed = pipeline.process_frame(frame(1));
        assert!(matches!(failed.fault, Some(FrameError::Detection(_))));
        assert!(failed.tracked.is_empty());
        assert!(failed.frame.image.pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(pipeline.tracker().frame_id(), 1);

        let recovered = pipeline.process_frame(frame(2));
        assert!(recovered.fault.is_none());
        assert_eq!(recovered.tracked[0].track_id, 1);
    }

    #[test]
    fn test_detector_panic_is_contained_to_its_frame() {
        let mut pipeline = pipeline(|frame| {
            if frame.index == 1 {
                panic!("tensor shape mismatch");
            }
            Ok(vec![Detection::new(10.0, 40.0, 50.0, 90.0, 0.9, 18)])
        });

        let first = pipeline.process_frame(frame(0));
        let crashed = pipeline.process_frame(frame(1));
        match crashed.fault {
            Some(FrameError::Detection(message)) => {
                assert!(message.contains("tensor shape mismatch"))
            }
            other => panic!("expected detection fault, got {other:?}"),
        }
        assert!(crashed.tracked.is_empty());
        assert!(crashed.frame.image.pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(pipeline.tracker().frame_id(), 1);

        let recovered = pipeline.process_frame(frame(2));
        assert!(recovered.fault.is_none());
        assert_eq!(recovered.tracked[0].track_id, first.tracked[0].track_id);
    }

    #[test]
    fn test_default_config_recovers_track_from_low_score_detection() {
        let config = crate::Config::default();
        let scores = [0.9, 0.9, 0.15];
        let mut pipeline = TrackerPipeline::new(
            Arc::new(FnDetector::new(move |frame: &Frame| {
                let x = 10.0 + 2.0 * frame.index as f32;
                let score = scores[frame.index as usize];
                Ok::<_, io::Error>(vec![Detection::new(x, 40.0, x + 40.0, 90.0, score, 18)])
            })),
            config.class_filter(),
            config.to_tracker_config(),
            Arc::new(Annotator::new(AnnotatorStyle::default(), None)),
        );

        let id = pipeline.process_frame(frame(0)).tracked[0].track_id;
        pipeline.process_frame(frame(1));
        let weak = pipeline.process_frame(frame(2));
        assert_eq!(weak.tracked.len(), 1);
        assert_eq!(weak.tracked[0].track_id, id);
    }
}
