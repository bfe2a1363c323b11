//! Everything between a decoded frame and an annotated frame: detector
//! adapters, class filtering, per-frame tracking and the overlay.

mod annotator;
mod builder;
mod class_filter;
mod detector;
mod pipeline;
mod replay;

pub use annotator::{Annotator, AnnotatorStyle, LabelPlacement, Overlay};
pub use builder::DetectionBuilder;
pub use class_filter::{ClassFilter, filter_classes};
pub use detector::{Detector, FnDetector};
pub use pipeline::{ProcessedFrame, TrackerPipeline};
pub use replay::{ReplayDetector, ReplayError};

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnDetector, BurnDetectorError, BurnModel, RawDetection};
