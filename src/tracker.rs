mod byte_tracker;
mod kalman_filter;
mod matching;
mod rect;
mod track;
mod track_state;

pub use byte_tracker::{ByteTracker, TrackedDetection, TrackerConfig};
pub use kalman_filter::KalmanFilter;
pub use matching::{AssignmentResult, Detection, MatchStrategy, associate};
pub use rect::{Rect, iou_batch};
pub use track::Track;
pub use track_state::TrackState;
