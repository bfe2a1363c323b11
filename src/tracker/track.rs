//! A single tracked animal.

use ndarray::{Array1, Array2};
use tracing::warn;

use crate::tracker::kalman_filter::{KalmanFilter, mean_to_rect, measurement};
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

#[derive(Debug, Clone)]
pub struct Track {
    /// Unique within one tracker, never reused
    pub track_id: u64,
    pub state: TrackState,
    /// Number of detections this track has been matched with
    pub hits: u32,
    /// Confidence of the last matched detection
    pub score: f32,
    /// Class of the last matched detection
    pub class_id: u32,
    /// Frame the track was created on
    pub start_frame: u64,
    /// Frame of the last successful match
    pub last_matched_frame: u64,
    /// Last matched detection box
    pub bbox: Rect,
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl Track {
    /// Start a `Tentative` track from an unmatched detection.
    pub fn new(
        track_id: u64,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        frame_id: u64,
    ) -> Self {
        let (mean, covariance) = kalman_filter.initiate(measurement(&detection.bbox));
        Self {
            track_id,
            state: TrackState::Tentative,
            hits: 1,
            score: detection.score,
            class_id: detection.class_id,
            start_frame: frame_id,
            last_matched_frame: frame_id,
            bbox: detection.bbox,
            mean,
            covariance,
        }
    }

    /// Box the motion model expects on the current frame.
    pub fn predicted_rect(&self) -> Rect {
        mean_to_rect(&self.mean)
    }

    /// Frames since creation.
    pub fn age(&self, frame_id: u64) -> u64 {
        frame_id.saturating_sub(self.start_frame)
    }

    /// Frames since the last successful match.
    pub fn time_since_update(&self, frame_id: u64) -> u64 {
        frame_id.saturating_sub(self.last_matched_frame)
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        let mut mean = self.mean.clone();
        if self.state == TrackState::Lost {
            mean[7] = 0.0;
        }
        let (mean, covariance) = kalman_filter.predict(&mean, &self.covariance);
        self.mean = mean;
        self.covariance = covariance;
    }

    /// Absorb a matched detection; a second hit confirms the track.
    pub fn update(&mut self, detection: &Detection, kalman_filter: &KalmanFilter, frame_id: u64) {
        match kalman_filter.update(&self.mean, &self.covariance, measurement(&detection.bbox)) {
            Some((mean, covariance)) => {
                self.mean = mean;
                self.covariance = covariance;
            }
            None => warn!(
                track_id = self.track_id,
                frame = frame_id,
                "singular innovation covariance, keeping predicted state"
            ),
        }

        self.hits += 1;
        self.state = if self.hits >= 2 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        self.score = detection.score;
        self.class_id = detection.class_id;
        self.bbox = detection.bbox;
        self.last_matched_frame = frame_id;
    }

    pub fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let kf = KalmanFilter::new();
        let det = Detection::new(10.0, 10.0, 50.0, 50.0, 0.9, 18);
        let mut track = Track::new(7, &det, &kf, 3);
        assert_eq!(track.state, TrackState::Tentative);
        assert_eq!(track.age(3), 0);

        track.predict(&kf);
        track.mark_lost();
        assert_eq!(track.time_since_update(5), 2);

        track.predict(&kf);
        track.update(&det, &kf, 6);
        assert_eq!(track.state, TrackState::Confirmed);
        assert_eq!(track.time_since_update(6), 0);
        assert_eq!(track.age(6), 3);
        assert_eq!(track.track_id, 7);
    }

    #[test]
    fn test_prediction_starts_at_detection() {
        let kf = KalmanFilter::new();
        let det = Detection::new(10.0, 20.0, 50.0, 80.0, 0.9, 19);
        let track = Track::new(1, &det, &kf, 1);
        let predicted = track.predicted_rect();
        assert!((predicted.x - 10.0).abs() < 1e-3);
        assert!((predicted.height - 60.0).abs() < 1e-3);
    }
}
