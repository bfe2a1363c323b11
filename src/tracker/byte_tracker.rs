//! ByteTrack-style multi-object tracker.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, Detection, MatchStrategy};
use crate::tracker::rect::Rect;
use crate::tracker::track::Track;
use crate::tracker::track_state::TrackState;

/// Tracker thresholds, fixed for the lifetime of one tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this score take part in first association
    pub track_thresh: f32,
    /// Minimum score for an unmatched detection to start a new track
    pub new_track_thresh: f32,
    /// Minimum IoU between a predicted track box and a detection
    pub match_thresh: f32,
    /// Minimum IoU when recovering confirmed tracks with low-score detections
    pub low_match_thresh: f32,
    /// Consecutive missed frames a track survives (at 30 fps)
    pub track_buffer: u32,
    pub frame_rate: f32,
    pub match_strategy: MatchStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_thresh: 0.25,
            new_track_thresh: 0.35,
            match_thresh: 0.2,
            low_match_thresh: 0.5,
            track_buffer: 30,
            frame_rate: 30.0,
            match_strategy: MatchStrategy::Optimal,
        }
    }
}

/// A detection of the current frame tagged with the identity it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedDetection {
    pub detection: Detection,
    pub track_id: u64,
    pub state: TrackState,
}

pub struct ByteTracker {
    tracks: Vec<Track>,
    frame_id: u64,
    next_id: u64,
    config: TrackerConfig,
    max_time_lost: u64,
    kalman_filter: KalmanFilter,
}

/// Detection paired with its position in the detector output.
type Indexed = (usize, Detection);

impl ByteTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let max_time_lost = (config.frame_rate / 30.0 * config.track_buffer as f32) as u64;
        Self {
            tracks: Vec::new(),
            frame_id: 0,
            next_id: 1,
            config,
            max_time_lost,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of `update` calls so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Missed frames after which a track is evicted.
    pub fn max_time_lost(&self) -> u64 {
        self.max_time_lost
    }

    /// Live tracks, including `Lost` ones still inside the buffer.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Advance one frame.
    ///
    /// Returns the frame's detections that belong to a track, in detector
    /// order. Malformed detections are skipped with a warning, low-score
    /// detections that recover no confirmed track are dropped, and so are
    /// unmatched detections too weak to start a track.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection> {
        self.frame_id += 1;
        let frame_id = self.frame_id;

        let mut detections_high = Vec::new();
        let mut detections_low = Vec::new();
        for (idx, det) in detections.into_iter().enumerate() {
            if !det.is_well_formed() {
                warn!(frame = frame_id, detection = ?det, "rejecting malformed detection");
            } else if det.score >= self.config.track_thresh {
                detections_high.push((idx, det));
            } else {
                detections_low.push((idx, det));
            }
        }

        for track in &mut self.tracks {
            track.predict(&self.kalman_filter);
        }

        let mut matched = vec![false; self.tracks.len()];
        let mut output: Vec<(usize, TrackedDetection)> = Vec::new();

        // First association: confirmed and lost tracks against high-score detections
        let pool = self.pool(&matched, |t| t.state != TrackState::Tentative);
        let remaining_high = self.match_stage(
            &pool,
            detections_high,
            self.config.match_thresh,
            &mut matched,
            &mut output,
        );

        // Second association: low-score detections only keep confirmed tracks alive
        let pool = self.pool(&matched, |t| t.state == TrackState::Confirmed);
        self.match_stage(
            &pool,
            detections_low,
            self.config.low_match_thresh,
            &mut matched,
            &mut output,
        );

        // Tentative tracks, usually seen on a single frame so far
        let pool = self.pool(&matched, |t| t.state == TrackState::Tentative);
        let unmatched = self.match_stage(
            &pool,
            remaining_high,
            self.config.match_thresh,
            &mut matched,
            &mut output,
        );

        for (track, was_matched) in self.tracks.iter_mut().zip(&matched) {
            if !was_matched {
                track.mark_lost();
            }
        }

        let max_time_lost = self.max_time_lost;
        self.tracks.retain(|track| {
            let keep = track.time_since_update(frame_id) <= max_time_lost;
            if !keep {
                debug!(track_id = track.track_id, frame = frame_id, "evicting lost track");
            }
            keep
        });

        for (idx, det) in unmatched {
            if det.score < self.config.new_track_thresh {
                continue;
            }
            let track = Track::new(self.next_id, &det, &self.kalman_filter, frame_id);
            self.next_id += 1;
            debug!(track_id = track.track_id, frame = frame_id, "new tentative track");
            output.push((
                idx,
                TrackedDetection {
                    detection: det,
                    track_id: track.track_id,
                    state: track.state,
                },
            ));
            self.tracks.push(track);
        }

        output.sort_by_key(|(idx, _)| *idx);
        output.into_iter().map(|(_, tracked)| tracked).collect()
    }

    fn pool(&self, matched: &[bool], include: impl Fn(&Track) -> bool) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(i, t)| !matched[*i] && include(t))
            .map(|(i, _)| i)
            .collect()
    }

    /// Match `pool` tracks against `detections`, update the winners and
    /// return the detections left over.
    fn match_stage(
        &mut self,
        pool: &[usize],
        detections: Vec<Indexed>,
        min_iou: f32,
        matched: &mut [bool],
        output: &mut Vec<(usize, TrackedDetection)>,
    ) -> Vec<Indexed> {
        if detections.is_empty() {
            return detections;
        }

        let track_boxes: Vec<Rect> = pool
            .iter()
            .map(|&i| self.tracks[i].predicted_rect())
            .collect();
        let det_boxes: Vec<Rect> = detections.iter().map(|(_, d)| d.bbox).collect();
        let result = matching::associate(
            self.config.match_strategy,
            &track_boxes,
            &det_boxes,
            min_iou,
        );

        for (itrack, idet) in result.matches {
            let (idx, det) = detections[idet];
            let track = &mut self.tracks[pool[itrack]];
            track.update(&det, &self.kalman_filter, self.frame_id);
            matched[pool[itrack]] = true;
            output.push((
                idx,
                TrackedDetection {
                    detection: det,
                    track_id: track.track_id,
                    state: track.state,
                },
            ));
        }

        result
            .unmatched_detections
            .into_iter()
            .map(|idet| detections[idet])
            .collect()
    }
}
