//! Detection input and track/detection association.

use std::cmp::Ordering;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::{Rect, iou_batch};

/// One raw detector output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in pixel coordinates
    pub bbox: Rect,
    /// Detector confidence in `[0, 1]`
    pub score: f32,
    /// Detector class id
    pub class_id: u32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: u32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
            class_id,
        }
    }

    pub fn from_rect(bbox: Rect, score: f32, class_id: u32) -> Self {
        Self {
            bbox,
            score,
            class_id,
        }
    }

    /// Finite box with `x1 < x2`, `y1 < y2`, non-negative origin, and a
    /// confidence inside `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_well_formed() && (0.0..=1.0).contains(&self.score)
    }
}

/// How tracks are paired with detections once IoUs are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Globally optimal assignment (Jonker-Volgenant).
    #[default]
    Optimal,
    /// Highest-overlap pairs first.
    Greedy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    /// `(track index, detection index)` pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Pair `track_boxes` with `det_boxes`; a pair is only accepted when its IoU
/// is at least `min_iou`. Every index appears in exactly one output list.
pub fn associate(
    strategy: MatchStrategy,
    track_boxes: &[Rect],
    det_boxes: &[Rect],
    min_iou: f32,
) -> AssignmentResult {
    let ious = iou_batch(track_boxes, det_boxes);
    match strategy {
        MatchStrategy::Optimal => linear_assignment(&iou_distance(&ious), 1.0 - min_iou),
        MatchStrategy::Greedy => greedy_assignment(&ious, min_iou),
    }
}

/// Cost matrix `1 - IoU`.
pub fn iou_distance(ious: &Array2<f32>) -> Array2<f32> {
    ious.mapv(|iou| 1.0 - iou)
}

fn unmatched_only(num_rows: usize, num_cols: usize) -> AssignmentResult {
    AssignmentResult {
        matches: vec![],
        unmatched_tracks: (0..num_rows).collect(),
        unmatched_detections: (0..num_cols).collect(),
    }
}

fn collect_unmatched(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &unmatched)| unmatched.then_some(i))
        .collect()
}

/// Minimum-cost assignment; pairs costing more than `thresh` are rejected.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    if num_rows == 0 || num_cols == 0 {
        return unmatched_only(num_rows, num_cols);
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
    for ((i, j), cost) in cost_matrix.indexed_iter() {
        padded[[i, j]] = f64::from(*cost);
    }

    let Ok((row_to_col, _)) = lapjv::lapjv(&padded) else {
        return unmatched_only(num_rows, num_cols);
    };

    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut unmatched_detections_mask = vec![true; num_cols];

    for (row_idx, &col_idx) in row_to_col.iter().enumerate().take(num_rows) {
        if col_idx < num_cols && cost_matrix[[row_idx, col_idx]] <= thresh {
            matches.push((row_idx, col_idx));
            unmatched_detections_mask[col_idx] = false;
        } else {
            unmatched_tracks.push(row_idx);
        }
    }

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections: collect_unmatched(&unmatched_detections_mask),
    }
}

/// Walk pairs in descending IoU order, taking each pair whose track and
/// detection are both still free. Ties keep row-major order.
pub fn greedy_assignment(ious: &Array2<f32>, min_iou: f32) -> AssignmentResult {
    let (num_rows, num_cols) = ious.dim();

    let mut pairs: Vec<(f32, usize, usize)> = ious
        .indexed_iter()
        .filter(|(_, iou)| **iou >= min_iou)
        .map(|((i, j), iou)| (*iou, i, j))
        .collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut free_tracks = vec![true; num_rows];
    let mut free_detections = vec![true; num_cols];
    let mut matches = vec![];

    for (_, i, j) in pairs {
        if free_tracks[i] && free_detections[j] {
            free_tracks[i] = false;
            free_detections[j] = false;
            matches.push((i, j));
        }
    }
    matches.sort_unstable();

    AssignmentResult {
        matches,
        unmatched_tracks: collect_unmatched(&free_tracks),
        unmatched_detections: collect_unmatched(&free_detections),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> (Vec<Rect>, Vec<Rect>) {
        let tracks = vec![
            Rect::new(0.0, 0.0, 10.0, 10.0),
            Rect::new(100.0, 100.0, 10.0, 10.0),
        ];
        let dets = vec![
            Rect::new(101.0, 101.0, 10.0, 10.0),
            Rect::new(500.0, 500.0, 10.0, 10.0),
            Rect::new(1.0, 0.0, 10.0, 10.0),
        ];
        (tracks, dets)
    }

    #[test]
    fn test_optimal_assignment() {
        let (tracks, dets) = boxes();
        let result = associate(MatchStrategy::Optimal, &tracks, &dets, 0.3);
        let mut matches = result.matches.clone();
        matches.sort_unstable();
        assert_eq!(matches, vec![(0, 2), (1, 0)]);
        assert!(result.unmatched_tracks.is_empty());
        assert_eq!(result.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_greedy_assignment() {
        let (tracks, dets) = boxes();
        let result = associate(MatchStrategy::Greedy, &tracks, &dets, 0.3);
        assert_eq!(result.matches, vec![(0, 2), (1, 0)]);
        assert_eq!(result.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_greedy_prefers_highest_overlap() {
        let tracks = vec![Rect::new(0.0, 0.0, 10.0, 10.0)];
        let dets = vec![Rect::new(3.0, 0.0, 10.0, 10.0), Rect::new(1.0, 0.0, 10.0, 10.0)];
        let result = associate(MatchStrategy::Greedy, &tracks, &dets, 0.1);
        assert_eq!(result.matches, vec![(0, 1)]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_threshold_rejects_weak_overlap() {
        let tracks = vec![Rect::new(0.0, 0.0, 10.0, 10.0)];
        let dets = vec![Rect::new(5.0, 5.0, 10.0, 10.0)];
        for strategy in [MatchStrategy::Optimal, MatchStrategy::Greedy] {
            let result = associate(strategy, &tracks, &dets, 0.3);
            assert!(result.matches.is_empty());
            assert_eq!(result.unmatched_tracks, vec![0]);
            assert_eq!(result.unmatched_detections, vec![0]);
        }
    }

    #[test]
    fn test_empty_sides() {
        let tracks = vec![Rect::new(0.0, 0.0, 10.0, 10.0)];
        let result = associate(MatchStrategy::Optimal, &tracks, &[], 0.3);
        assert_eq!(result.unmatched_tracks, vec![0]);
        let result = associate(MatchStrategy::Greedy, &[], &tracks, 0.3);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_detection_well_formed() {
        assert!(Detection::new(0.0, 0.0, 5.0, 5.0, 0.5, 18).is_well_formed());
        assert!(!Detection::new(0.0, 0.0, 5.0, 5.0, 1.5, 18).is_well_formed());
        assert!(!Detection::new(0.0, 0.0, 5.0, 5.0, f32::NAN, 18).is_well_formed());
    }
}
