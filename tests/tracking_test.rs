use herdtrack::integration::{Annotator, AnnotatorStyle};
use herdtrack::{ByteTracker, Detection, TrackState, TrackerConfig};

const SHEEP: u32 = 18;

fn sheep(x1: f32, y1: f32, score: f32) -> Detection {
    Detection::new(x1, y1, x1 + 100.0, y1 + 100.0, score, SHEEP)
}

#[test]
fn test_basic_tracking() {
    let mut tracker = ByteTracker::new(TrackerConfig::default());

    // Frame 1: a new track is started straight away
    let tracks1 = tracker.update(vec![sheep(100.0, 100.0, 0.9)]);
    assert_eq!(tracks1.len(), 1);
    assert_eq!(tracks1[0].state, TrackState::Tentative);
    let id1 = tracks1[0].track_id;

    // Frame 2: same object moved slightly, second hit confirms it
    let tracks2 = tracker.update(vec![sheep(105.0, 105.0, 0.9)]);
    assert_eq!(tracks2.len(), 1);
    assert_eq!(tracks2[0].track_id, id1);
    assert_eq!(tracks2[0].state, TrackState::Confirmed);

    // Frame 3: partially occluded, low score is recovered by the second association
    let tracks3 = tracker.update(vec![sheep(110.0, 110.0, 0.2)]);
    assert_eq!(tracks3.len(), 1);
    assert_eq!(tracks3[0].track_id, id1);

    // Frame 4: object disappears
    let tracks4 = tracker.update(vec![]);
    assert!(tracks4.is_empty());
    assert_eq!(tracker.tracks()[0].state, TrackState::Lost);

    // Frame 5: object reappears within the buffer
    let tracks5 = tracker.update(vec![sheep(115.0, 115.0, 0.9)]);
    assert_eq!(tracks5.len(), 1);
    assert_eq!(tracks5[0].track_id, id1);
}

#[test]
fn test_static_animal_through_ten_frames() {
    let config = TrackerConfig {
        match_thresh: 0.3,
        ..TrackerConfig::default()
    };
    let mut tracker = ByteTracker::new(config);
    let annotator = Annotator::new(AnnotatorStyle::default(), None);
    let present = 2..=8u64;

    let mut ids = Vec::new();
    for frame in 1..=10u64 {
        let detections = if present.contains(&frame) {
            vec![sheep(100.0, 100.0, 0.9)]
        } else {
            vec![]
        };
        let tracked = tracker.update(detections);
        let overlay = annotator.layout(&tracked);

        if present.contains(&frame) {
            assert_eq!(tracked.len(), 1, "frame {frame}");
            assert_eq!(overlay.total_text, "Total Animals: 1");
            ids.push(tracked[0].track_id);
        } else {
            assert!(tracked.is_empty(), "frame {frame}");
            assert_eq!(overlay.total_text, "Total Animals: 0");
        }
    }

    assert_eq!(ids.len(), 7);
    assert!(ids.iter().all(|&id| id == ids[0]));
    assert_eq!(tracker.tracks().len(), 1);
    assert_eq!(tracker.tracks()[0].start_frame, 2);

    // Remembered for exactly `track_buffer` frames after the last sighting
    let last_seen = 8;
    while tracker.frame_id() < last_seen + tracker.max_time_lost() {
        tracker.update(vec![]);
    }
    assert_eq!(tracker.tracks().len(), 1);
    assert_eq!(tracker.tracks()[0].state, TrackState::Lost);

    tracker.update(vec![]);
    assert!(tracker.tracks().is_empty());
}

#[test]
fn test_ids_are_never_reused() {
    let config = TrackerConfig {
        track_buffer: 1,
        ..TrackerConfig::default()
    };
    let mut tracker = ByteTracker::new(config);

    let first = tracker.update(vec![sheep(10.0, 10.0, 0.9)]);
    tracker.update(vec![]);
    tracker.update(vec![]);
    assert!(tracker.tracks().is_empty());

    let second = tracker.update(vec![sheep(10.0, 10.0, 0.9)]);
    assert_eq!(first[0].track_id, 1);
    assert_eq!(second[0].track_id, 2);
}

#[test]
fn test_trackers_are_independent() {
    let mut a = ByteTracker::new(TrackerConfig::default());
    let mut b = ByteTracker::new(TrackerConfig::default());

    a.update(vec![sheep(10.0, 10.0, 0.9), sheep(300.0, 10.0, 0.9)]);
    let tracked = b.update(vec![sheep(10.0, 10.0, 0.9)]);
    assert_eq!(tracked[0].track_id, 1);
}

#[test]
fn test_two_animals_keep_their_ids() {
    let mut tracker = ByteTracker::new(TrackerConfig::default());

    let mut left_id = None;
    let mut right_id = None;
    for step in 0..6 {
        let dx = step as f32 * 4.0;
        let tracked = tracker.update(vec![
            sheep(400.0 - dx, 50.0, 0.8),
            sheep(10.0 + dx, 50.0, 0.9),
        ]);
        assert_eq!(tracked.len(), 2);
        // Output follows detector order
        let (right, left) = (tracked[0].track_id, tracked[1].track_id);
        assert_eq!(*right_id.get_or_insert(right), right);
        assert_eq!(*left_id.get_or_insert(left), left);
    }
    assert_ne!(left_id, right_id);
}
