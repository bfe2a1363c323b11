use serde::{Deserialize, Serialize};

/// Lifecycle of a track.
///
/// `Tentative` tracks were seen once, `Confirmed` tracks matched at least
/// twice, `Lost` tracks missed one or more consecutive frames but are still
/// inside the track buffer. Eviction past the buffer is terminal and leaves no
/// state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    #[default]
    Tentative,
    Confirmed,
    Lost,
}
