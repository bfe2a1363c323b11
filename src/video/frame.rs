use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 0-based position in the source video
    pub index: u64,
    /// Presentation time derived from the stream frame rate
    pub timestamp: Duration,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, fps: f64, image: RgbImage) -> Self {
        let timestamp = if fps > 0.0 {
            Duration::from_secs_f64(index as f64 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            index,
            timestamp,
            image,
        }
    }

    /// Same index and timestamp, different pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            index: self.index,
            timestamp: self.timestamp,
            image,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Stream properties, read once when a job starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub frame_count: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn duration(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(self.frame_count as f64 / self.fps)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_fps() {
        let frame = Frame::new(45, 30.0, RgbImage::new(4, 2));
        assert_eq!(frame.timestamp, Duration::from_millis(1500));
        assert_eq!(frame.resolution(), (4, 2));
    }

    #[test]
    fn test_duration() {
        let meta = VideoMetadata {
            frame_count: 90,
            fps: 30.0,
            width: 640,
            height: 480,
        };
        assert_eq!(meta.duration(), Duration::from_secs(3));
    }
}
