//! Builder for creating Detection objects from various box formats.

use crate::tracker::Detection;

/// Builds a [`Detection`] from whichever box convention a model emits.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: u32,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corners: `(x1, y1)` top-left, `(x2, y2)` bottom-right.
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Centre plus size, the usual YOLO head output.
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Scale every coordinate, e.g. from model input size back to frame size.
    pub fn scale(mut self, sx: f32, sy: f32) -> Self {
        self.x1 *= sx;
        self.x2 *= sx;
        self.y1 *= sy;
        self.y2 *= sy;
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn class_id(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn build(self) -> Detection {
        Detection::new(self.x1, self.y1, self.x2, self.y2, self.score, self.class_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xywh() {
        let det = DetectionBuilder::new()
            .xywh(50.0, 40.0, 20.0, 10.0)
            .score(0.95)
            .class_id(18)
            .build();

        assert_eq!(det.bbox.to_tlbr(), [40.0, 35.0, 60.0, 45.0]);
        assert_eq!(det.score, 0.95);
        assert_eq!(det.class_id, 18);
    }

    #[test]
    fn test_scale() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 10.0, 20.0, 20.0)
            .scale(2.0, 0.5)
            .build();
        assert_eq!(det.bbox.to_tlbr(), [20.0, 5.0, 40.0, 10.0]);
    }
}
