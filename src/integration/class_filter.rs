use std::collections::HashSet;

use crate::tracker::Detection;

/// Keep only detections whose class is in `allowed`, preserving order.
pub fn filter_classes(detections: Vec<Detection>, allowed: &HashSet<u32>) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| allowed.contains(&d.class_id))
        .collect()
}

/// Class allow-list plus the detector confidence floor.
#[derive(Debug, Clone)]
pub struct ClassFilter {
    allowed: HashSet<u32>,
    min_confidence: f32,
}

impl ClassFilter {
    pub fn new(allowed: impl IntoIterator<Item = u32>, min_confidence: f32) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            min_confidence,
        }
    }

    pub fn allowed(&self) -> &HashSet<u32> {
        &self.allowed
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        filter_classes(detections, &self.allowed)
            .into_iter()
            .filter(|d| d.score >= self.min_confidence)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEEP: u32 = 18;
    const COW: u32 = 19;
    const DOG: u32 = 16;

    fn det(class_id: u32, score: f32) -> Detection {
        Detection::new(0.0, 0.0, 10.0, 10.0, score, class_id)
    }

    #[test]
    fn test_drops_only_disallowed_classes() {
        let allowed = HashSet::from([SHEEP, COW]);
        let input = vec![det(SHEEP, 0.9), det(DOG, 0.9), det(COW, 0.4), det(DOG, 0.2), det(SHEEP, 0.1)];
        let output = filter_classes(input, &allowed);
        let classes: Vec<_> = output.iter().map(|d| d.class_id).collect();
        assert_eq!(classes, vec![SHEEP, COW, SHEEP]);
    }

    #[test]
    fn test_empty_input() {
        assert!(filter_classes(vec![], &HashSet::from([SHEEP])).is_empty());
    }

    #[test]
    fn test_confidence_floor() {
        let filter = ClassFilter::new([SHEEP, COW], 0.25);
        let output = filter.apply(vec![det(SHEEP, 0.9), det(COW, 0.1), det(DOG, 0.9)]);
        assert_eq!(output, vec![det(SHEEP, 0.9)]);
    }
}
