use crate::config::MotionConfig;
use crate::devices::BoundingBox;

/// Area band a detection must fall in to count as motion. Smaller boxes are
/// sensor noise, larger ones are global lighting changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaFilter {
    pub min_area: u64,
    pub max_area: u64,
}

impl AreaFilter {
    pub fn accepts(&self, b: &BoundingBox) -> bool {
        let area = b.area();
        area >= self.min_area && area <= self.max_area
    }

    pub fn qualifying(&self, boxes: &[BoundingBox]) -> Vec<BoundingBox> {
        boxes.iter().filter(|b| self.accepts(b)).copied().collect()
    }
}

impl From<&MotionConfig> for AreaFilter {
    fn from(config: &MotionConfig) -> Self {
        Self {
            min_area: config.min_area as u64,
            max_area: config.max_area as u64,
        }
    }
}

/// Mean horizontal centre of the given boxes, `None` when there are none.
pub fn horizontal_centroid(boxes: &[BoundingBox]) -> Option<f64> {
    if boxes.is_empty() {
        return None;
    }
    let sum: f64 = boxes.iter().map(BoundingBox::center_x).sum();
    Some(sum / boxes.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> AreaFilter {
        AreaFilter::from(&MotionConfig::default())
    }

    #[test]
    fn test_area_band_is_inclusive() {
        let f = filter();
        assert!(!f.accepts(&BoundingBox::new(0, 0, 50, 79))); // 3950
        assert!(f.accepts(&BoundingBox::new(0, 0, 40, 100))); // 4000
        assert!(f.accepts(&BoundingBox::new(0, 0, 200, 200))); // 40000
        assert!(!f.accepts(&BoundingBox::new(0, 0, 201, 200)));
    }

    #[test]
    fn test_centroid_ignores_rejected_boxes() {
        let boxes = vec![
            BoundingBox::new(100, 0, 100, 100), // centre 150
            BoundingBox::new(0, 0, 5, 5),       // noise
            BoundingBox::new(300, 0, 100, 100), // centre 350
            BoundingBox::new(0, 0, 500, 300),   // whole frame
        ];
        let qualifying = filter().qualifying(&boxes);
        assert_eq!(qualifying.len(), 2);
        assert_eq!(horizontal_centroid(&qualifying), Some(250.0));
    }

    #[test]
    fn test_no_boxes_no_centroid() {
        assert_eq!(horizontal_centroid(&[]), None);
    }
}
