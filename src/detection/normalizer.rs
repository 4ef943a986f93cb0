// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 原始检测框 → 规范化检测结果

use super::types::{Detection, RawBox};
use crate::error::Result;

pub struct DetectionNormalizer;

impl DetectionNormalizer {
    /// 按接收顺序逐个转换, 不重新排序
    pub fn normalize(boxes: &[RawBox], names: &[String]) -> Result<Vec<Detection>> {
        boxes
            .iter()
            .map(|b| {
                let class_name = names
                    .get(b.class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", b.class_id));
                Detection::new(class_name, b.class_id, b.confidence, [b.x1, b.y1, b.x2, b.y2])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stub::raw;

    fn names() -> Vec<String> {
        vec!["uniforme_senati".to_string()]
    }

    #[test]
    fn test_normalize_count_and_geometry() {
        let boxes = vec![
            raw(10.0, 10.0, 50.0, 90.0, 0.31234, 0),
            raw(100.5, 20.25, 180.0, 60.75, 0.9999, 0),
            raw(0.0, 0.0, 3.0, 1.0, 0.5, 0),
        ];
        let dets = DetectionNormalizer::normalize(&boxes, &names()).unwrap();
        assert_eq!(dets.len(), boxes.len());

        for d in &dets {
            let [x1, y1, x2, y2] = d.bbox();
            let [w, h] = d.size();
            assert_eq!([w, h], [x2 - x1, y2 - y1]);
            assert_eq!(d.center(), [x1 + w / 2.0, y1 + h / 2.0]);
        }
        assert_eq!(dets[0].confidence(), 0.312);
        assert_eq!(dets[1].confidence(), 1.0);
    }

    #[test]
    fn test_normalize_preserves_engine_order() {
        let boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.3, 0),
            raw(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            raw(0.0, 0.0, 10.0, 10.0, 0.6, 0),
        ];
        let dets = DetectionNormalizer::normalize(&boxes, &names()).unwrap();
        let confs: Vec<f32> = dets.iter().map(|d| d.confidence()).collect();
        assert_eq!(confs, vec![0.3, 0.9, 0.6]);
    }

    #[test]
    fn test_normalize_unknown_class_and_degenerate() {
        let dets = DetectionNormalizer::normalize(&[raw(0.0, 0.0, 1.0, 1.0, 0.5, 7)], &names()).unwrap();
        assert_eq!(dets[0].class_name(), "class_7");

        assert!(DetectionNormalizer::normalize(&[raw(5.0, 0.0, 5.0, 1.0, 0.5, 0)], &names()).is_err());
    }
}
