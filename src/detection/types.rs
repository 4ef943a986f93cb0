// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测系统数据结构定义
//! Data structures for the detection pipeline

use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

// ========== 公共常量 ==========

/// YOLOv8推理输入尺寸
pub const INF_SIZE: u32 = 640;

/// 默认置信度阈值
pub const DEFAULT_CONF: f32 = 0.25;

/// 默认NMS IoU阈值
pub const DEFAULT_IOU: f32 = 0.45;

// ========== 数据结构 ==========

/// 检测阈值 (confidence, IoU), 两者均在 [0, 1] 区间内
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionThreshold {
    confidence: f32,
    iou: f32,
}

impl DetectionThreshold {
    pub fn new(confidence: f32, iou: f32) -> Result<Self> {
        Ok(Self {
            confidence: DetectError::check_unit_range("confidence", confidence)?,
            iou: DetectError::check_unit_range("iou", iou)?,
        })
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn iou(&self) -> f32 {
        self.iou
    }

    /// 替换置信度, 越界时保持原值不变
    pub fn with_confidence(self, confidence: f32) -> Result<Self> {
        Self::new(confidence, self.iou)
    }
}

impl Default for DetectionThreshold {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONF,
            iou: DEFAULT_IOU,
        }
    }
}

/// 推理引擎输出的原始检测框 (原图像素坐标, 左上/右下)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl RawBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &RawBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// 规范化后的检测结果
///
/// 不变量: `x1 < x2 && y1 < y2`, `confidence` 保留三位小数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    class_name: String,
    class_id: usize,
    confidence: f32,
    bbox: [f32; 4],
    bbox_center: [f32; 2],
    bbox_size: [f32; 2],
}

impl Detection {
    pub fn new(class_name: String, class_id: usize, confidence: f32, bbox: [f32; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = bbox;
        if !(x1 < x2 && y1 < y2) {
            return Err(DetectError::internal(format!(
                "degenerate bbox [{x1}, {y1}, {x2}, {y2}]"
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DetectError::internal(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        let width = x2 - x1;
        let height = y2 - y1;
        Ok(Self {
            class_name,
            class_id,
            confidence: round_to(confidence, 3),
            bbox,
            bbox_center: [x1 + width / 2.0, y1 + height / 2.0],
            bbox_size: [width, height],
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> [f32; 4] {
        self.bbox
    }

    pub fn center(&self) -> [f32; 2] {
        self.bbox_center
    }

    pub fn size(&self) -> [f32; 2] {
        self.bbox_size
    }
}

/// 四舍五入到指定小数位
pub fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f64.powi(decimals);
    ((value as f64 * factor).round() / factor) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rejects_out_of_range() {
        assert!(DetectionThreshold::new(1.5, 0.45).is_err());
        assert!(DetectionThreshold::new(0.5, -0.1).is_err());

        let th = DetectionThreshold::new(0.3, 0.5).unwrap();
        assert!(th.with_confidence(2.0).is_err());
        assert_eq!(th.with_confidence(0.9).unwrap().confidence(), 0.9);
        assert_eq!(th.iou(), 0.5);
    }

    #[test]
    fn test_detection_geometry() {
        let det = Detection::new("uniforme_senati".into(), 0, 0.85432, [10.0, 20.0, 110.0, 70.0])
            .unwrap();
        assert_eq!(det.size(), [100.0, 50.0]);
        assert_eq!(det.center(), [60.0, 45.0]);
        assert_eq!(det.confidence(), 0.854);
    }

    #[test]
    fn test_detection_rejects_degenerate_bbox() {
        assert!(Detection::new("x".into(), 0, 0.5, [10.0, 10.0, 10.0, 20.0]).is_err());
        assert!(Detection::new("x".into(), 0, 0.5, [10.0, 30.0, 20.0, 20.0]).is_err());
    }

    #[test]
    fn test_detection_json_schema() {
        let det = Detection::new("person".into(), 3, 0.5, [0.0, 0.0, 4.0, 2.0]).unwrap();
        let v = serde_json::to_value(&det).unwrap();
        assert_eq!(v["class"], "person");
        assert_eq!(v["class_id"], 3);
        assert_eq!(v["bbox"].as_array().unwrap().len(), 4);
        assert_eq!(v["bbox_center"][0], 2.0);
        assert_eq!(v["bbox_size"][1], 2.0);
    }

    #[test]
    fn test_raw_box_iou() {
        let a = RawBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, confidence: 0.9, class_id: 0 };
        let b = RawBox { x1: 5.0, y1: 0.0, x2: 15.0, y2: 10.0, confidence: 0.8, class_id: 0 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }
}
