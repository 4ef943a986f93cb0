// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod api; // HTTP 服务
pub mod batch; // 离线批处理
pub mod codec; // 图片编解码
pub mod config; // 命令行 / 环境变量配置
pub mod detection; // 检测会话 + 结果规范化
pub mod error;
pub mod input; // 视频输入 (FFmpeg)
pub mod models; // 推理引擎接口与实现
pub mod ort_backend;
pub mod pipeline; // 单图 / 视频检测流水线
pub mod preprocess; // letterbox + 归一化
pub mod quality; // 画质分析
pub mod renderer; // 检测结果绘制

pub use crate::config::{Cli, Command, ModelArgs, ServeArgs};
pub use crate::detection::{Detection, DetectionThreshold, Detector, RawBox};
pub use crate::error::{DetectError, Result};
pub use crate::models::{DetectionEngine, YOLOv8, YOLOv8Config};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 类别无关的贪心 NMS, 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<RawBox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stub::raw;

    #[test]
    fn test_nms_keeps_highest_and_disjoint() {
        let mut boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            raw(1.0, 1.0, 10.0, 10.0, 0.9, 0),
            raw(50.0, 50.0, 60.0, 60.0, 0.3, 1),
            raw(0.5, 0.5, 10.5, 10.5, 0.8, 1),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(boxes[1].confidence, 0.3);
    }

    #[test]
    fn test_nms_threshold_one_keeps_all() {
        let mut boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.5, 0),
            raw(0.0, 0.0, 10.0, 10.0, 0.7, 0),
        ];
        non_max_suppression(&mut boxes, 1.0);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.7);
    }
}
