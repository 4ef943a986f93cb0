// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测流水线 (Detection Pipeline)
///
/// - 单张图片: 校验 → 临时资源 → 解码 → 检测 → 释放
/// - 视频: VideoFrameSequencer 逐帧重复单帧流程并汇总
/// - 临时资源: TransientResource / ResourceTracker
pub mod resource;
pub mod sequencer;

use image::RgbImage;
use tracing::debug;

use crate::codec::ImageCodec;
use crate::detection::{Detection, DetectionThreshold, Detector};
use crate::error::{DetectError, Result};

pub use resource::{extension_for, ResourceKind, ResourceTracker, TransientResource};
pub use sequencer::{
    Abort, CancelToken, FrameError, SequenceStatus, VideoFrameResult, VideoFrameSequencer,
    VideoSummary,
};

/// 单张图片检测结果 (保留解码后的帧用于可视化)
#[derive(Debug)]
pub struct ImageDetection {
    pub frame: RgbImage,
    pub detections: Vec<Detection>,
}

/// 单张图片检测
///
/// 模型不可用时直接返回, 不做任何解码; 校验失败时不创建临时资源.
pub fn detect_image(
    detector: &Detector,
    bytes: Vec<u8>,
    threshold: DetectionThreshold,
    tracker: &ResourceTracker,
) -> Result<ImageDetection> {
    detector.engine()?;
    if !ImageCodec::validate(&bytes) {
        return Err(DetectError::InvalidImage("structural validation failed".to_string()));
    }

    let resource = TransientResource::buffer(bytes, tracker);
    let data = resource
        .bytes()
        .ok_or_else(|| DetectError::internal("buffer resource without bytes"))?;
    let frame = ImageCodec::decode(data)?;
    let detections = detector.detect(&frame, threshold)?;
    debug!(resource_id = %resource.id(), detections = detections.len(), "image detected");
    Ok(ImageDetection { frame, detections })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{jpeg_bytes, png_bytes};
    use crate::models::stub::{raw, StubEngine};
    use std::sync::Arc;

    #[test]
    fn test_corrupted_image_creates_no_resource() {
        let engine = Arc::new(StubEngine::empty());
        let det = Detector::new(engine.clone(), DetectionThreshold::default());
        let tracker = ResourceTracker::new();

        let mut truncated = jpeg_bytes(64, 64);
        truncated.truncate(4);
        let err = detect_image(&det, truncated, det.threshold(), &tracker).unwrap_err();
        assert!(matches!(err, DetectError::InvalidImage(_)));
        assert_eq!(tracker.acquired(), 0);
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_image_resource_released_on_success_and_failure() {
        let engine = Arc::new(StubEngine::new(vec![raw(1.0, 2.0, 9.0, 12.0, 0.7, 0)]).failing_on(&[2]));
        let det = Detector::new(engine, DetectionThreshold::default());
        let tracker = ResourceTracker::new();

        let ok = detect_image(&det, png_bytes(16, 16), det.threshold(), &tracker).unwrap();
        assert_eq!(ok.detections.len(), 1);
        assert_eq!(ok.frame.dimensions(), (16, 16));

        assert!(detect_image(&det, png_bytes(16, 16), det.threshold(), &tracker).is_err());
        assert_eq!(tracker.acquired(), 2);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_model_unavailable_short_circuits() {
        let det = Detector::unavailable("no weights", DetectionThreshold::default());
        let tracker = ResourceTracker::new();
        let err = detect_image(&det, b"garbage".to_vec(), det.threshold(), &tracker).unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable));
        assert_eq!(tracker.acquired(), 0);
    }
}
