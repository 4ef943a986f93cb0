// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测会话 (Detector)
//! 职责: 持有推理引擎 + 阈值配置, 每个请求取阈值快照后执行检测

use std::sync::{Arc, RwLock};

use image::RgbImage;
use tracing::{debug, info};

use super::normalizer::DetectionNormalizer;
use super::types::{Detection, DetectionThreshold, RawBox};
use crate::error::{DetectError, Result};
use crate::models::{DetectionEngine, ModelSummary};

/// 阈值控制器
///
/// 设置失败时保持原值不变. 读取方拿到的是值拷贝, 后续修改不影响进行中的请求.
#[derive(Debug, Default)]
pub struct ConfidenceController {
    current: RwLock<DetectionThreshold>,
}

impl ConfidenceController {
    pub fn new(threshold: DetectionThreshold) -> Self {
        Self {
            current: RwLock::new(threshold),
        }
    }

    pub fn get(&self) -> DetectionThreshold {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_threshold(&self, value: f32) -> Result<DetectionThreshold> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = guard.with_confidence(value)?;
        *guard = next;
        Ok(next)
    }
}

pub struct Detector {
    engine: Option<Arc<dyn DetectionEngine>>,
    load_error: Option<String>,
    controller: ConfidenceController,
}

impl Detector {
    pub fn new(engine: Arc<dyn DetectionEngine>, threshold: DetectionThreshold) -> Self {
        Self {
            engine: Some(engine),
            load_error: None,
            controller: ConfidenceController::new(threshold),
        }
    }

    /// 模型加载失败: 所有检测调用返回 ModelUnavailable
    pub fn unavailable(reason: impl Into<String>, threshold: DetectionThreshold) -> Self {
        Self {
            engine: None,
            load_error: Some(reason.into()),
            controller: ConfidenceController::new(threshold),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn engine(&self) -> Result<&Arc<dyn DetectionEngine>> {
        self.engine.as_ref().ok_or(DetectError::ModelUnavailable)
    }

    pub fn summary(&self) -> Result<ModelSummary> {
        Ok(self.engine()?.summary())
    }

    pub fn threshold(&self) -> DetectionThreshold {
        self.controller.get()
    }

    pub fn set_confidence(&self, value: f32) -> Result<DetectionThreshold> {
        self.engine()?;
        let next = self.controller.set_threshold(value)?;
        info!(confidence = next.confidence(), "confidence threshold updated");
        Ok(next)
    }

    /// 请求阈值: 显式 confidence 优先, 否则使用会话默认值
    pub fn resolve_threshold(&self, confidence: Option<f32>) -> Result<DetectionThreshold> {
        let current = self.controller.get();
        match confidence {
            Some(c) => current.with_confidence(c),
            None => Ok(current),
        }
    }

    /// 调用推理引擎, 阈值越界时不触发引擎
    pub fn infer(&self, frame: &RgbImage, confidence: f32, iou: f32) -> Result<Vec<RawBox>> {
        let threshold = DetectionThreshold::new(confidence, iou)?;
        self.engine()?.detect(frame, threshold)
    }

    /// 检测 + 规范化
    pub fn detect(&self, frame: &RgbImage, threshold: DetectionThreshold) -> Result<Vec<Detection>> {
        let engine = self.engine()?;
        let raw = self.infer(frame, threshold.confidence(), threshold.iou())?;
        let detections = DetectionNormalizer::normalize(&raw, engine.names())?;
        debug!(
            width = frame.width(),
            height = frame.height(),
            detections = detections.len(),
            "frame detected"
        );
        Ok(detections)
    }
}

/// 在阻塞线程池中执行推理, 避免阻塞异步运行时
pub async fn spawn_inference<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DetectError::internal(format!("inference task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stub::{raw, StubEngine};

    fn session(engine: Arc<StubEngine>) -> Detector {
        Detector::new(engine, DetectionThreshold::new(0.4, 0.45).unwrap())
    }

    #[test]
    fn test_out_of_range_never_reaches_engine() {
        let engine = Arc::new(StubEngine::empty());
        let det = session(engine.clone());
        let frame = RgbImage::new(8, 8);

        for (c, i) in [(1.5, 0.5), (-0.1, 0.5), (0.5, 1.01), (f32::NAN, 0.5)] {
            assert!(matches!(
                det.infer(&frame, c, i),
                Err(DetectError::ThresholdOutOfRange { .. })
            ));
        }
        assert_eq!(engine.calls(), 0);

        for (c, i) in [(0.0, 0.0), (1.0, 1.0), (0.5, 0.45)] {
            assert!(det.infer(&frame, c, i).is_ok());
        }
        assert_eq!(engine.calls(), 3);
    }

    #[test]
    fn test_set_confidence_rejected_keeps_prior() {
        let engine = Arc::new(StubEngine::empty());
        let det = session(engine.clone());

        assert!(matches!(
            det.set_confidence(1.5),
            Err(DetectError::ThresholdOutOfRange { name: "confidence", .. })
        ));
        assert_eq!(det.threshold().confidence(), 0.4);

        det.detect(&RgbImage::new(4, 4), det.threshold()).unwrap();
        assert_eq!(engine.seen()[0].confidence(), 0.4);

        det.set_confidence(0.7).unwrap();
        det.detect(&RgbImage::new(4, 4), det.resolve_threshold(None).unwrap())
            .unwrap();
        assert_eq!(engine.seen()[1].confidence(), 0.7);
    }

    #[test]
    fn test_request_threshold_is_a_snapshot() {
        let engine = Arc::new(StubEngine::new(vec![raw(0.0, 0.0, 5.0, 5.0, 0.5, 0)]));
        let det = session(engine.clone());

        let snapshot = det.resolve_threshold(Some(0.2)).unwrap();
        det.set_confidence(0.9).unwrap();
        let dets = det.detect(&RgbImage::new(4, 4), snapshot).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(engine.seen()[0].confidence(), 0.2);
        assert!(det.resolve_threshold(Some(3.0)).is_err());
    }

    #[test]
    fn test_unavailable_model() {
        let det = Detector::unavailable("missing weights", DetectionThreshold::default());
        assert!(!det.is_loaded());
        assert!(matches!(
            det.detect(&RgbImage::new(2, 2), DetectionThreshold::default()),
            Err(DetectError::ModelUnavailable)
        ));
        assert!(matches!(det.set_confidence(0.5), Err(DetectError::ModelUnavailable)));
        assert_eq!(det.load_error(), Some("missing weights"));
    }

    #[tokio::test]
    async fn test_spawn_inference_runs_off_runtime() {
        let det = Arc::new(session(Arc::new(StubEngine::new(vec![raw(1.0, 1.0, 3.0, 3.0, 0.8, 0)]))));
        let d = det.clone();
        let dets = spawn_inference(move || d.detect(&RgbImage::new(4, 4), d.threshold()))
            .await
            .unwrap();
        assert_eq!(dets[0].class_name(), "uniforme_senati");
    }
}
