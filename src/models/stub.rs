// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 测试用脚本化引擎

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::RgbImage;

use super::{DetectionEngine, ModelSummary};
use crate::detection::{DetectionThreshold, RawBox, INF_SIZE};
use crate::error::{DetectError, Result};

pub struct StubEngine {
    names: Vec<String>,
    boxes: Vec<RawBox>,
    // 第 n 次调用失败 (从 1 开始)
    fail_on: Vec<usize>,
    calls: AtomicUsize,
    seen: Mutex<Vec<DetectionThreshold>>,
}

impl StubEngine {
    pub fn new(boxes: Vec<RawBox>) -> Self {
        Self {
            names: vec!["uniforme_senati".to_string(), "persona".to_string()],
            boxes,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_on = calls.to_vec();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<DetectionThreshold> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn raw(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> RawBox {
    RawBox {
        x1,
        y1,
        x2,
        y2,
        confidence,
        class_id,
    }
}

impl DetectionEngine for StubEngine {
    fn detect(&self, _frame: &RgbImage, threshold: DetectionThreshold) -> Result<Vec<RawBox>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(threshold);
        if self.fail_on.contains(&n) {
            return Err(DetectError::internal(format!("scripted failure on call {n}")));
        }
        Ok(self
            .boxes
            .iter()
            .filter(|b| b.confidence >= threshold.confidence())
            .copied()
            .collect())
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) -> ModelSummary {
        ModelSummary {
            model_name: "stub".to_string(),
            model_path: "models/trained/stub/weights/best.onnx".to_string(),
            execution_provider: "CPU".to_string(),
            classes: self.names.clone(),
            input_size: INF_SIZE,
        }
    }
}
