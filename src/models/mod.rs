// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测引擎统一接口与实现
//!
//! # 架构说明
//!
//! - **YOLOv8**: ONNX Runtime 完整实现 (letterbox → 推理 → 解码 → NMS), 文件 `yolov8.rs`
//! - **StubEngine**: 仅测试使用的脚本化引擎, 记录每次调用收到的阈值, 文件 `stub.rs`
//!
//! ## 核心流程
//! ```text
//! RGB帧 + 阈值 → DetectionEngine::detect → Vec<RawBox> (原图坐标)
//! ```

use image::RgbImage;
use serde::Serialize;

use crate::detection::{DetectionThreshold, RawBox};
use crate::error::Result;

/// 模型描述信息 (用于 /api/stats 与启动日志)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub model_name: String,
    pub model_path: String,
    pub execution_provider: String,
    pub classes: Vec<String>,
    pub input_size: u32,
}

/// 推理引擎接口
///
/// 实现需要是线程安全的: 同一个引擎实例会被多个请求的工作线程共享.
/// 返回的检测框顺序由引擎决定.
pub trait DetectionEngine: Send + Sync {
    /// 对单帧执行检测, 阈值已由调用方校验
    fn detect(&self, frame: &RgbImage, threshold: DetectionThreshold) -> Result<Vec<RawBox>>;

    /// 类别表, 下标即 class_id
    fn names(&self) -> &[String];

    fn summary(&self) -> ModelSummary;
}

#[cfg(test)]
pub mod stub;
pub mod yolov8;

pub use yolov8::{YOLOv8, YOLOv8Config};
