// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// - types:      Detection / DetectionThreshold / RawBox
/// - normalizer: RawBox → Detection
/// - detector:   检测会话 (引擎 + 阈值控制)
pub mod detector;
pub mod normalizer;
pub mod types;

pub use detector::{spawn_inference, ConfidenceController, Detector};
pub use normalizer::DetectionNormalizer;
pub use types::{round_to, Detection, DetectionThreshold, RawBox, DEFAULT_CONF, DEFAULT_IOU, INF_SIZE};
