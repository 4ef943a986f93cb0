// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测流水线错误类型 (Detection pipeline errors)

use thiserror::Error;

/// 检测流水线结果类型
pub type Result<T> = std::result::Result<T, DetectError>;

#[derive(Debug, Error)]
pub enum DetectError {
    /// 图片无效或已损坏 (validate 未通过)
    #[error("Invalid or corrupted image: {0}")]
    InvalidImage(String),

    #[error("Failed to decode image: {0}")]
    DecodeFailure(String),

    #[error("Failed to encode image as {format}: {message}")]
    EncodeFailure { format: String, message: String },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("Failed to open video: {0}")]
    VideoOpenFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::DecodeFailure(msg.to_string())
    }

    /// 返回给客户端的错误信息, 内部错误不暴露细节
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Io(_) | Self::EncodeFailure { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// 校验阈值是否在 [0, 1] 区间内
    pub fn check_unit_range(name: &'static str, value: f32) -> Result<f32> {
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(Self::ThresholdOutOfRange { name, value })
        }
    }
}

impl From<anyhow::Error> for DetectError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_range_bounds() {
        assert!(DetectError::check_unit_range("confidence", 0.0).is_ok());
        assert!(DetectError::check_unit_range("confidence", 1.0).is_ok());
        assert!(matches!(
            DetectError::check_unit_range("iou", 1.5),
            Err(DetectError::ThresholdOutOfRange { name: "iou", .. })
        ));
        assert!(DetectError::check_unit_range("iou", -0.01).is_err());
        assert!(DetectError::check_unit_range("iou", f32::NAN).is_err());
    }

    #[test]
    fn test_client_message_sanitized() {
        let err = DetectError::internal("onnx: /secret/path/best.onnx exploded");
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(
            DetectError::ModelUnavailable.client_message(),
            "Model not loaded"
        );
    }
}
