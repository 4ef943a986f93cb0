// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 图片编解码 (ImageCodec)
//!
//! - `validate`: 只检查结构 (格式识别 + 头部尺寸), 永不返回错误
//! - `decode`: 完整解码为 RGB 像素, 比 `validate` 更严格
//! - `encode`: 按目标格式编码

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use serde::Serialize;

use crate::error::{DetectError, Result};

/// 图片基本信息 (用于 /api/analyze)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub aspect_ratio: f64,
    pub total_pixels: u64,
    pub size_mb: f64,
}

pub struct ImageCodec;

impl ImageCodec {
    /// 结构校验: 空数据 / 截断头部 / 随机噪声均返回 false
    pub fn validate(bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let reader = match ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
            Ok(r) => r,
            Err(_) => return false,
        };
        if reader.format().is_none() {
            return false;
        }
        matches!(reader.into_dimensions(), Ok((w, h)) if w > 0 && h > 0)
    }

    /// 完整解码为 RGB8 帧
    pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
        let img = image::load_from_memory(bytes).map_err(DetectError::decode)?;
        Ok(img.to_rgb8())
    }

    /// 编码为指定格式
    pub fn encode(frame: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(frame.clone())
            .write_to(&mut buf, format)
            .map_err(|e| DetectError::EncodeFailure {
                format: format!("{format:?}"),
                message: e.to_string(),
            })?;
        Ok(buf.into_inner())
    }

    /// 解码并统计图片信息, `size_mb` 为解码后像素数据大小
    pub fn image_info(bytes: &[u8]) -> Result<ImageInfo> {
        let img = image::load_from_memory(bytes).map_err(DetectError::decode)?;
        let (width, height) = (img.width(), img.height());
        let channels = img.color().channel_count();
        let total_pixels = width as u64 * height as u64;
        Ok(ImageInfo {
            width,
            height,
            channels,
            aspect_ratio: width as f64 / height.max(1) as f64,
            total_pixels,
            size_mb: (total_pixels * channels as u64) as f64 / (1024.0 * 1024.0),
        })
    }
}
