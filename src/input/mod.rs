// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// - VideoSource: 逐帧读取接口
/// - FfmpegSource: FFmpeg 子进程解码 (独立读取线程 + 有界通道)
pub mod decoder;

use std::time::Duration;

use image::RgbImage;

use crate::error::Result;

pub use decoder::{probe_dimensions, FfmpegSource};

/// 一次读取的结果
#[derive(Debug)]
pub enum FramePoll {
    Frame(RgbImage),
    /// 等待超时, 尚无新帧
    Pending,
    End,
}

/// 按时间顺序产出 RGB 帧
pub trait VideoSource: Send {
    /// 最多等待 `timeout`; 解码失败返回错误
    fn poll_frame(&mut self, timeout: Duration) -> Result<FramePoll>;
}
