// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频逐帧检测 (VideoFrameSequencer)
//!
//! 帧序号从 1 开始. 单帧失败记录到 `errors` 后继续处理后续帧.
//! 每帧检测前检查取消 / 超时信号, 中止时返回已处理部分.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::resource::{ResourceTracker, TransientResource};
use crate::detection::{Detection, DetectionThreshold, Detector};
use crate::error::{DetectError, Result};
use crate::input::{FfmpegSource, FramePoll, VideoSource};

/// 等待解码帧的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 取消 / 超时信号
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Cancelled,
    TimedOut,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Option<Abort> {
        if self.is_cancelled() {
            Some(Abort::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Abort::TimedOut)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Completed,
    /// 达到最大帧数限制
    Truncated,
    Cancelled,
    TimedOut,
    SourceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFrameResult {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameError {
    pub frame_index: u64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSummary {
    pub frames_processed: u64,
    pub total_detections: usize,
    pub results: Vec<VideoFrameResult>,
    pub failed_frames: usize,
    pub errors: Vec<FrameError>,
    pub status: SequenceStatus,
}

impl VideoSummary {
    fn empty() -> Self {
        Self {
            frames_processed: 0,
            total_detections: 0,
            results: Vec::new(),
            failed_frames: 0,
            errors: Vec::new(),
            status: SequenceStatus::Completed,
        }
    }
}

pub struct VideoFrameSequencer<'a> {
    detector: &'a Detector,
    threshold: DetectionThreshold,
    tracker: ResourceTracker,
    max_frames: Option<u64>,
}

impl<'a> VideoFrameSequencer<'a> {
    pub fn new(detector: &'a Detector, threshold: DetectionThreshold, tracker: ResourceTracker) -> Self {
        Self {
            detector,
            threshold,
            tracker,
            max_frames: None,
        }
    }

    pub fn max_frames(mut self, max: Option<u64>) -> Self {
        self.max_frames = max;
        self
    }

    /// 打开视频文件并逐帧检测
    pub fn process_file(&self, path: &Path, token: &CancelToken) -> Result<VideoSummary> {
        self.detector.engine()?;
        let mut source = FfmpegSource::open(path)?;
        Ok(self.run(&mut source, token))
    }

    pub fn run(&self, source: &mut dyn VideoSource, token: &CancelToken) -> VideoSummary {
        let started = Instant::now();
        let mut summary = VideoSummary::empty();
        let mut frame_index = 0u64;

        loop {
            if let Some(abort) = token.check() {
                summary.status = match abort {
                    Abort::Cancelled => SequenceStatus::Cancelled,
                    Abort::TimedOut => SequenceStatus::TimedOut,
                };
                warn!(frame_index, status = ?summary.status, "video sequence aborted");
                break;
            }
            if self.max_frames.is_some_and(|max| frame_index >= max) {
                summary.status = SequenceStatus::Truncated;
                break;
            }

            let frame = match source.poll_frame(POLL_INTERVAL) {
                Ok(FramePoll::Frame(frame)) => frame,
                Ok(FramePoll::Pending) => continue,
                Ok(FramePoll::End) => break,
                Err(e) => {
                    warn!(frame_index, error = %e, "video source failed");
                    summary.status = SequenceStatus::SourceFailed;
                    break;
                }
            };

            frame_index += 1;
            summary.frames_processed = frame_index;

            let resource = TransientResource::frame(frame, &self.tracker);
            let outcome = match resource.frame_ref() {
                Some(frame) => self.detector.detect(frame, self.threshold),
                None => Err(DetectError::internal("frame resource without pixels")),
            };
            drop(resource);

            match outcome {
                Ok(detections) => {
                    debug!(frame_index, detections = detections.len(), "frame processed");
                    summary.total_detections += detections.len();
                    summary.results.push(VideoFrameResult {
                        frame_index,
                        detections,
                    });
                }
                Err(e) => {
                    warn!(frame_index, error = %e, "frame detection failed");
                    summary.failed_frames += 1;
                    summary.errors.push(FrameError {
                        frame_index,
                        error: e.client_message(),
                    });
                }
            }
        }

        info!(
            frames = summary.frames_processed,
            detections = summary.total_detections,
            failed = summary.failed_frames,
            status = ?summary.status,
            elapsed = ?started.elapsed(),
            "video sequence finished"
        );
        summary
    }
}
