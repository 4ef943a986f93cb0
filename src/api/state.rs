// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 服务共享状态

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::detection::Detector;
use crate::pipeline::ResourceTracker;
use crate::renderer::Annotator;

const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<Detector>,
    pub annotator: Arc<Annotator>,
    pub tracker: ResourceTracker,
    /// 模型权重路径, 训练元数据位于 `<weights 目录>/../metadata.json`
    pub model_path: PathBuf,
    pub video_timeout: Duration,
    pub max_video_frames: Option<u64>,
    pub temp_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(detector: Detector, annotator: Annotator, model_path: impl Into<PathBuf>) -> Self {
        Self {
            detector: Arc::new(detector),
            annotator: Arc::new(annotator),
            tracker: ResourceTracker::new(),
            model_path: model_path.into(),
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            max_video_frames: None,
            temp_dir: None,
        }
    }

    pub fn with_video_limits(mut self, timeout: Duration, max_frames: Option<u64>) -> Self {
        self.video_timeout = timeout;
        self.max_video_frames = max_frames;
        self
    }

    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn metadata_path(&self) -> Option<PathBuf> {
        self.model_path
            .parent()
            .and_then(Path::parent)
            .map(|dir| dir.join("metadata.json"))
    }
}
