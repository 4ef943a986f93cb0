// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 临时资源 (TransientResource)
//!
//! 每张图片 / 每一帧在推理前创建一个, 以生成的 uuid 命名, 离开作用域即释放.
//! 文件类资源的扩展名只取自 content-type, 不使用客户端提供的文件名.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbImage;
use tempfile::NamedTempFile;
use tracing::trace;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicUsize,
    live: AtomicUsize,
}

/// 资源计数 (累计创建数 / 当前存活数)
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Counters>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub enum ResourceKind {
    Buffer(Vec<u8>),
    Frame(RgbImage),
    File(NamedTempFile),
}

#[derive(Debug)]
pub struct TransientResource {
    id: Uuid,
    kind: ResourceKind,
    tracker: ResourceTracker,
}

impl TransientResource {
    fn new(id: Uuid, kind: ResourceKind, tracker: &ResourceTracker) -> Self {
        tracker.acquire();
        trace!(resource_id = %id, "resource acquired");
        Self {
            id,
            kind,
            tracker: tracker.clone(),
        }
    }

    pub fn buffer(bytes: Vec<u8>, tracker: &ResourceTracker) -> Self {
        Self::new(Uuid::new_v4(), ResourceKind::Buffer(bytes), tracker)
    }

    pub fn frame(frame: RgbImage, tracker: &ResourceTracker) -> Self {
        Self::new(Uuid::new_v4(), ResourceKind::Frame(frame), tracker)
    }

    /// 写入唯一命名的临时文件 `detect-{uuid}-XXXX.{ext}`
    pub fn file(
        bytes: &[u8],
        extension: &str,
        dir: Option<&Path>,
        tracker: &ResourceTracker,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let prefix = format!("detect-{id}-");
        let suffix = format!(".{extension}");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(&suffix);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self::new(id, ResourceKind::File(file), tracker))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            ResourceKind::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn frame_ref(&self) -> Option<&RgbImage> {
        match &self.kind {
            ResourceKind::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            ResourceKind::File(f) => Some(f.path()),
            _ => None,
        }
    }
}

impl Drop for TransientResource {
    fn drop(&mut self) {
        self.tracker.release();
        trace!(resource_id = %self.id, "resource released");
    }
}

/// content-type → 文件扩展名
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/tiff" => "tiff",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/mpeg" => "mpg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_on_drop() {
        let tracker = ResourceTracker::new();
        {
            let a = TransientResource::buffer(vec![1, 2, 3], &tracker);
            let b = TransientResource::frame(RgbImage::new(2, 2), &tracker);
            assert_ne!(a.id(), b.id());
            assert_eq!(a.bytes(), Some(&[1u8, 2, 3][..]));
            assert!(b.frame_ref().is_some());
            assert_eq!(tracker.live(), 2);
        }
        assert_eq!(tracker.live(), 0);
        assert_eq!(tracker.acquired(), 2);
    }

    #[test]
    fn test_file_named_by_uuid_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ResourceTracker::new();
        let path = {
            let res = TransientResource::file(b"video", "mp4", Some(dir.path()), &tracker).unwrap();
            let path = res.path().unwrap().to_path_buf();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with(&format!("detect-{}-", res.id())));
            assert!(name.ends_with(".mp4"));
            assert_eq!(std::fs::read(&path).unwrap(), b"video");
            path
        };
        assert!(!path.exists());
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_concurrent_names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ResourceTracker::new();
        let a = TransientResource::file(b"a", "jpg", Some(dir.path()), &tracker).unwrap();
        let b = TransientResource::file(b"b", "jpg", Some(dir.path()), &tracker).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path().unwrap()).unwrap(), b"a");
    }

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(extension_for("application/x-evil"), "bin");
    }
}
