// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 离线批处理: 单图检测摘要 / 目录批量检测 / 批量 letterbox

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::ImageCodec;
use crate::detection::{Detection, DetectionThreshold, Detector};
use crate::error::{DetectError, Result};
use crate::pipeline::{detect_image, ResourceTracker};
use crate::preprocess::{letterbox, PAD_COLOR};
use crate::renderer::Annotator;

const DETECT_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
const RESIZE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 单张图片检测摘要
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub image: String,
    pub model: String,
    pub confidence_threshold: f32,
    pub detections_count: usize,
    pub detections: Vec<Detection>,
}

/// 列出目录中指定扩展名的图片 (按文件名排序)
pub fn list_images(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DetectError::InvalidImage(format!("{} has no file name", path.display())))
}

/// 检测单张图片文件
pub fn summarize(
    detector: &Detector,
    path: &Path,
    threshold: DetectionThreshold,
    tracker: &ResourceTracker,
) -> Result<(DetectionSummary, RgbImage)> {
    let bytes = std::fs::read(path)?;
    let result = detect_image(detector, bytes, threshold, tracker)?;
    let summary = DetectionSummary {
        image: path.display().to_string(),
        model: detector.summary()?.model_path,
        confidence_threshold: threshold.confidence(),
        detections_count: result.detections.len(),
        detections: result.detections,
    };
    Ok((summary, result.frame))
}

/// 绘制并保存可视化结果, 格式由扩展名决定
pub fn save_annotated(
    annotator: &Annotator,
    mut frame: RgbImage,
    detections: &[Detection],
    path: &Path,
) -> Result<()> {
    annotator.annotate(&mut frame, detections);
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);
    std::fs::write(path, ImageCodec::encode(&frame, format)?)?;
    Ok(())
}

/// 批量检测目录中的图片
///
/// 指定 `output` 时写出 `detected_<name>` 可视化图片和 `detection_summary.json`.
/// 单张失败只记录日志, 不影响其他图片.
pub fn detect_batch(
    detector: &Detector,
    dir: &Path,
    output: Option<&Path>,
    threshold: DetectionThreshold,
    annotator: &Annotator,
) -> Result<Vec<DetectionSummary>> {
    let files = list_images(dir, &DETECT_EXTENSIONS)?;
    if files.is_empty() {
        warn!(dir = %dir.display(), "no images found");
        return Ok(Vec::new());
    }
    if let Some(out) = output {
        std::fs::create_dir_all(out)?;
    }

    let tracker = ResourceTracker::new();
    let mut results = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        info!(index = i + 1, total = files.len(), image = %path.display(), "detecting");
        let (summary, frame) = match summarize(detector, path, threshold, &tracker) {
            Ok(r) => r,
            Err(e) => {
                warn!(image = %path.display(), error = %e, "detection failed");
                continue;
            }
        };
        if let Some(out) = output {
            let target = out.join(format!("detected_{}", file_name(path)?));
            save_annotated(annotator, frame, &summary.detections, &target)?;
        }
        results.push(summary);
    }

    if let Some(out) = output {
        let summary_path = out.join("detection_summary.json");
        let json = serde_json::to_string_pretty(&results)
            .map_err(|e| DetectError::internal(format!("summary serialization: {e}")))?;
        std::fs::write(&summary_path, json)?;
        info!(path = %summary_path.display(), "summary saved");
    }
    Ok(results)
}

/// 批量 letterbox 到 size×size, 输出同名文件
pub fn batch_resize(input: &Path, output: &Path, size: u32) -> Result<usize> {
    std::fs::create_dir_all(output)?;
    let files = list_images(input, &RESIZE_EXTENSIONS)?;
    info!(count = files.len(), size, "resizing images");

    for (i, path) in files.iter().enumerate() {
        info!(index = i + 1, total = files.len(), image = %path.display(), "resizing");
        let frame = ImageCodec::decode(&std::fs::read(path)?)?;
        let lb = letterbox(&frame, size, PAD_COLOR)?;
        let target = output.join(file_name(path)?);
        let format = ImageFormat::from_path(&target).unwrap_or(ImageFormat::Jpeg);
        std::fs::write(&target, ImageCodec::encode(&lb.canvas, format)?)?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::png_bytes;
    use crate::models::stub::{raw, StubEngine};
    use std::sync::Arc;

    fn detector() -> Detector {
        Detector::new(
            Arc::new(StubEngine::new(vec![raw(2.0, 2.0, 12.0, 14.0, 0.8, 0)])),
            DetectionThreshold::default(),
        )
    }

    #[test]
    fn test_detect_batch_writes_outputs() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.png"), png_bytes(32, 32)).unwrap();
        std::fs::write(input.path().join("b.PNG"), png_bytes(20, 30)).unwrap();
        std::fs::write(input.path().join("broken.jpg"), b"not a jpeg").unwrap();
        std::fs::write(input.path().join("notes.txt"), b"skip me").unwrap();

        let det = detector();
        let results = detect_batch(
            &det,
            input.path(),
            Some(output.path()),
            det.threshold(),
            &Annotator::without_font(),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.detections_count == 1));
        assert!(output.path().join("detected_a.png").exists());
        assert!(output.path().join("detected_b.PNG").exists());

        let json = std::fs::read_to_string(output.path().join("detection_summary.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
        assert_eq!(v[0]["detections"][0]["class"], "uniforme_senati");
    }

    #[test]
    fn test_batch_resize_letterboxes() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("wide.png"), png_bytes(100, 50)).unwrap();
        std::fs::write(input.path().join("skip.bmp"), png_bytes(10, 10)).unwrap();

        let n = batch_resize(input.path(), output.path(), 64).unwrap();
        assert_eq!(n, 1);
        let out = image::open(output.path().join("wide.png")).unwrap();
        assert_eq!((out.width(), out.height()), (64, 64));
    }

    #[test]
    fn test_empty_dir() {
        let input = tempfile::tempdir().unwrap();
        let det = detector();
        let results =
            detect_batch(&det, input.path(), None, det.threshold(), &Annotator::without_font()).unwrap();
        assert!(results.is_empty());
    }
}
