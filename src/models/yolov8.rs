// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型实现
// 包含: 模型加载、letterbox预处理、推理、解码 + NMS

use std::path::PathBuf;
use std::time::Instant;

use image::RgbImage;
use tracing::debug;

use super::{DetectionEngine, ModelSummary};
use crate::detection::{DetectionThreshold, RawBox, INF_SIZE};
use crate::error::{DetectError, Result};
use crate::preprocess::{letterbox, normalize, Letterbox, PAD_COLOR};
use crate::{non_max_suppression, OrtBackend, OrtConfig, OrtEP};

/// 单帧 NMS 后最多保留的检测框数
pub const MAX_DETECTIONS: usize = 300;

/// YOLOv8 构建参数
#[derive(Debug, Clone)]
pub struct YOLOv8Config {
    pub model: PathBuf,
    pub ep: OrtEP,
    pub intra_threads: usize,
    /// 覆盖模型元数据中的类别表
    pub names: Option<Vec<String>>,
}

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    names: Vec<String>,
    input_size: u32,
}

impl YOLOv8 {
    pub fn new(config: YOLOv8Config) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: config.model,
            ep: config.ep,
            intra_threads: config.intra_threads,
        })?;

        // class names: 命令行 > 模型元数据
        let names = config
            .names
            .or_else(|| engine.names().map(|n| n.to_vec()))
            .unwrap_or_default();

        Ok(Self {
            engine,
            names,
            input_size: INF_SIZE,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl DetectionEngine for YOLOv8 {
    fn detect(&self, frame: &RgbImage, threshold: DetectionThreshold) -> Result<Vec<RawBox>> {
        let t_pre = Instant::now();
        let lb = letterbox(frame, self.input_size, PAD_COLOR)?;
        let xs = normalize(&lb.canvas);
        let pre = t_pre.elapsed();

        let t_run = Instant::now();
        let (shape, data) = self.engine.run(xs)?;
        let run = t_run.elapsed();

        let t_post = Instant::now();
        let boxes = decode_predictions(&shape, &data, &lb, frame.dimensions(), threshold)?;
        debug!(
            preprocess = ?pre,
            inference = ?run,
            postprocess = ?t_post.elapsed(),
            boxes = boxes.len(),
            "yolov8 forward"
        );
        Ok(boxes)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) -> ModelSummary {
        let path = self.engine.path();
        ModelSummary {
            model_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            model_path: path.display().to_string(),
            execution_provider: self.engine.ep().to_string(),
            classes: self.names.clone(),
            input_size: self.input_size,
        }
    }
}

/// 解码 YOLOv8 输出
///
/// 输出形状 `[1, 4 + nc, N]` (每列 cx, cy, w, h, 类别分数...), 也接受转置形式 `[1, N, 4 + nc]`.
/// 返回原图坐标下、经过 NMS 的检测框, 按置信度降序, 最多 [`MAX_DETECTIONS`] 个.
/// 分数需严格大于置信度阈值.
pub fn decode_predictions(
    shape: &[usize],
    data: &[f32],
    lb: &Letterbox,
    (width_original, height_original): (u32, u32),
    threshold: DetectionThreshold,
) -> Result<Vec<RawBox>> {
    const CXYWH_OFFSET: usize = 4;

    let (features, anchors, transposed) = match *shape {
        [1, a, b] if a <= b => (a, b, false),
        [1, a, b] => (b, a, true),
        _ => {
            return Err(DetectError::internal(format!(
                "unexpected YOLOv8 output shape {shape:?}"
            )))
        }
    };
    if features <= CXYWH_OFFSET || data.len() != features * anchors {
        return Err(DetectError::internal(format!(
            "YOLOv8 output shape {shape:?} does not match {} values",
            data.len()
        )));
    }
    let nc = features - CXYWH_OFFSET;
    let at = |anchor: usize, feature: usize| -> f32 {
        if transposed {
            data[anchor * features + feature]
        } else {
            data[feature * anchors + anchor]
        }
    };

    let (w0, h0) = (width_original as f32, height_original as f32);
    let mut boxes = Vec::new();
    for i in 0..anchors {
        let (id, confidence) = (0..nc)
            .map(|c| (c, at(i, CXYWH_OFFSET + c)))
            .fold((0, f32::MIN), |max, x| if x.1 > max.1 { x } else { max });

        if confidence <= threshold.confidence() {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let (x1, y1) = lb.to_original(cx - w / 2., cy - h / 2.);
        let (x2, y2) = lb.to_original(cx + w / 2., cy + h / 2.);
        let bbox = RawBox {
            x1: x1.clamp(0.0, w0),
            y1: y1.clamp(0.0, h0),
            x2: x2.clamp(0.0, w0),
            y2: y2.clamp(0.0, h0),
            confidence: confidence.clamp(0.0, 1.0),
            class_id: id,
        };
        if bbox.x2 <= bbox.x1 || bbox.y2 <= bbox.y1 {
            continue;
        }
        boxes.push(bbox);
    }

    non_max_suppression(&mut boxes, threshold.iou());
    boxes.truncate(MAX_DETECTIONS);
    Ok(boxes)
}
