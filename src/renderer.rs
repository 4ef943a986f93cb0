// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果可视化 (Annotator)
//!
//! 绿色矩形框 + 绿色标签背景 + 黑色文字 `"{class}: {conf:.2}"`.

use std::io::Read;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::detection::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const FONT_URL: &str = "https://ultralytics.com/assets/Arial.ttf";
const FONT_SCALE: f32 = 20.0;
const LABEL_PAD: u32 = 5;

/// 标签背景位置 (左上角 + 尺寸)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// 计算标签背景位置, 保证不越过画布上边界
///
/// - 默认放在框顶边上方
/// - 上方空间不足时放到框内 (顶边下方)
/// - 右侧超出画布时向左平移
pub fn label_rect(
    x1: i32,
    y1: i32,
    text_width: u32,
    text_height: u32,
    canvas_width: u32,
    canvas_height: u32,
) -> LabelRect {
    let width = text_width.max(1);
    let height = text_height + LABEL_PAD;

    let mut y = y1 - height as i32;
    if y < 0 {
        y = y1.max(0);
    }
    y = y.min(canvas_height as i32 - height as i32).max(0);

    let mut x = x1.max(0);
    if x + width as i32 > canvas_width as i32 {
        x = (canvas_width as i32 - width as i32).max(0);
    }

    LabelRect {
        x,
        y,
        width,
        height,
    }
}

pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    /// 不加载字体: 只画框和标签背景
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: PxScale::from(FONT_SCALE),
        }
    }

    /// 字体查找顺序: 指定路径 → 配置目录缓存 → 下载 (可选)
    pub fn load(font: Option<&Path>, download: bool) -> Self {
        let mut annotator = Self::without_font();
        annotator.font = match font {
            Some(p) => read_font(p),
            None => default_font(download),
        };
        if annotator.font.is_none() {
            warn!("label font unavailable, annotations will omit text");
        }
        annotator
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => (
                (text.chars().count() as f32 * FONT_SCALE * 0.55).ceil() as u32,
                FONT_SCALE as u32,
            ),
        }
    }

    /// 在帧上绘制全部检测结果
    pub fn annotate(&self, frame: &mut RgbImage, detections: &[Detection]) {
        let (cw, ch) = frame.dimensions();
        if cw == 0 || ch == 0 {
            return;
        }

        for det in detections {
            let [x1, y1, x2, y2] = det.bbox();
            let (x1, y1, x2, y2) = (x1 as i32, y1 as i32, x2 as i32, y2 as i32);
            let w = (x2 - x1).max(1) as u32;
            let h = (y2 - y1).max(1) as u32;

            // thickness 2
            draw_hollow_rect_mut(frame, Rect::at(x1, y1).of_size(w, h), BOX_COLOR);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(frame, Rect::at(x1 + 1, y1 + 1).of_size(w - 2, h - 2), BOX_COLOR);
            }

            let label = format!("{}: {:.2}", det.class_name(), det.confidence());
            let (tw, th) = self.measure(&label);
            let rect = label_rect(x1, y1, tw, th, cw, ch);
            draw_filled_rect_mut(
                frame,
                Rect::at(rect.x, rect.y).of_size(rect.width, rect.height),
                BOX_COLOR,
            );
            if let Some(font) = &self.font {
                draw_text_mut(frame, TEXT_COLOR, rect.x, rect.y + 2, self.scale, font, &label);
            }
        }
    }
}

fn read_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read font");
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid font file");
            None
        }
    }
}

fn font_cache_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("uniform-detector").join("Arial.ttf"))
}

fn default_font(download: bool) -> Option<FontVec> {
    let path = font_cache_path()?;
    if !path.exists() {
        if !download {
            debug!(path = %path.display(), "no cached font");
            return None;
        }
        if let Err(e) = download_font(&path) {
            warn!(url = FONT_URL, error = %e, "font download failed");
            return None;
        }
    }
    read_font(&path)
}

fn download_font(path: &Path) -> anyhow::Result<()> {
    info!(url = FONT_URL, path = %path.display(), "downloading label font");
    let mut buf = Vec::new();
    ureq::get(FONT_URL)
        .call()?
        .into_reader()
        .take(10 << 20)
        .read_to_end(&mut buf)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, &buf)?;
    Ok(())
}
