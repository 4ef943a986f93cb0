// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 画质分析 (清晰度 / 亮度 / 对比度)
//!
//! - sharpness: 灰度图 4 邻域 Laplacian 响应的方差 (边界 reflect-101)
//! - brightness: 灰度均值
//! - contrast: 灰度总体标准差
//!
//! 综合判定只看清晰度和对比度, 亮度不参与.

use image::{GrayImage, Luma, RgbImage};
use serde::{Serialize, Serializer};

const SHARPNESS_MIN: f64 = 100.0;
const BRIGHTNESS_RANGE: (f64, f64) = (50.0, 200.0);
const CONTRAST_MIN: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Good,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    Adequate,
    Inadequate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Acceptable,
    Improvable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageQualityReport {
    #[serde(serialize_with = "round2")]
    pub sharpness: f64,
    pub sharpness_quality: Level,
    #[serde(serialize_with = "round2")]
    pub brightness: f64,
    pub brightness_quality: Exposure,
    #[serde(serialize_with = "round2")]
    pub contrast: f64,
    pub contrast_quality: Level,
    #[serde(rename = "overall_quality")]
    pub overall: Overall,
}

impl ImageQualityReport {
    pub fn recommendation(&self) -> &'static str {
        match self.overall {
            Overall::Acceptable => "Image suitable for detection",
            Overall::Improvable => "Consider using a better quality image",
        }
    }
}

fn round2<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((v * 100.0).round() / 100.0)
}

pub struct QualityAnalyzer;

impl QualityAnalyzer {
    pub fn analyze(frame: &RgbImage) -> ImageQualityReport {
        let gray = to_gray(frame);
        let sharpness = laplacian_variance(&gray);
        let (brightness, contrast) = mean_std(&gray);
        Self::classify(sharpness, brightness, contrast)
    }

    pub fn classify(sharpness: f64, brightness: f64, contrast: f64) -> ImageQualityReport {
        let sharp = sharpness > SHARPNESS_MIN;
        let contrasted = contrast > CONTRAST_MIN;
        ImageQualityReport {
            sharpness,
            sharpness_quality: if sharp { Level::Good } else { Level::Low },
            brightness,
            brightness_quality: if brightness > BRIGHTNESS_RANGE.0 && brightness < BRIGHTNESS_RANGE.1 {
                Exposure::Adequate
            } else {
                Exposure::Inadequate
            },
            contrast,
            contrast_quality: if contrasted { Level::Good } else { Level::Low },
            overall: if sharp && contrasted {
                Overall::Acceptable
            } else {
                Overall::Improvable
            },
        }
    }
}

/// BT.601 灰度
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let v = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// reflect-101: -1 → 1, n → n - 2
fn reflect101(i: i64, n: i64) -> u32 {
    let i = if i < 0 { -i } else { i };
    let i = if i >= n { 2 * (n - 1) - i } else { i };
    i as u32
}

pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (w, h) = (img.width() as i64, img.height() as i64);
    if w < 2 || h < 2 {
        return 0.0;
    }

    let px = |x: i64, y: i64| img.get_pixel(reflect101(x, w), reflect101(y, h)).0[0] as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let count = (w * h) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// 均值 + 总体标准差
pub fn mean_std(img: &GrayImage) -> (f64, f64) {
    let count = img.as_raw().len();
    if count == 0 {
        return (0.0, 0.0);
    }
    let n = count as f64;
    let mean = img.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = img
        .as_raw()
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}
