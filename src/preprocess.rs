// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预处理: letterbox 缩放 / 归一化 / 对比度增强

use fast_image_resize as fr;
use image::{Rgb, RgbImage};
use ndarray::{Array, IxDyn};

use crate::error::{DetectError, Result};

/// letterbox 默认填充色
pub const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// letterbox 结果, 保留缩放比例与偏移用于坐标还原
#[derive(Debug, Clone)]
pub struct Letterbox {
    pub canvas: RgbImage,
    pub scale: f32,
    pub new_width: u32,
    pub new_height: u32,
    pub left: u32,
    pub top: u32,
}

impl Letterbox {
    /// 画布坐标 → 原图坐标
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.left as f32) / self.scale,
            (y - self.top as f32) / self.scale,
        )
    }
}

/// 等比缩放到 target×target, 居中填充
///
/// top/left 使用整数下取整, 奇数余量落在右/下侧.
pub fn letterbox(frame: &RgbImage, target: u32, pad: Rgb<u8>) -> Result<Letterbox> {
    let (w0, h0) = frame.dimensions();
    if w0 == 0 || h0 == 0 || target == 0 {
        return Err(DetectError::InvalidImage(format!(
            "cannot letterbox {w0}x{h0} into {target}"
        )));
    }

    let scale = target as f32 / w0.max(h0) as f32;
    let new_width = ((w0 as f32 * scale).round() as u32).clamp(1, target);
    let new_height = ((h0 as f32 * scale).round() as u32).clamp(1, target);

    let resized = resize_linear(frame, new_width, new_height)?;

    let mut canvas = RgbImage::from_pixel(target, target, pad);
    let top = (target - new_height) / 2;
    let left = (target - new_width) / 2;
    image::imageops::replace(&mut canvas, &resized, left as i64, top as i64);

    Ok(Letterbox {
        canvas,
        scale,
        new_width,
        new_height,
        left,
        top,
    })
}

/// 双线性缩放 (fast_image_resize)
pub fn resize_linear(frame: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if frame.dimensions() == (width, height) {
        return Ok(frame.clone());
    }

    let src = fr::images::Image::from_vec_u8(
        frame.width(),
        frame.height(),
        frame.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| DetectError::internal(format!("resize source: {e:?}")))?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| DetectError::internal(format!("resize: {e:?}")))?;

    RgbImage::from_raw(width, height, dst.buffer().to_vec())
        .ok_or_else(|| DetectError::internal("resized buffer size mismatch"))
}

/// HWC u8 → NCHW f32, 数值缩放到 [0, 1]
pub fn normalize(frame: &RgbImage) -> Array<f32, IxDyn> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let mut ys = Array::zeros((1, 3, h, w)).into_dyn();
    for (x, y, rgb) in frame.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = r as f32 / 255.0;
        ys[[0, 1, y, x]] = g as f32 / 255.0;
        ys[[0, 2, y, x]] = b as f32 / 255.0;
    }
    ys
}

/// 逐像素仿射变换 clip(alpha·v + beta, 0, 255)
pub fn enhance_contrast(frame: &RgbImage, alpha: f32, beta: f32) -> RgbImage {
    let mut out = frame.clone();
    for v in out.iter_mut() {
        *v = (alpha * *v as f32 + beta).round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_square_canvas_keeps_aspect() {
        let frame = RgbImage::from_pixel(1280, 720, Rgb([10, 200, 30]));
        let lb = letterbox(&frame, 640, PAD_COLOR).unwrap();
        assert_eq!(lb.canvas.dimensions(), (640, 640));
        assert_eq!((lb.new_width, lb.new_height), (640, 360));
        assert_eq!((lb.left, lb.top), (0, 140));

        let ratio_in = 1280.0 / 720.0;
        let ratio_out = lb.new_width as f32 / lb.new_height as f32;
        assert!((ratio_in - ratio_out).abs() * lb.new_height as f32 <= 1.0);

        assert_eq!(*lb.canvas.get_pixel(320, 0), PAD_COLOR);
        let inner = lb.canvas.get_pixel(320, 320).0;
        for (a, b) in inner.iter().zip([10u8, 200, 30]) {
            assert!(a.abs_diff(b) <= 1);
        }
        assert_eq!(*lb.canvas.get_pixel(320, 639), PAD_COLOR);
    }

    #[test]
    fn test_letterbox_odd_padding_floor() {
        // 640 / 301 * 100 = 212.6 → 213, 余量 427 → top 213, bottom 214
        let frame = RgbImage::from_pixel(301, 100, Rgb([0, 0, 0]));
        let lb = letterbox(&frame, 640, PAD_COLOR).unwrap();
        assert_eq!(lb.new_height, 213);
        assert_eq!(lb.top, 213);
        assert_eq!(lb.canvas.dimensions(), (640, 640));
    }

    #[test]
    fn test_letterbox_tiny_and_tall() {
        let frame = RgbImage::from_pixel(1, 900, Rgb([1, 2, 3]));
        let lb = letterbox(&frame, 640, PAD_COLOR).unwrap();
        assert_eq!(lb.canvas.dimensions(), (640, 640));
        assert_eq!(lb.new_width, 1);
        assert_eq!(lb.new_height, 640);

        let (x, y) = lb.to_original(lb.left as f32, 320.0);
        assert!(x.abs() < 1e-3);
        assert!((y - 450.0).abs() < 1.0);
    }

    #[test]
    fn test_normalize_range_and_shape() {
        let frame = RgbImage::from_fn(4, 2, |x, _| Rgb([255, (x * 50) as u8, 0]));
        let t = normalize(&frame);
        assert_eq!(t.shape(), &[1, 3, 2, 4]);
        assert_eq!(t[[0, 0, 1, 3]], 1.0);
        assert!((t[[0, 1, 0, 2]] - 100.0 / 255.0).abs() < 1e-6);
        assert!(t.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_enhance_contrast_clips() {
        let frame = RgbImage::from_fn(3, 1, |x, _| {
            let v = [10u8, 100, 250][x as usize];
            Rgb([v, v, v])
        });
        let out = enhance_contrast(&frame, 1.5, 20.0);
        assert_eq!(out.get_pixel(0, 0).0[0], 35);
        assert_eq!(out.get_pixel(1, 0).0[0], 170);
        assert_eq!(out.get_pixel(2, 0).0[0], 255);

        let dark = enhance_contrast(&frame, 1.0, -50.0);
        assert_eq!(dark.get_pixel(0, 0).0[0], 0);
    }
}
