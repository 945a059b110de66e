//! Random-resized-crop and tensor normalization

use crate::augment::View;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

/// ImageNet channel statistics used for normalization.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Crop a random area within `scale` (relative to the source area) and a
/// random aspect ratio in [3/4, 4/3], then resize to `size`² with bicubic
/// interpolation. Falls back to a center crop when no valid geometry is found.
pub fn random_resized_crop(
    img: &RgbImage,
    size: u32,
    scale: (f32, f32),
    rng: &mut StdRng,
) -> RgbImage {
    let (width, height) = img.dimensions();
    let area = (width * height) as f32;

    for _ in 0..10 {
        let target_area = area * rng.random_range(scale.0..=scale.1);
        let log_ratio = rng.random_range((0.75f32).ln()..=(4.0f32 / 3.0).ln());
        let ratio = log_ratio.exp();
        let w = (target_area * ratio).sqrt().round() as u32;
        let h = (target_area / ratio).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.random_range(0..=width - w);
            let y = rng.random_range(0..=height - h);
            let cropped = imageops::crop_imm(img, x, y, w, h).to_image();
            return imageops::resize(&cropped, size, size, FilterType::CatmullRom);
        }
    }

    // Center fallback.
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let cropped = imageops::crop_imm(img, x, y, side, side).to_image();
    imageops::resize(&cropped, size, size, FilterType::CatmullRom)
}

/// Convert to a CHW float tensor with ImageNet mean/std normalization.
pub fn normalize_to_tensor(img: &RgbImage) -> View {
    let (width, height) = img.dimensions();
    let mut out = Array3::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f32 / 255.0;
            out[[c, y as usize, x as usize]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    out
}
