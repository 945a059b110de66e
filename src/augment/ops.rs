//! Photometric and geometric operator set
//!
//! A finite, tagged set of pure `(image, severity) -> image` operators.
//! Severity draws follow the original AugMix parameterization: the effective
//! level is sampled uniformly in `(0.1, severity)` per application, then
//! scaled into each operator's own range.

use image::imageops;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;

/// Every augmentation operator the mixture can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugOp {
    AutoContrast,
    Equalize,
    Posterize,
    Rotate,
    Solarize,
    Color,
    Contrast,
    Brightness,
    Sharpness,
    ShearX,
    ShearY,
    TranslateX,
    TranslateY,
}

/// The full operator table. The mixture draws one op from each half per depth
/// iteration, so the split below is part of the behavior, not cosmetics.
pub const ALL_OPS: [AugOp; 13] = [
    AugOp::AutoContrast,
    AugOp::Equalize,
    AugOp::Posterize,
    AugOp::Rotate,
    AugOp::Solarize,
    AugOp::Color,
    AugOp::Contrast,
    AugOp::Brightness,
    AugOp::Sharpness,
    AugOp::ShearX,
    AugOp::ShearY,
    AugOp::TranslateX,
    AugOp::TranslateY,
];

/// First half of the table (tonal ops plus rotate).
pub const OPS_FIRST_HALF: &[AugOp] = &[
    AugOp::AutoContrast,
    AugOp::Equalize,
    AugOp::Posterize,
    AugOp::Rotate,
    AugOp::Solarize,
    AugOp::Color,
    AugOp::Contrast,
    AugOp::Brightness,
];
/// Second half (sharpness plus affine warps).
pub const OPS_SECOND_HALF: &[AugOp] = &[
    AugOp::Sharpness,
    AugOp::ShearX,
    AugOp::ShearY,
    AugOp::TranslateX,
    AugOp::TranslateY,
];

fn sample_level(severity: f32, rng: &mut StdRng) -> f32 {
    rng.random_range(0.1..severity.max(0.1 + f32::EPSILON))
}

fn int_parameter(level: f32, maxval: f32) -> i32 {
    (level * maxval / 10.0) as i32
}

fn float_parameter(level: f32, maxval: f32) -> f32 {
    level * maxval / 10.0
}

impl AugOp {
    /// Apply this operator at the given severity.
    pub fn apply(self, img: &RgbImage, severity: f32, rng: &mut StdRng) -> RgbImage {
        let size = img.width().max(img.height()) as f32;
        match self {
            AugOp::AutoContrast => autocontrast(img),
            AugOp::Equalize => equalize(img),
            AugOp::Posterize => {
                let level = int_parameter(sample_level(severity, rng), 4.0);
                posterize(img, (4 - level).clamp(1, 8) as u8)
            }
            AugOp::Rotate => {
                let mut degrees = int_parameter(sample_level(severity, rng), 30.0) as f32;
                if rng.random_bool(0.5) {
                    degrees = -degrees;
                }
                rotate(img, degrees)
            }
            AugOp::Solarize => {
                let level = int_parameter(sample_level(severity, rng), 256.0);
                solarize(img, (256 - level).clamp(0, 255) as u8)
            }
            AugOp::Color => enhance_color(img, enhance_factor(severity, rng)),
            AugOp::Contrast => enhance_contrast(img, enhance_factor(severity, rng)),
            AugOp::Brightness => enhance_brightness(img, enhance_factor(severity, rng)),
            AugOp::Sharpness => enhance_sharpness(img, enhance_factor(severity, rng)),
            AugOp::ShearX => {
                let level = signed(float_parameter(sample_level(severity, rng), 0.3), rng);
                affine(img, [1.0, level, 0.0, 0.0, 1.0, 0.0])
            }
            AugOp::ShearY => {
                let level = signed(float_parameter(sample_level(severity, rng), 0.3), rng);
                affine(img, [1.0, 0.0, 0.0, level, 1.0, 0.0])
            }
            AugOp::TranslateX => {
                let level = signed(
                    int_parameter(sample_level(severity, rng), size / 3.0) as f32,
                    rng,
                );
                affine(img, [1.0, 0.0, level, 0.0, 1.0, 0.0])
            }
            AugOp::TranslateY => {
                let level = signed(
                    int_parameter(sample_level(severity, rng), size / 3.0) as f32,
                    rng,
                );
                affine(img, [1.0, 0.0, 0.0, 0.0, 1.0, level])
            }
        }
    }
}

fn signed(level: f32, rng: &mut StdRng) -> f32 {
    if rng.random_bool(0.5) {
        -level
    } else {
        level
    }
}

fn enhance_factor(severity: f32, rng: &mut StdRng) -> f32 {
    float_parameter(sample_level(severity, rng), 1.8) + 0.1
}

/// Per-channel min/max stretch to the full value range.
pub fn autocontrast(img: &RgbImage) -> RgbImage {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for pixel in img.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(pixel.0[c]);
            hi[c] = hi[c].max(pixel.0[c]);
        }
    }
    map_pixels(img, |c, v| {
        if hi[c] > lo[c] {
            ((v as f32 - lo[c] as f32) * 255.0 / (hi[c] - lo[c]) as f32).round() as u8
        } else {
            v
        }
    })
}

/// Per-channel histogram equalization.
pub fn equalize(img: &RgbImage) -> RgbImage {
    let mut luts = [[0u8; 256]; 3];
    let total = (img.width() * img.height()) as u32;
    for c in 0..3 {
        let mut hist = [0u32; 256];
        for pixel in img.pixels() {
            hist[pixel.0[c] as usize] += 1;
        }
        let mut cdf = 0u32;
        let mut cdf_min = 0u32;
        let mut found_min = false;
        let mut cum = [0u32; 256];
        for (v, &h) in hist.iter().enumerate() {
            cdf += h;
            cum[v] = cdf;
            if !found_min && h > 0 {
                cdf_min = cdf;
                found_min = true;
            }
        }
        let denom = total.saturating_sub(cdf_min).max(1) as f32;
        for v in 0..256 {
            luts[c][v] =
                ((cum[v].saturating_sub(cdf_min)) as f32 / denom * 255.0).round() as u8;
        }
    }
    map_pixels(img, |c, v| luts[c][v as usize])
}

/// Keep only the top `bits` bits of each channel.
pub fn posterize(img: &RgbImage, bits: u8) -> RgbImage {
    let mask = !((1u16 << (8 - bits.min(8))) - 1) as u8;
    map_pixels(img, |_, v| v & mask)
}

/// Invert every channel value at or above `threshold`.
pub fn solarize(img: &RgbImage, threshold: u8) -> RgbImage {
    map_pixels(img, |_, v| if v >= threshold { 255 - v } else { v })
}

/// Rotate about the image center with bilinear resampling.
pub fn rotate(img: &RgbImage, degrees: f32) -> RgbImage {
    let rad = degrees.to_radians();
    let (cos, sin) = (rad.cos(), rad.sin());
    let cx = img.width() as f32 / 2.0;
    let cy = img.height() as f32 / 2.0;
    // Output -> input mapping around the center.
    affine(
        img,
        [
            cos,
            -sin,
            cx - cos * cx + sin * cy,
            sin,
            cos,
            cy - sin * cx - cos * cy,
        ],
    )
}

/// Affine warp with output-to-input coefficients `(a, b, c, d, e, f)`:
/// the output pixel `(x, y)` samples the input at
/// `(a*x + b*y + c, d*x + e*y + f)` with bilinear interpolation; samples
/// falling outside the image are black.
pub fn affine(img: &RgbImage, coeffs: [f32; 6]) -> RgbImage {
    let [a, b, c, d, e, f] = coeffs;
    let (width, height) = img.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let sx = a * x as f32 + b * y as f32 + c;
        let sy = d * x as f32 + e * y as f32 + f;
        Rgb(bilinear_sample(img, sx, sy))
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    let (width, height) = img.dimensions();
    if x < -1.0 || y < -1.0 || x >= width as f32 || y >= height as f32 {
        return [0, 0, 0];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let fetch = |px: f32, py: f32| -> [f32; 3] {
        if px < 0.0 || py < 0.0 || px >= width as f32 || py >= height as f32 {
            [0.0; 3]
        } else {
            let p = img.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        }
    };
    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1.0, y0);
    let p01 = fetch(x0, y0 + 1.0);
    let p11 = fetch(x0 + 1.0, y0 + 1.0);
    let mut out = [0u8; 3];
    for ch in 0..3 {
        let top = p00[ch] * (1.0 - fx) + p10[ch] * fx;
        let bottom = p01[ch] * (1.0 - fx) + p11[ch] * fx;
        out[ch] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Blend from a degenerate image toward the original: factor 0 yields the
/// degenerate image, factor 1 the original, factors above 1 overshoot.
fn enhance_blend(original: &RgbImage, degenerate: &RgbImage, factor: f32) -> RgbImage {
    RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let o = original.get_pixel(x, y).0;
        let g = degenerate.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = g[c] as f32 + factor * (o[c] as f32 - g[c] as f32);
            out[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Saturation adjustment (degenerate image: per-pixel luma).
pub fn enhance_color(img: &RgbImage, factor: f32) -> RgbImage {
    let gray = luma_image(img);
    enhance_blend(img, &gray, factor)
}

/// Contrast adjustment (degenerate image: uniform mean luma).
pub fn enhance_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let mut sum = 0.0f64;
    for pixel in img.pixels() {
        sum += luma(pixel.0) as f64;
    }
    let mean = (sum / (img.width() as f64 * img.height() as f64)).round() as u8;
    let flat = RgbImage::from_pixel(img.width(), img.height(), Rgb([mean; 3]));
    enhance_blend(img, &flat, factor)
}

/// Brightness adjustment (degenerate image: black).
pub fn enhance_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let black = RgbImage::from_pixel(img.width(), img.height(), Rgb([0; 3]));
    enhance_blend(img, &black, factor)
}

/// Sharpness adjustment (degenerate image: 3x3 box smooth).
pub fn enhance_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let smooth = imageops::blur(img, 1.0);
    enhance_blend(img, &smooth, factor)
}

/// Per-pixel luma replicated over all three channels.
pub fn luma_image(img: &RgbImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let l = luma(img.get_pixel(x, y).0);
        Rgb([l; 3])
    })
}

fn luma(p: [u8; 3]) -> u8 {
    (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn map_pixels(img: &RgbImage, f: impl Fn(usize, u8) -> u8) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y).0;
        Rgb([f(0, p[0]), f(1, p[1]), f(2, p[2])])
    })
}
