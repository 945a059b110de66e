//! Flip + color jitter + grayscale strategy

use crate::augment::ops::{enhance_brightness, enhance_color, enhance_contrast, luma_image};
use image::imageops;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::Rng;

/// The non-mixture augmentation strategy: horizontal flip (p=0.5), color
/// jitter (p=0.8, brightness/contrast 0.4, saturation 0.2, hue 0.1) and
/// random grayscale (p=0.2).
#[derive(Debug, Clone, Copy)]
pub struct FlipColorJitter {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
}

impl Default for FlipColorJitter {
    fn default() -> Self {
        Self {
            brightness: 0.4,
            contrast: 0.4,
            saturation: 0.2,
            hue: 0.1,
        }
    }
}

impl FlipColorJitter {
    pub fn apply(&self, img: &RgbImage, rng: &mut StdRng) -> RgbImage {
        let mut out = if rng.random_bool(0.5) {
            imageops::flip_horizontal(img)
        } else {
            img.clone()
        };

        if rng.random_bool(0.8) {
            let b = rng.random_range(1.0 - self.brightness..=1.0 + self.brightness);
            out = enhance_brightness(&out, b);
            let c = rng.random_range(1.0 - self.contrast..=1.0 + self.contrast);
            out = enhance_contrast(&out, c);
            let s = rng.random_range(1.0 - self.saturation..=1.0 + self.saturation);
            out = enhance_color(&out, s);
            // Hue offset is a fraction of a full rotation.
            let h = rng.random_range(-self.hue..=self.hue);
            out = imageops::huerotate(&out, (h * 360.0) as i32);
        }

        if rng.random_bool(0.2) {
            out = luma_image(&out);
        }
        out
    }
}
