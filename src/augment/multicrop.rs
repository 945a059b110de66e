//! Multi-crop view generation

use crate::augment::{
    normalize_to_tensor, random_resized_crop, AugMix, FlipColorJitter, MixProfile, View, ViewBatch,
};
use crate::{Error, Result};
use image::RgbImage;
use rand::rngs::StdRng;

/// Which photometric strategy each crop runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugStrategy {
    /// Horizontal flip + color jitter + random grayscale on every crop.
    FlipColorJitter,
    /// Per-crop AugMix profiles (heavy first global, light-but-wide second
    /// global, medium locals).
    AugMix,
}

/// Turns one source image into the fixed ordered view list
/// `[global_1 (224), global_2 (224), local_1..K (96)]`.
pub struct MultiCropAugmentation {
    global_size: u32,
    local_size: u32,
    global_scale: (f32, f32),
    local_scale: (f32, f32),
    local_crops_number: usize,
    strategy: AugStrategy,
    jitter: FlipColorJitter,
}

impl MultiCropAugmentation {
    pub fn new(
        global_scale: (f32, f32),
        local_scale: (f32, f32),
        local_crops_number: usize,
        strategy: AugStrategy,
    ) -> Result<Self> {
        for (label, (lo, hi)) in [("global", global_scale), ("local", local_scale)] {
            if !(0.0 < lo && lo <= hi && hi <= 1.0) {
                return Err(Error::Config(format!(
                    "{label}_crops_scale must satisfy 0 < lo <= hi <= 1, got ({lo}, {hi})"
                )));
            }
        }
        Ok(Self {
            global_size: 224,
            local_size: 96,
            global_scale,
            local_scale,
            local_crops_number,
            strategy,
            jitter: FlipColorJitter::default(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_sizes(mut self, global: u32, local: u32) -> Self {
        self.global_size = global;
        self.local_size = local;
        self
    }

    /// Total views per sample.
    pub fn ncrops(&self) -> usize {
        2 + self.local_crops_number
    }

    /// Produce the ordered view list for one image.
    pub fn transform(&self, img: &RgbImage, rng: &mut StdRng) -> ViewBatch {
        let mut views = Vec::with_capacity(self.ncrops());
        views.push(self.one_view(img, self.global_size, self.global_scale, MixProfile::GLOBAL_FIRST, rng));
        views.push(self.one_view(img, self.global_size, self.global_scale, MixProfile::GLOBAL_SECOND, rng));
        for _ in 0..self.local_crops_number {
            views.push(self.one_view(img, self.local_size, self.local_scale, MixProfile::LOCAL, rng));
        }
        views
    }

    fn one_view(
        &self,
        img: &RgbImage,
        size: u32,
        scale: (f32, f32),
        profile: MixProfile,
        rng: &mut StdRng,
    ) -> View {
        let cropped = random_resized_crop(img, size, scale, rng);
        let augmented = match self.strategy {
            AugStrategy::FlipColorJitter => self.jitter.apply(&cropped, rng),
            AugStrategy::AugMix => AugMix::new(profile).apply(&cropped, rng),
        };
        normalize_to_tensor(&augmented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn source() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| image::Rgb([(x * 4) as u8, (y * 5) as u8, 77]))
    }

    fn pipeline(locals: usize, strategy: AugStrategy) -> MultiCropAugmentation {
        MultiCropAugmentation::new((0.4, 1.0), (0.05, 0.4), locals, strategy).unwrap()
    }

    #[test]
    fn default_output_is_two_224_views_plus_96_locals() {
        let aug = pipeline(6, AugStrategy::AugMix);
        let mut rng = StdRng::seed_from_u64(0);
        let views = aug.transform(&source(), &mut rng);
        assert_eq!(views.len(), 8);
        assert_eq!(views[0].dim(), (3, 224, 224));
        assert_eq!(views[1].dim(), (3, 224, 224));
        for local in &views[2..] {
            assert_eq!(local.dim(), (3, 96, 96));
        }
    }

    #[test]
    fn zero_locals_yield_exactly_two_views() {
        let aug = pipeline(0, AugStrategy::FlipColorJitter).with_sizes(32, 16);
        let mut rng = StdRng::seed_from_u64(1);
        let views = aug.transform(&source(), &mut rng);
        assert_eq!(views.len(), 2);
    }

    #[test]
    fn views_draw_independent_randomness() {
        let aug = pipeline(2, AugStrategy::AugMix).with_sizes(16, 8);
        let mut rng = StdRng::seed_from_u64(2);
        let views = aug.transform(&source(), &mut rng);
        // Two global views of the same image should almost surely differ.
        assert_ne!(views[0], views[1]);
    }

    #[test]
    fn invalid_scale_range_rejected() {
        assert!(MultiCropAugmentation::new((0.9, 0.4), (0.05, 0.4), 2, AugStrategy::AugMix).is_err());
        assert!(MultiCropAugmentation::new((0.0, 1.0), (0.05, 0.4), 2, AugStrategy::AugMix).is_err());
    }
}
