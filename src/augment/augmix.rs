//! AugMix operator-mixture augmentation

use crate::augment::ops::{OPS_FIRST_HALF, OPS_SECOND_HALF};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma};

/// Severity/width/depth configuration of one mixture.
///
/// The three profiles mirror the original run configuration: the first global
/// crop gets the heaviest augmentation, the second global crop the lightest
/// but widest, and local crops sit in between.
#[derive(Debug, Clone, Copy)]
pub struct MixProfile {
    pub severity: f32,
    pub width: usize,
    pub depth: usize,
}

impl MixProfile {
    pub const GLOBAL_FIRST: MixProfile = MixProfile {
        severity: 3.0,
        width: 1,
        depth: 2,
    };
    pub const GLOBAL_SECOND: MixProfile = MixProfile {
        severity: 1.0,
        width: 2,
        depth: 2,
    };
    pub const LOCAL: MixProfile = MixProfile {
        severity: 2.0,
        width: 1,
        depth: 2,
    };
}

/// AugMix: blend several independently-augmented chains of the image, then
/// blend that mixture with the clean image.
#[derive(Debug, Clone, Copy)]
pub struct AugMix {
    profile: MixProfile,
}

impl AugMix {
    pub fn new(profile: MixProfile) -> Self {
        Self { profile }
    }

    /// Run one augmentation: `mixed = (1 - m) * clean + m * Σ wᵢ * chainᵢ`
    /// with `w ~ Dirichlet(1)` over chains and `m ~ Beta(1, 1)`.
    pub fn apply(&self, img: &RgbImage, rng: &mut StdRng) -> RgbImage {
        let MixProfile {
            severity,
            width,
            depth,
        } = self.profile;

        let weights = dirichlet_uniform(width, rng);
        let m: f32 = Beta::new(1.0, 1.0).unwrap().sample(rng);

        let pixels = (img.width() * img.height()) as usize;
        let mut mix = vec![0.0f32; pixels * 3];
        for &weight in &weights {
            let mut chain = img.clone();
            let chain_depth = if depth > 0 { depth } else { rng.random_range(1..4) };
            for _ in 0..chain_depth {
                // One draw from each half of the operator table per level.
                let first = OPS_FIRST_HALF[rng.random_range(0..OPS_FIRST_HALF.len())];
                chain = first.apply(&chain, severity, rng);
                let second = OPS_SECOND_HALF[rng.random_range(0..OPS_SECOND_HALF.len())];
                chain = second.apply(&chain, severity, rng);
            }
            for (acc, &v) in mix.iter_mut().zip(chain.as_raw().iter()) {
                *acc += weight * v as f32;
            }
        }

        let clean = img.as_raw();
        let mut out = RgbImage::new(img.width(), img.height());
        for (i, pixel) in out.pixels_mut().enumerate() {
            let mut channels = [0u8; 3];
            for c in 0..3 {
                let idx = i * 3 + c;
                let v = (1.0 - m) * clean[idx] as f32 + m * mix[idx];
                channels[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            *pixel = Rgb(channels);
        }
        out
    }
}

/// Dirichlet with unit concentration, via normalized Gamma(1, 1) draws.
fn dirichlet_uniform(width: usize, rng: &mut StdRng) -> Vec<f32> {
    let gamma = Gamma::new(1.0f32, 1.0).unwrap();
    let mut draws: Vec<f32> = (0..width).map(|_| gamma.sample(rng).max(1e-10)).collect();
    let sum: f32 = draws.iter().sum();
    for d in draws.iter_mut() {
        *d /= sum;
    }
    draws
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_image() -> RgbImage {
        RgbImage::from_fn(20, 20, |x, y| Rgb([(x * 12) as u8, (y * 12) as u8, 128]))
    }

    #[test]
    fn output_keeps_dimensions() {
        let img = test_image();
        let mut rng = StdRng::seed_from_u64(0);
        for profile in [
            MixProfile::GLOBAL_FIRST,
            MixProfile::GLOBAL_SECOND,
            MixProfile::LOCAL,
        ] {
            let out = AugMix::new(profile).apply(&img, &mut rng);
            assert_eq!(out.dimensions(), img.dimensions());
        }
    }

    #[test]
    fn dirichlet_weights_form_a_distribution() {
        let mut rng = StdRng::seed_from_u64(1);
        for width in [1usize, 2, 5] {
            let w = dirichlet_uniform(width, &mut rng);
            assert_eq!(w.len(), width);
            let sum: f32 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(w.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn width_one_weight_is_unity() {
        let mut rng = StdRng::seed_from_u64(2);
        let w = dirichlet_uniform(1, &mut rng);
        assert!((w[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let img = test_image();
        let a = AugMix::new(MixProfile::LOCAL).apply(&img, &mut StdRng::seed_from_u64(7));
        let b = AugMix::new(MixProfile::LOCAL).apply(&img, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
