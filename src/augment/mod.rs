//! Multi-crop augmentation pipeline
//!
//! One source image becomes an ordered list of views: two large "global"
//! crops that keep holistic scene content and K small "local" crops that zoom
//! into parts of it. Each view runs through a selectable photometric strategy
//! (flip + color jitter + grayscale, or an AugMix operator mixture) and is
//! normalized into a CHW float tensor.

mod augmix;
mod color;
mod crop;
mod multicrop;
mod ops;

pub use augmix::{AugMix, MixProfile};
pub use color::FlipColorJitter;
pub use crop::{normalize_to_tensor, random_resized_crop, IMAGENET_MEAN, IMAGENET_STD};
pub use multicrop::{AugStrategy, MultiCropAugmentation};
pub use ops::AugOp;

/// A normalized view: CHW float tensor.
pub type View = ndarray::Array3<f32>;

/// Ordered views of one sample: `[global_1, global_2, local_1, ..., local_K]`.
pub type ViewBatch = Vec<View>;
