//! Dataset, epoch-seeded distributed sampling and batch loading

mod dataset;
mod loader;
mod sampler;

pub use dataset::ImageFolderDataset;
pub use loader::{Batch, BatchIter, DataLoader};
pub use sampler::EpochSampler;
