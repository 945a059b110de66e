//! Batch assembly with optional prefetching

use crate::augment::{MultiCropAugmentation, View};
use crate::data::{EpochSampler, ImageFolderDataset};
use crate::Result;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// One training batch in crop-major layout: `views_by_crop[c][b]` is crop `c`
/// of sample `b`. Crops 0 and 1 are the global views.
pub struct Batch {
    pub views_by_crop: Vec<Vec<View>>,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.views_by_crop.first().map_or(0, Vec::len)
    }
}

/// Assembles augmented multi-crop batches from an image folder.
///
/// Per-sample RNGs are seeded from `(seed, epoch, dataset index)` so a run is
/// reproducible regardless of worker count or batch boundaries.
pub struct DataLoader {
    dataset: Arc<ImageFolderDataset>,
    augmentation: Arc<MultiCropAugmentation>,
    sampler: EpochSampler,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
}

impl DataLoader {
    pub fn new(
        dataset: ImageFolderDataset,
        augmentation: MultiCropAugmentation,
        sampler: EpochSampler,
        batch_size: usize,
        num_workers: usize,
        seed: u64,
    ) -> Self {
        Self {
            dataset: Arc::new(dataset),
            augmentation: Arc::new(augmentation),
            sampler,
            batch_size,
            num_workers,
            seed,
        }
    }

    /// Number of full batches per epoch. Trailing samples that do not fill a
    /// batch are dropped so every step sees a complete batch.
    pub fn steps_per_epoch(&self) -> usize {
        self.sampler.samples_per_rank() / self.batch_size
    }

    pub fn ncrops(&self) -> usize {
        self.augmentation.ncrops()
    }

    /// Iterate the batches of one epoch. With `num_workers > 0` a background
    /// thread loads and augments ahead of the training loop.
    pub fn epoch(&self, epoch: usize) -> BatchIter {
        let indices = self.sampler.indices(epoch);
        let steps = self.steps_per_epoch();
        if self.num_workers == 0 {
            BatchIter::Sync {
                dataset: Arc::clone(&self.dataset),
                augmentation: Arc::clone(&self.augmentation),
                indices,
                batch_size: self.batch_size,
                seed: self.seed,
                epoch,
                step: 0,
                steps,
            }
        } else {
            let (tx, rx) = mpsc::sync_channel(self.num_workers);
            let dataset = Arc::clone(&self.dataset);
            let augmentation = Arc::clone(&self.augmentation);
            let batch_size = self.batch_size;
            let seed = self.seed;
            let handle = thread::spawn(move || {
                for step in 0..steps {
                    let chunk = &indices[step * batch_size..(step + 1) * batch_size];
                    let batch = assemble(&dataset, &augmentation, chunk, seed, epoch);
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
            });
            BatchIter::Prefetch {
                rx,
                handle: Some(handle),
            }
        }
    }
}

fn assemble(
    dataset: &ImageFolderDataset,
    augmentation: &MultiCropAugmentation,
    indices: &[usize],
    seed: u64,
    epoch: usize,
) -> Result<Batch> {
    let ncrops = augmentation.ncrops();
    let mut views_by_crop: Vec<Vec<View>> = (0..ncrops)
        .map(|_| Vec::with_capacity(indices.len()))
        .collect();
    for &idx in indices {
        let img = dataset.load(idx)?;
        let mut rng = StdRng::seed_from_u64(
            seed ^ (epoch as u64).rotate_left(32) ^ (idx as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
        );
        let views = augmentation.transform(&img, &mut rng);
        for (crop, view) in views.into_iter().enumerate() {
            views_by_crop[crop].push(view);
        }
    }
    Ok(Batch { views_by_crop })
}

pub enum BatchIter {
    Sync {
        dataset: Arc<ImageFolderDataset>,
        augmentation: Arc<MultiCropAugmentation>,
        indices: Vec<usize>,
        batch_size: usize,
        seed: u64,
        epoch: usize,
        step: usize,
        steps: usize,
    },
    Prefetch {
        rx: mpsc::Receiver<Result<Batch>>,
        handle: Option<thread::JoinHandle<()>>,
    },
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchIter::Sync {
                dataset,
                augmentation,
                indices,
                batch_size,
                seed,
                epoch,
                step,
                steps,
            } => {
                if *step >= *steps {
                    return None;
                }
                let chunk = &indices[*step * *batch_size..(*step + 1) * *batch_size];
                let batch = assemble(dataset, augmentation, chunk, *seed, *epoch);
                *step += 1;
                Some(batch)
            }
            BatchIter::Prefetch { rx, handle } => match rx.recv() {
                Ok(batch) => Some(batch),
                Err(_) => {
                    if let Some(h) = handle.take() {
                        let _ = h.join();
                    }
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::AugStrategy;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn tiny_dataset(n: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        let class = dir.path().join("a");
        std::fs::create_dir(&class).unwrap();
        for i in 0..n {
            let img = RgbImage::from_pixel(16, 16, Rgb([(i * 10) as u8, 50, 200]));
            img.save(class.join(format!("{i}.png"))).unwrap();
        }
        dir
    }

    fn tiny_loader(dir: &TempDir, num_workers: usize) -> DataLoader {
        let dataset = ImageFolderDataset::open(dir.path()).unwrap();
        let aug = MultiCropAugmentation::new((0.4, 1.0), (0.05, 0.4), 2, AugStrategy::FlipColorJitter)
            .unwrap()
            .with_sizes(8, 4);
        let sampler = EpochSampler::new(dataset.len(), 1, 0, 0);
        DataLoader::new(dataset, aug, sampler, 2, num_workers, 0)
    }

    #[test]
    fn yields_crop_major_batches() {
        let dir = tiny_dataset(6);
        let loader = tiny_loader(&dir, 0);
        assert_eq!(loader.steps_per_epoch(), 3);
        let batches: Vec<_> = loader.epoch(0).map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            assert_eq!(batch.views_by_crop.len(), 4);
            assert_eq!(batch.batch_size(), 2);
            assert_eq!(batch.views_by_crop[0][0].dim(), (3, 8, 8));
            assert_eq!(batch.views_by_crop[2][0].dim(), (3, 4, 4));
        }
    }

    #[test]
    fn drops_incomplete_trailing_batch() {
        let dir = tiny_dataset(5);
        let loader = tiny_loader(&dir, 0);
        assert_eq!(loader.steps_per_epoch(), 2);
        assert_eq!(loader.epoch(0).count(), 2);
    }

    #[test]
    fn prefetching_matches_synchronous() {
        let dir = tiny_dataset(4);
        let sync = tiny_loader(&dir, 0);
        let pre = tiny_loader(&dir, 2);
        let a: Vec<_> = sync.epoch(1).map(|b| b.unwrap()).collect();
        let b: Vec<_> = pre.epoch(1).map(|b| b.unwrap()).collect();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            for (vx, vy) in x.views_by_crop.iter().zip(&y.views_by_crop) {
                for (tx, ty) in vx.iter().zip(vy) {
                    assert_eq!(tx, ty);
                }
            }
        }
    }
}
