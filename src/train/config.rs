//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a run needs, assembled from the command line and stored inside
/// every checkpoint so a snapshot documents the run that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub arch: String,
    pub patch_size: usize,
    pub out_dim: usize,
    pub norm_last_layer: bool,
    pub momentum_teacher: f32,
    pub use_bn_in_head: bool,
    pub warmup_teacher_temp: f32,
    pub teacher_temp: f32,
    pub warmup_teacher_temp_epochs: usize,
    pub use_fp16: bool,
    pub weight_decay: f32,
    pub weight_decay_end: f32,
    pub clip_grad: f32,
    pub batch_size_per_gpu: usize,
    pub epochs: usize,
    pub freeze_last_layer: usize,
    pub lr: f32,
    pub warmup_epochs: usize,
    pub min_lr: f32,
    pub optimizer: String,
    pub drop_path_rate: f32,
    pub global_crops_scale: (f32, f32),
    pub local_crops_number: usize,
    pub local_crops_scale: (f32, f32),
    pub data_path: PathBuf,
    pub output_dir: PathBuf,
    pub saveckp_freq: usize,
    pub seed: u64,
    pub num_workers: usize,
    pub dist_url: String,
    pub augmix: bool,
}

impl TrainConfig {
    /// Base learning rate linearly scaled with the total batch size,
    /// `lr * batch_size_per_gpu * world_size / 256`.
    pub fn scaled_lr(&self, world_size: usize) -> f32 {
        self.lr * (self.batch_size_per_gpu * world_size) as f32 / 256.0
    }

    pub fn ncrops(&self) -> usize {
        2 + self.local_crops_number
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            arch: "vit_small".to_string(),
            patch_size: 16,
            out_dim: 1024,
            norm_last_layer: true,
            momentum_teacher: 0.996,
            use_bn_in_head: false,
            warmup_teacher_temp: 0.04,
            teacher_temp: 0.04,
            warmup_teacher_temp_epochs: 0,
            use_fp16: true,
            weight_decay: 0.04,
            weight_decay_end: 0.4,
            clip_grad: 3.0,
            batch_size_per_gpu: 8,
            epochs: 110,
            freeze_last_layer: 1,
            lr: 0.0005,
            warmup_epochs: 10,
            min_lr: 1e-6,
            optimizer: "adamw".to_string(),
            drop_path_rate: 0.1,
            global_crops_scale: (0.4, 1.0),
            local_crops_number: 6,
            local_crops_scale: (0.05, 0.4),
            data_path: PathBuf::from("data/"),
            output_dir: PathBuf::from("."),
            saveckp_freq: 10,
            seed: 0,
            num_workers: 10,
            dist_url: "env://".to_string(),
            augmix: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lr_scales_with_total_batch_size() {
        let cfg = TrainConfig {
            lr: 0.0005,
            batch_size_per_gpu: 64,
            ..Default::default()
        };
        assert_relative_eq!(cfg.scaled_lr(4), 0.0005 * 256.0 / 256.0);
        assert_relative_eq!(cfg.scaled_lr(1), 0.0005 * 64.0 / 256.0);
    }

    #[test]
    fn json_round_trip() {
        let cfg = TrainConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.arch, cfg.arch);
        assert_eq!(back.global_crops_scale, cfg.global_crops_scale);
        assert_eq!(back.epochs, cfg.epochs);
    }
}
