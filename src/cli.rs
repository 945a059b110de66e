//! Command-line entry point
//!
//! One flag per knob of the run, parsed with clap derive into [`Cli`] and
//! folded into a [`TrainConfig`]. Flags keep their snake_case spelling so
//! existing launch scripts keep working.

use crate::augment::{AugStrategy, MultiCropAugmentation};
use crate::data::{DataLoader, EpochSampler, ImageFolderDataset};
use crate::dist::{Collective, SingleProcess};
use crate::train::{TrainConfig, Trainer};
use crate::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(name = "destilar", about = "Self-distillation training with multi-crop views")]
#[command(rename_all = "snake_case")]
pub struct Cli {
    /// Architecture of the embedding network.
    #[arg(long, default_value = "vit_small")]
    pub arch: String,

    /// Patch size in pixels, recorded for patch-based collaborator networks.
    #[arg(long, default_value_t = 16)]
    pub patch_size: usize,

    /// Dimensionality of the output embeddings.
    #[arg(long, default_value_t = 1024)]
    pub out_dim: usize,

    /// Whether to weight-normalize the last projection layer.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub norm_last_layer: bool,

    /// Base EMA momentum for the teacher; ramps to 1.0 over the run.
    #[arg(long, default_value_t = 0.996)]
    pub momentum_teacher: f32,

    /// Recorded for collaborator networks with batch-norm heads.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub use_bn_in_head: bool,

    /// Initial teacher softmax temperature.
    #[arg(long, default_value_t = 0.04)]
    pub warmup_teacher_temp: f32,

    /// Final teacher softmax temperature after the warmup epochs.
    #[arg(long, default_value_t = 0.04)]
    pub teacher_temp: f32,

    /// Epochs to linearly ramp the teacher temperature.
    #[arg(long, default_value_t = 0)]
    pub warmup_teacher_temp_epochs: usize,

    /// Enable dynamic loss scaling with overflow step skips.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub use_fp16: bool,

    /// Initial weight decay, cosine-ramped to --weight_decay_end.
    #[arg(long, default_value_t = 0.04)]
    pub weight_decay: f32,

    /// Final weight decay at the end of training.
    #[arg(long, default_value_t = 0.4)]
    pub weight_decay_end: f32,

    /// Maximal gradient norm; 0 disables clipping.
    #[arg(long, default_value_t = 3.0)]
    pub clip_grad: f32,

    /// Batch size per worker.
    #[arg(long, default_value_t = 8)]
    pub batch_size_per_gpu: usize,

    /// Total number of training epochs.
    #[arg(long, default_value_t = 110)]
    pub epochs: usize,

    /// Epochs during which the output layer stays frozen.
    #[arg(long, default_value_t = 1)]
    pub freeze_last_layer: usize,

    /// Base learning rate at total batch size 256.
    #[arg(long, default_value_t = 0.0005)]
    pub lr: f32,

    /// Epochs of linear learning-rate warmup.
    #[arg(long, default_value_t = 10)]
    pub warmup_epochs: usize,

    /// Floor of the learning-rate cosine decay.
    #[arg(long, default_value_t = 1e-6)]
    pub min_lr: f32,

    /// Optimizer: adamw, sgd or lars.
    #[arg(long, default_value = "adamw")]
    pub optimizer: String,

    /// Stochastic depth rate, recorded for collaborator networks.
    #[arg(long, default_value_t = 0.1)]
    pub drop_path_rate: f32,

    /// Area range of the global crops, as two floats.
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], default_values_t = [0.4, 1.0])]
    pub global_crops_scale: Vec<f32>,

    /// Number of small local crops per sample.
    #[arg(long, default_value_t = 6)]
    pub local_crops_number: usize,

    /// Area range of the local crops, as two floats.
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], default_values_t = [0.05, 0.4])]
    pub local_crops_scale: Vec<f32>,

    /// Root directory of the training images.
    #[arg(long, default_value = "data/")]
    pub data_path: PathBuf,

    /// Directory for checkpoints and the epoch log.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Keep a permanent checkpoint copy every N epochs.
    #[arg(long, default_value_t = 10)]
    pub saveckp_freq: usize,

    /// Base random seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Data-loading worker threads; 0 loads synchronously.
    #[arg(long, default_value_t = 10)]
    pub num_workers: usize,

    /// Rendezvous URL, recorded for multi-process launchers.
    #[arg(long, default_value = "env://")]
    pub dist_url: String,

    /// Use AugMix operator mixing instead of flip + color jitter.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub augmix: bool,
}

fn scale_pair(name: &str, values: &[f32]) -> Result<(f32, f32)> {
    match values {
        [lo, hi] => Ok((*lo, *hi)),
        other => Err(Error::Config(format!(
            "--{name} takes exactly 2 values, got {}",
            other.len()
        ))),
    }
}

impl Cli {
    pub fn into_config(self) -> Result<TrainConfig> {
        let global_crops_scale = scale_pair("global_crops_scale", &self.global_crops_scale)?;
        let local_crops_scale = scale_pair("local_crops_scale", &self.local_crops_scale)?;
        Ok(TrainConfig {
            arch: self.arch,
            patch_size: self.patch_size,
            out_dim: self.out_dim,
            norm_last_layer: self.norm_last_layer,
            momentum_teacher: self.momentum_teacher,
            use_bn_in_head: self.use_bn_in_head,
            warmup_teacher_temp: self.warmup_teacher_temp,
            teacher_temp: self.teacher_temp,
            warmup_teacher_temp_epochs: self.warmup_teacher_temp_epochs,
            use_fp16: self.use_fp16,
            weight_decay: self.weight_decay,
            weight_decay_end: self.weight_decay_end,
            clip_grad: self.clip_grad,
            batch_size_per_gpu: self.batch_size_per_gpu,
            epochs: self.epochs,
            freeze_last_layer: self.freeze_last_layer,
            lr: self.lr,
            warmup_epochs: self.warmup_epochs,
            min_lr: self.min_lr,
            optimizer: self.optimizer,
            drop_path_rate: self.drop_path_rate,
            global_crops_scale,
            local_crops_number: self.local_crops_number,
            local_crops_scale,
            data_path: self.data_path,
            output_dir: self.output_dir,
            saveckp_freq: self.saveckp_freq,
            seed: self.seed,
            num_workers: self.num_workers,
            dist_url: self.dist_url,
            augmix: self.augmix,
        })
    }
}

/// Assemble the run from a parsed command line and drive it to completion.
pub fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    run_with_collective(config, Arc::new(SingleProcess))
}

/// Entry point shared by the binary and multi-worker test harnesses.
pub fn run_with_collective(config: TrainConfig, collective: Arc<dyn Collective>) -> Result<()> {
    let dataset = ImageFolderDataset::open(&config.data_path)?;
    let strategy = if config.augmix {
        AugStrategy::AugMix
    } else {
        AugStrategy::FlipColorJitter
    };
    let augmentation = MultiCropAugmentation::new(
        config.global_crops_scale,
        config.local_crops_scale,
        config.local_crops_number,
        strategy,
    )?;
    let sampler = EpochSampler::new(
        dataset.len(),
        collective.world_size(),
        collective.rank(),
        config.seed,
    );
    let loader = DataLoader::new(
        dataset,
        augmentation,
        sampler,
        config.batch_size_per_gpu,
        config.num_workers,
        config.seed,
    );
    let steps_per_epoch = loader.steps_per_epoch();
    if steps_per_epoch == 0 {
        return Err(Error::Config(format!(
            "dataset too small: no full batch of {} per worker",
            config.batch_size_per_gpu
        )));
    }
    let mut trainer = Trainer::new(config, steps_per_epoch, collective)?;
    trainer.run(&loader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_run() {
        let cli = Cli::parse_from(["destilar"]);
        let cfg = cli.into_config().unwrap();
        assert_eq!(cfg.arch, "vit_small");
        assert_eq!(cfg.out_dim, 1024);
        assert_eq!(cfg.epochs, 110);
        assert_eq!(cfg.global_crops_scale, (0.4, 1.0));
        assert_eq!(cfg.local_crops_scale, (0.05, 0.4));
        assert_eq!(cfg.local_crops_number, 6);
        assert!(cfg.use_fp16);
        assert!(cfg.augmix);
    }

    #[test]
    fn bool_flags_take_explicit_values() {
        let cli = Cli::parse_from(["destilar", "--use_fp16", "false", "--augmix", "false"]);
        let cfg = cli.into_config().unwrap();
        assert!(!cfg.use_fp16);
        assert!(!cfg.augmix);
    }

    #[test]
    fn scale_ranges_parse_as_pairs() {
        let cli = Cli::parse_from(["destilar", "--global_crops_scale", "0.25", "0.9"]);
        let cfg = cli.into_config().unwrap();
        assert_eq!(cfg.global_crops_scale, (0.25, 0.9));
    }
}
