//! Checkpoint save and restart

use crate::loss::DistillLossState;
use crate::optim::{OptimizerState, ScalerState};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Everything needed to resume a run. Every field except `epoch` is optional
/// on load, so checkpoints written by an older build, or by a run without
/// loss scaling, still restore whatever they carry.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    #[serde(default)]
    pub student: Option<BTreeMap<String, Vec<f32>>>,
    #[serde(default)]
    pub teacher: Option<BTreeMap<String, Vec<f32>>>,
    #[serde(default)]
    pub optimizer: Option<OptimizerState>,
    #[serde(default)]
    pub distill_loss: Option<DistillLossState>,
    #[serde(default)]
    pub fp16_scaler: Option<ScalerState>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl Checkpoint {
    /// Serialize atomically: write a sibling temp file, then rename over the
    /// target so a crash mid-write never corrupts the resumable checkpoint.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let ckpt = serde_json::from_str(&json)?;
        Ok(ckpt)
    }

    /// Load `path` if it exists; a missing file means a fresh start.
    pub fn load_if_present(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

/// Rolling + periodic snapshot policy: `checkpoint.pth` is overwritten every
/// epoch, and every `save_freq` epochs (and on the final epoch) a permanent
/// `checkpoint{epoch:04}.pth` copy is kept alongside it.
pub fn save_snapshot(
    output_dir: &Path,
    checkpoint: &Checkpoint,
    save_freq: usize,
    total_epochs: usize,
) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    let rolling = output_dir.join("checkpoint.pth");
    checkpoint.save(&rolling)?;
    let epoch = checkpoint.epoch;
    let is_last = epoch + 1 == total_epochs;
    if is_last || (save_freq > 0 && epoch % save_freq == 0) {
        checkpoint.save(&output_dir.join(format!("checkpoint{epoch:04}.pth")))?;
    }
    Ok(())
}

/// Sanity-check a restored epoch against the configured horizon.
pub fn validate_resume_epoch(epoch: usize, total_epochs: usize) -> Result<()> {
    if epoch >= total_epochs {
        return Err(Error::Config(format!(
            "checkpoint is at epoch {epoch} but the run only has {total_epochs} epochs"
        )));
    }
    Ok(())
}
