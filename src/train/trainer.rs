//! The step and epoch loops

use crate::checkpoint::{save_snapshot, validate_resume_epoch, Checkpoint};
use crate::data::{Batch, DataLoader};
use crate::dist::Collective;
use crate::loss::DistillLoss;
use crate::metrics::MetricLogger;
use crate::model::{build_embedder, DualNetworkRunner, ParameterSet};
use crate::optim::{
    build_optimizer, build_param_groups, cancel_last_layer_gradients, clip_grad_norm, GradScaler,
    Optimizer,
};
use crate::schedule::{cosine_schedule, Schedule};
use crate::train::TrainConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

const PRINT_FREQ: usize = 10;
const METRIC_WINDOW: usize = 20;

/// Scalars produced by one optimization step.
#[derive(Debug)]
pub struct StepStats {
    pub loss: f32,
    pub lr: f32,
    pub weight_decay: f32,
}

/// Drives the whole run: schedules, forward/backward, gradient
/// synchronization, optimizer and EMA updates, checkpoints and the epoch log.
pub struct Trainer {
    config: TrainConfig,
    runner: DualNetworkRunner,
    loss: DistillLoss,
    optimizer: Box<dyn Optimizer>,
    scaler: Option<GradScaler>,
    lr_schedule: Schedule,
    wd_schedule: Schedule,
    momentum_schedule: Schedule,
    steps_per_epoch: usize,
    collective: Arc<dyn Collective>,
}

impl Trainer {
    pub fn new(
        config: TrainConfig,
        steps_per_epoch: usize,
        collective: Arc<dyn Collective>,
    ) -> Result<Self> {
        let embedder = build_embedder(&config.arch, config.out_dim, config.norm_last_layer)?;
        let runner = DualNetworkRunner::new(Arc::new(embedder), config.seed);
        let loss = DistillLoss::new(
            config.out_dim,
            config.ncrops(),
            config.warmup_teacher_temp,
            config.teacher_temp,
            config.warmup_teacher_temp_epochs,
            config.epochs,
            Arc::clone(&collective),
        )?;
        let optimizer = build_optimizer(&config.optimizer, build_param_groups(runner.student()))?;
        let lr_schedule = cosine_schedule(
            config.scaled_lr(collective.world_size()),
            config.min_lr,
            config.epochs,
            steps_per_epoch,
            config.warmup_epochs,
            0.0,
        );
        let wd_schedule = cosine_schedule(
            config.weight_decay,
            config.weight_decay_end,
            config.epochs,
            steps_per_epoch,
            0,
            0.0,
        );
        let momentum_schedule = cosine_schedule(
            config.momentum_teacher,
            1.0,
            config.epochs,
            steps_per_epoch,
            0,
            0.0,
        );
        let scaler = config.use_fp16.then(GradScaler::default);
        Ok(Self {
            config,
            runner,
            loss,
            optimizer,
            scaler,
            lr_schedule,
            wd_schedule,
            momentum_schedule,
            steps_per_epoch,
            collective,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn runner(&self) -> &DualNetworkRunner {
        &self.runner
    }

    /// One optimization step at global step `epoch * steps_per_epoch + step`.
    pub fn train_step(&mut self, batch: &Batch, epoch: usize, step: usize) -> Result<StepStats> {
        let global_step = epoch * self.steps_per_epoch + step;
        let lr = self.lr_schedule.value(global_step);
        let wd = self.wd_schedule.value(global_step);
        for (i, group) in self.optimizer.groups_mut().iter_mut().enumerate() {
            group.lr = lr;
            // Only the weight group is ever regularized.
            group.weight_decay = if i == 0 { wd } else { 0.0 };
        }

        self.runner.student_mut().zero_grad();

        let teacher_out = self.runner.forward_teacher(&batch.views_by_crop);
        let student_out = self.runner.forward_student(&batch.views_by_crop);
        let out = self.loss.compute(student_out.view(), teacher_out.view(), epoch)?;

        if !out.loss.is_finite() {
            return Err(Error::NonFiniteLoss {
                value: out.loss,
                step: global_step,
            });
        }

        let mut grad = out.student_grad;
        if let Some(scaler) = &self.scaler {
            grad.mapv_inplace(|g| g * scaler.scale());
        }
        self.runner.backward_student(&batch.views_by_crop, &grad);

        sync_gradients(self.runner.student_mut(), self.collective.as_ref());

        let overflow = match &self.scaler {
            Some(scaler) => scaler.unscale(self.runner.student_mut()),
            None => false,
        };
        if !overflow {
            if self.config.clip_grad > 0.0 {
                clip_grad_norm(self.runner.student_mut(), self.config.clip_grad);
            }
            cancel_last_layer_gradients(
                self.runner.student_mut(),
                epoch,
                self.config.freeze_last_layer,
            );
            self.optimizer.step(self.runner.student_mut());
        }
        if let Some(scaler) = &mut self.scaler {
            scaler.update(overflow);
        }

        // EMA runs every step, even when an overflow skipped the update.
        let momentum = self.momentum_schedule.value(global_step);
        self.runner.ema_update(momentum);

        Ok(StepStats {
            loss: out.loss,
            lr,
            weight_decay: wd,
        })
    }

    /// Run every batch of one epoch, returning the synchronized meters.
    pub fn train_one_epoch(&mut self, loader: &DataLoader, epoch: usize) -> Result<MetricLogger> {
        let mut metrics = MetricLogger::new(METRIC_WINDOW);
        let header = format!("Epoch: [{}/{}]", epoch, self.config.epochs);
        for (step, batch) in loader.epoch(epoch).enumerate() {
            let stats = self.train_step(&batch?, epoch, step)?;
            metrics.update("loss", f64::from(stats.loss));
            metrics.update("lr", f64::from(stats.lr));
            metrics.update("wd", f64::from(stats.weight_decay));
            if self.collective.is_main() {
                metrics.log_step(&header, step, self.steps_per_epoch, PRINT_FREQ);
            }
        }
        metrics.synchronize(self.collective.as_ref());
        Ok(metrics)
    }

    /// Restore from `output_dir/checkpoint.pth` if present. Returns the epoch
    /// to start (or continue) from.
    pub fn resume(&mut self) -> Result<usize> {
        let path = self.config.output_dir.join("checkpoint.pth");
        let Some(ckpt) = Checkpoint::load_if_present(&path)? else {
            return Ok(0);
        };
        validate_resume_epoch(ckpt.epoch, self.config.epochs)?;
        if let Some(state) = &ckpt.student {
            self.runner.student_mut().load_state_dict(state)?;
        }
        if let Some(state) = &ckpt.teacher {
            self.runner.teacher_mut().load_state_dict(state)?;
        }
        if let Some(state) = &ckpt.optimizer {
            self.optimizer.load_state(state);
        }
        if let Some(state) = &ckpt.distill_loss {
            self.loss.load_state(state)?;
        }
        if let (Some(scaler), Some(state)) = (self.scaler.as_mut(), ckpt.fp16_scaler.as_ref()) {
            scaler.load_state(state);
        }
        println!("Resumed from {} at epoch {}", path.display(), ckpt.epoch);
        Ok(ckpt.epoch + 1)
    }

    fn snapshot(&self, epoch: usize) -> Result<()> {
        let ckpt = Checkpoint {
            epoch,
            student: Some(self.runner.student().state_dict()),
            teacher: Some(self.runner.teacher().state_dict()),
            optimizer: Some(self.optimizer.state()),
            distill_loss: Some(self.loss.state()),
            fp16_scaler: self.scaler.as_ref().map(GradScaler::state),
            config: Some(serde_json::to_value(&self.config)?),
        };
        save_snapshot(
            &self.config.output_dir,
            &ckpt,
            self.config.saveckp_freq,
            self.config.epochs,
        )
    }

    fn append_log_line(&self, epoch: usize, metrics: &MetricLogger) -> Result<()> {
        let mut record = serde_json::Map::new();
        for (name, avg) in metrics.global_averages() {
            record.insert(format!("train_{name}"), serde_json::json!(avg));
        }
        record.insert("epoch".to_string(), serde_json::json!(epoch));
        let line = serde_json::to_string(&serde_json::Value::Object(record))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.output_dir.join("log.txt"))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The full run: resume, epoch loop, per-epoch snapshot and log line.
    pub fn run(&mut self, loader: &DataLoader) -> Result<()> {
        if self.collective.is_main() {
            std::fs::create_dir_all(&self.config.output_dir)?;
        }
        let start_epoch = self.resume()?;
        if self.collective.is_main() {
            println!(
                "[{}] training {} for {} epochs, {} steps/epoch",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                self.config.arch,
                self.config.epochs,
                self.steps_per_epoch
            );
        }
        for epoch in start_epoch..self.config.epochs {
            let metrics = self.train_one_epoch(loader, epoch)?;
            if self.collective.is_main() {
                self.snapshot(epoch)?;
                self.append_log_line(epoch, &metrics)?;
            }
        }
        Ok(())
    }
}

/// Average gradients across workers: one all-reduce over a flat buffer, then
/// divide by the world size.
fn sync_gradients(params: &mut ParameterSet, collective: &dyn Collective) {
    if collective.world_size() == 1 {
        return;
    }
    let mut flat = Vec::new();
    for (_, param) in params.iter_mut() {
        if let Some(grad) = &param.grad {
            flat.extend(grad.iter().copied());
        }
    }
    collective.all_reduce_sum(&mut flat);
    let inv_world = 1.0 / collective.world_size() as f32;
    let mut offset = 0;
    for (_, param) in params.iter_mut() {
        if let Some(grad) = param.grad.as_mut() {
            for g in grad.iter_mut() {
                *g = flat[offset] * inv_world;
                offset += 1;
            }
        }
    }
}
