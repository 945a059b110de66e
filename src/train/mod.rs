//! Run orchestration
//!
//! [`Trainer`] wires the other modules together: per-step schedule lookup,
//! dual forward passes, the distillation loss with its analytic gradient,
//! cross-worker gradient averaging, clipping and optimizer update, teacher
//! EMA, and the per-epoch checkpoint + `log.txt` bookkeeping.

mod config;
mod trainer;

pub use config::TrainConfig;
pub use trainer::{StepStats, Trainer};
