//! destilar: self-distillation training with multi-crop views
//!
//! A student network learns to match a slowly-moving teacher copy of itself
//! across augmented crops of the same image. No labels are involved; the
//! teacher's output distribution, centered and sharpened to avoid collapse,
//! is the target.
//!
//! The crate is organized around the run pipeline:
//! - [`augment`] turns one image into 2 global + K local normalized views
//! - [`model`] holds the parameter sets, the [`model::Embedder`] capability
//!   and the student/teacher runner with its EMA update
//! - [`loss`] is the centering/sharpening objective with its analytic
//!   gradient with respect to the raw student embeddings
//! - [`schedule`] precomputes the per-step learning-rate, weight-decay and
//!   momentum tables
//! - [`optim`] has the optimizers, parameter groups, clipping and the loss
//!   scaler
//! - [`data`] loads and shards the image folder deterministically per epoch
//! - [`dist`] abstracts the all-reduce so one process or many workers run
//!   identical arithmetic
//! - [`train`] wires everything into the step/epoch loops with checkpoints
//!   and the `log.txt` epoch log

pub mod augment;
pub mod checkpoint;
pub mod cli;
pub mod data;
pub mod dist;
mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod schedule;
pub mod train;

pub use error::{Error, Result};
