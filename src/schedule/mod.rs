//! Per-step hyperparameter schedules
//!
//! Learning rate, weight decay and teacher momentum all follow a cosine decay
//! with optional linear warmup, precomputed once as a table with one entry per
//! global training step. The teacher temperature uses a coarser per-epoch
//! linear ramp.

mod cosine;
mod teacher_temp;

pub use cosine::{cosine_schedule, Schedule};
pub use teacher_temp::teacher_temp_schedule;
