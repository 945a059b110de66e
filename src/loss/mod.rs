//! Distillation objective
//!
//! Cross-entropy between sharpened, centered teacher distributions and
//! student outputs across every non-matching view pair.

mod distill;

pub use distill::{DistillLoss, DistillLossState, DistillOutput};
