//! Optimizers for the student network

mod adamw;
mod clip;
mod lars;
mod optimizer;
mod scaler;
mod sgd;

pub use adamw::AdamW;
pub use clip::clip_grad_norm;
pub use lars::Lars;
pub use optimizer::{
    build_optimizer, build_param_groups, cancel_last_layer_gradients, Optimizer, OptimizerState,
    ParamGroup,
};
pub use scaler::{GradScaler, ScalerState};
pub use sgd::Sgd;
