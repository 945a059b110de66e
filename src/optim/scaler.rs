//! Loss scaling for mixed-precision control flow

use crate::model::ParameterSet;
use serde::{Deserialize, Serialize};

/// Persisted scaler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerState {
    pub scale: f32,
    pub growth_tracker: u32,
}

/// Dynamic loss scaler.
///
/// The loss gradient seed is multiplied by `scale` before backpropagation;
/// `unscale` divides parameter gradients back down and reports whether any of
/// them went non-finite. A non-finite step is skipped and the scale backed
/// off; after `growth_interval` consecutive clean steps the scale grows.
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: u32,
    growth_tracker: u32,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self {
            scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
        }
    }
}

impl GradScaler {
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Divide every gradient by the current scale. Returns true when any
    /// gradient contains a non-finite value (the step must then be skipped).
    pub fn unscale(&self, params: &mut ParameterSet) -> bool {
        let inv = 1.0 / self.scale;
        let mut found_non_finite = false;
        for (_, param) in params.iter_mut() {
            if let Some(grad) = param.grad.as_mut() {
                grad.mapv_inplace(|g| g * inv);
                if grad.iter().any(|g| !g.is_finite()) {
                    found_non_finite = true;
                }
            }
        }
        found_non_finite
    }

    /// Adjust the scale after a step: back off on overflow, grow after a
    /// clean streak.
    pub fn update(&mut self, found_non_finite: bool) {
        if found_non_finite {
            self.scale = (self.scale * self.backoff_factor).max(1.0);
            self.growth_tracker = 0;
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
            }
        }
    }

    pub fn state(&self) -> ScalerState {
        ScalerState {
            scale: self.scale,
            growth_tracker: self.growth_tracker,
        }
    }

    pub fn load_state(&mut self, state: &ScalerState) {
        self.scale = state.scale;
        self.growth_tracker = state.growth_tracker;
    }
}
