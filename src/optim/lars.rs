//! LARS optimizer (layer-wise adaptive rate scaling)

use super::{Optimizer, OptimizerState, ParamGroup};
use crate::model::ParameterSet;
use ndarray::Array1;
use std::collections::BTreeMap;

/// LARS as used for convnet training with large batches: each weight tensor's
/// step is rescaled by `eta * ||θ|| / ||g + λθ||`. Biases and other
/// one-dimensional parameters skip both adaptation and weight decay.
pub struct Lars {
    groups: Vec<ParamGroup>,
    momentum: f32,
    eta: f32,
    velocities: BTreeMap<String, Array1<f32>>,
    t: u64,
}

impl Lars {
    pub fn new(groups: Vec<ParamGroup>, momentum: f32, eta: f32) -> Self {
        Self {
            groups,
            momentum,
            eta,
            velocities: BTreeMap::new(),
            t: 0,
        }
    }
}

impl Optimizer for Lars {
    fn step(&mut self, params: &mut ParameterSet) {
        self.t += 1;
        for group in &self.groups {
            for name in &group.names {
                let Some(param) = params.get_mut(name) else {
                    continue;
                };
                if !param.requires_grad {
                    continue;
                }
                let Some(grad) = param.grad.as_ref() else {
                    continue;
                };

                let adapt = !name.ends_with(".bias");
                let mut update = grad.clone();
                if adapt && group.weight_decay > 0.0 {
                    update.zip_mut_with(&param.data, |u, &p| *u += group.weight_decay * p);
                }

                if adapt {
                    let param_norm = l2(&param.data);
                    let update_norm = l2(&update);
                    if param_norm > 0.0 && update_norm > 0.0 {
                        let q = self.eta * param_norm / update_norm;
                        update.mapv_inplace(|u| u * q);
                    }
                }

                let vel = self
                    .velocities
                    .entry(name.clone())
                    .or_insert_with(|| Array1::zeros(update.len()));
                vel.zip_mut_with(&update, |v, &u| *v = self.momentum * *v + u);
                param.data.zip_mut_with(vel, |p, &v| *p -= group.lr * v);
            }
        }
    }

    fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn state(&self) -> OptimizerState {
        OptimizerState {
            step: self.t,
            buffers: self
                .velocities
                .iter()
                .map(|(name, v)| (format!("velocity.{name}"), v.to_vec()))
                .collect(),
        }
    }

    fn load_state(&mut self, state: &OptimizerState) {
        self.t = state.step;
        self.velocities.clear();
        for (key, values) in &state.buffers {
            if let Some(name) = key.strip_prefix("velocity.") {
                self.velocities
                    .insert(name.to_string(), Array1::from_vec(values.clone()));
            }
        }
    }
}

fn l2(a: &Array1<f32>) -> f32 {
    a.iter().map(|&v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;
    use crate::optim::build_param_groups;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn weight_step_is_norm_adapted() {
        let mut ps = ParameterSet::new();
        ps.push("backbone.weight", Param::new(arr1(&[3.0, 4.0]), true));
        let mut groups = build_param_groups(&ps);
        groups[0].lr = 1.0;
        let mut opt = Lars::new(groups, 0.0, 0.001);
        ps.get_mut("backbone.weight").unwrap().grad = Some(arr1(&[1.0, 0.0]));
        opt.step(&mut ps);
        // ||θ|| = 5, ||g|| = 1 → q = 0.005; step = lr * q * g.
        assert_relative_eq!(ps.get("backbone.weight").unwrap().data[0], 3.0 - 0.005, epsilon = 1e-6);
    }

    #[test]
    fn bias_step_skips_adaptation() {
        let mut ps = ParameterSet::new();
        ps.push("backbone.bias", Param::new(arr1(&[1.0]), true));
        let mut groups = build_param_groups(&ps);
        groups[1].lr = 0.5;
        let mut opt = Lars::new(groups, 0.0, 0.001);
        ps.get_mut("backbone.bias").unwrap().grad = Some(arr1(&[1.0]));
        opt.step(&mut ps);
        assert_relative_eq!(ps.get("backbone.bias").unwrap().data[0], 0.5, epsilon = 1e-6);
    }
}
