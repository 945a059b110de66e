//! Stochastic gradient descent with momentum

use super::{Optimizer, OptimizerState, ParamGroup};
use crate::model::ParameterSet;
use ndarray::Array1;
use std::collections::BTreeMap;

/// SGD with classical momentum; weight decay is added to the gradient.
pub struct Sgd {
    groups: Vec<ParamGroup>,
    momentum: f32,
    velocities: BTreeMap<String, Array1<f32>>,
    t: u64,
}

impl Sgd {
    pub fn new(groups: Vec<ParamGroup>, momentum: f32) -> Self {
        Self {
            groups,
            momentum,
            velocities: BTreeMap::new(),
            t: 0,
        }
    }
}

impl Optimizer for Sgd {
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

                let mut update = grad.clone();
                if group.weight_decay > 0.0 {
                    update.zip_mut_with(&param.data, |u, &p| *u += group.weight_decay * p);
                }

                if self.momentum > 0.0 {
                    let vel = self
                        .velocities
                        .entry(name.clone())
                        .or_insert_with(|| Array1::zeros(update.len()));
                    vel.zip_mut_with(&update, |v, &u| *v = self.momentum * *v + u);
                    update.assign(vel);
                }

                param.data.zip_mut_with(&update, |p, &u| *p -= group.lr * u);
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
