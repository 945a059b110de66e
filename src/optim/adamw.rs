//! AdamW optimizer (Adam with decoupled weight decay)

use super::{Optimizer, OptimizerState, ParamGroup};
use crate::model::ParameterSet;
use ndarray::Array1;
use std::collections::BTreeMap;

/// AdamW: weight decay is applied directly to the parameters instead of being
/// folded into the gradient.
///
/// `θ_t = (1 - lr*λ) * θ_{t-1} - lr * m̂_t / (√v̂_t + ε)`
pub struct AdamW {
    groups: Vec<ParamGroup>,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: BTreeMap<String, Array1<f32>>,
    v: BTreeMap<String, Array1<f32>>,
}

impl AdamW {
    pub fn new(groups: Vec<ParamGroup>) -> Self {
        Self {
            groups,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: BTreeMap::new(),
            v: BTreeMap::new(),
        }
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut ParameterSet) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

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

                let m = self
                    .m
                    .entry(name.clone())
                    .or_insert_with(|| Array1::zeros(grad.len()));
                let v = self
                    .v
                    .entry(name.clone())
                    .or_insert_with(|| Array1::zeros(grad.len()));

                m.zip_mut_with(grad, |mv, &g| *mv = self.beta1 * *mv + (1.0 - self.beta1) * g);
                v.zip_mut_with(grad, |vv, &g| {
                    *vv = self.beta2 * *vv + (1.0 - self.beta2) * g * g
                });

                // Decoupled decay, then the bias-corrected Adam step.
                if group.weight_decay > 0.0 {
                    param.data.mapv_inplace(|p| p * (1.0 - group.lr * group.weight_decay));
                }
                for ((p, &mv), &vv) in param.data.iter_mut().zip(m.iter()).zip(v.iter()) {
                    let m_hat = mv / bias1;
                    let v_hat = vv / bias2;
                    *p -= group.lr * m_hat / (v_hat.sqrt() + self.epsilon);
                }
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
        let mut buffers = BTreeMap::new();
        for (name, m) in &self.m {
            buffers.insert(format!("m.{name}"), m.to_vec());
        }
        for (name, v) in &self.v {
            buffers.insert(format!("v.{name}"), v.to_vec());
        }
        OptimizerState {
            step: self.t,
            buffers,
        }
    }

    fn load_state(&mut self, state: &OptimizerState) {
        self.t = state.step;
        self.m.clear();
        self.v.clear();
        for (key, values) in &state.buffers {
            if let Some(name) = key.strip_prefix("m.") {
                self.m.insert(name.to_string(), Array1::from_vec(values.clone()));
            } else if let Some(name) = key.strip_prefix("v.") {
                self.v.insert(name.to_string(), Array1::from_vec(values.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;
    use crate::optim::build_param_groups;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn setup() -> (AdamW, ParameterSet) {
        let mut ps = ParameterSet::new();
        ps.push("backbone.weight", Param::new(arr1(&[1.0, -1.0]), true));
        ps.push("backbone.bias", Param::new(arr1(&[0.5]), true));
        let mut groups = build_param_groups(&ps);
        for g in groups.iter_mut() {
            g.lr = 0.1;
        }
        (AdamW::new(groups), ps)
    }

    #[test]
    fn first_step_moves_against_gradient_sign() {
        let (mut opt, mut ps) = setup();
        ps.get_mut("backbone.weight").unwrap().grad = Some(arr1(&[1.0, -2.0]));
        opt.step(&mut ps);
        let w = &ps.get("backbone.weight").unwrap().data;
        assert!(w[0] < 1.0);
        assert!(w[1] > -1.0);
        // Bias-corrected first step has magnitude ≈ lr regardless of gradient scale.
        assert_relative_eq!(w[0], 1.0 - 0.1, epsilon = 1e-4);
    }

    #[test]
    fn params_without_grad_stay_put() {
        let (mut opt, mut ps) = setup();
        opt.step(&mut ps);
        assert_eq!(ps.get("backbone.weight").unwrap().data, arr1(&[1.0, -1.0]));
    }

    #[test]
    fn weight_decay_shrinks_group_zero_only() {
        let (mut opt, mut ps) = setup();
        opt.groups_mut()[0].weight_decay = 0.5;
        ps.get_mut("backbone.weight").unwrap().grad = Some(arr1(&[0.0, 0.0]));
        ps.get_mut("backbone.bias").unwrap().grad = Some(arr1(&[0.0]));
        opt.step(&mut ps);
        // Zero grad: only the decoupled decay moves the weight.
        assert_relative_eq!(
            ps.get("backbone.weight").unwrap().data[0],
            1.0 * (1.0 - 0.1 * 0.5),
            epsilon = 1e-5
        );
        assert_relative_eq!(ps.get("backbone.bias").unwrap().data[0], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn state_round_trip() {
        let (mut opt, mut ps) = setup();
        ps.get_mut("backbone.weight").unwrap().grad = Some(arr1(&[1.0, 1.0]));
        opt.step(&mut ps);
        let state = opt.state();
        assert_eq!(state.step, 1);

        let (mut fresh, _) = setup();
        fresh.load_state(&state);
        assert_eq!(fresh.state().buffers, state.buffers);
    }
}
