//! Optimizer trait, parameter groups and gradient policies

use crate::model::ParameterSet;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A slice of the parameter set sharing one learning rate and weight decay.
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub names: Vec<String>,
    pub lr: f32,
    pub weight_decay: f32,
}

/// Serializable optimizer internals (step counter and moment buffers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: u64,
    pub buffers: BTreeMap<String, Vec<f32>>,
}

/// Trait for gradient-descent style optimizers over a named parameter set.
///
/// Learning rate and weight decay live on the groups and are overwritten by
/// the schedule every step, so optimizers read them fresh on each `step`.
pub trait Optimizer: Send {
    fn step(&mut self, params: &mut ParameterSet);

    fn groups(&self) -> &[ParamGroup];

    fn groups_mut(&mut self) -> &mut [ParamGroup];

    fn state(&self) -> OptimizerState;

    fn load_state(&mut self, state: &OptimizerState);
}

/// Split parameters into the conventional two groups: group 0 holds the
/// weights and is the only group ever given weight decay, group 1 holds the
/// biases and stays unregularized.
pub fn build_param_groups(params: &ParameterSet) -> Vec<ParamGroup> {
    let mut regularized = Vec::new();
    let mut not_regularized = Vec::new();
    for name in params.names() {
        if name.ends_with(".bias") {
            not_regularized.push(name.to_string());
        } else {
            regularized.push(name.to_string());
        }
    }
    vec![
        ParamGroup {
            names: regularized,
            lr: 0.0,
            weight_decay: 0.0,
        },
        ParamGroup {
            names: not_regularized,
            lr: 0.0,
            weight_decay: 0.0,
        },
    ]
}

/// Build the optimizer selected on the command line.
pub fn build_optimizer(name: &str, groups: Vec<ParamGroup>) -> Result<Box<dyn Optimizer>> {
    match name {
        "adamw" => Ok(Box::new(super::AdamW::new(groups))),
        "sgd" => Ok(Box::new(super::Sgd::new(groups, 0.9))),
        "lars" => Ok(Box::new(super::Lars::new(groups, 0.9, 0.001))),
        other => Err(Error::Config(format!(
            "unknown optimizer: {other} (expected adamw, sgd or lars)"
        ))),
    }
}

/// Keep the output projection fixed during the first `freeze_epochs` epochs
/// by nulling its gradients right before the optimizer step.
pub fn cancel_last_layer_gradients(params: &mut ParameterSet, epoch: usize, freeze_epochs: usize) {
    if epoch >= freeze_epochs {
        return;
    }
    for (name, param) in params.iter_mut() {
        if name.contains("last_layer") {
            param.grad = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;
    use ndarray::arr1;

    fn params() -> ParameterSet {
        let mut ps = ParameterSet::new();
        ps.push("backbone.weight", Param::new(arr1(&[1.0, 2.0]), true));
        ps.push("backbone.bias", Param::new(arr1(&[0.0]), true));
        ps.push("head.last_layer.weight", Param::new(arr1(&[1.0]), true));
        ps.push("head.last_layer.bias", Param::new(arr1(&[0.0]), true));
        ps
    }

    #[test]
    fn biases_fall_into_the_unregularized_group() {
        let groups = build_param_groups(&params());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].names, vec!["backbone.weight", "head.last_layer.weight"]);
        assert_eq!(groups[1].names, vec!["backbone.bias", "head.last_layer.bias"]);
    }

    #[test]
    fn freeze_window_nulls_last_layer_grads_only() {
        let mut ps = params();
        for (_, p) in ps.iter_mut() {
            p.grad = Some(arr1(&vec![1.0; p.data.len()]));
        }
        cancel_last_layer_gradients(&mut ps, 0, 1);
        assert!(ps.get("head.last_layer.weight").unwrap().grad.is_none());
        assert!(ps.get("head.last_layer.bias").unwrap().grad.is_none());
        assert!(ps.get("backbone.weight").unwrap().grad.is_some());
    }

    #[test]
    fn freeze_window_expires() {
        let mut ps = params();
        for (_, p) in ps.iter_mut() {
            p.grad = Some(arr1(&vec![1.0; p.data.len()]));
        }
        cancel_last_layer_gradients(&mut ps, 1, 1);
        assert!(ps.get("head.last_layer.weight").unwrap().grad.is_some());
    }

    #[test]
    fn unknown_optimizer_rejected() {
        assert!(build_optimizer("adagrad", build_param_groups(&params())).is_err());
    }
}
