//! Named parameter sets

use ndarray::Array1;
use std::collections::BTreeMap;

/// A single trainable (or frozen) tensor with an optional gradient buffer.
#[derive(Debug, Clone)]
pub struct Param {
    pub data: Array1<f32>,
    pub grad: Option<Array1<f32>>,
    pub requires_grad: bool,
}

impl Param {
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            data,
            grad: None,
            requires_grad,
        }
    }

    /// Add `delta` into the gradient buffer, allocating it on first use.
    pub fn accumulate_grad(&mut self, delta: &Array1<f32>) {
        match &mut self.grad {
            Some(g) => *g += delta,
            None => self.grad = Some(delta.clone()),
        }
    }
}

/// Ordered mapping from parameter name to tensor.
///
/// Order is the registration order of the owning network; the student and
/// teacher sets of one run always share the same names in the same order,
/// which is what makes the elementwise EMA pairing valid.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    entries: Vec<(String, Param)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, param: Param) {
        self.entries.push((name.into(), param));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Param)> {
        self.entries.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    /// Drop all gradient buffers.
    pub fn zero_grad(&mut self) {
        for (_, p) in self.entries.iter_mut() {
            p.grad = None;
        }
    }

    /// Deep copy with every parameter frozen. Used to derive the teacher.
    pub fn frozen_copy(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(n, p)| {
                (
                    n.clone(),
                    Param {
                        data: p.data.clone(),
                        grad: None,
                        requires_grad: false,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Export raw values keyed by name, for checkpoints.
    pub fn state_dict(&self) -> BTreeMap<String, Vec<f32>> {
        self.entries
            .iter()
            .map(|(n, p)| (n.clone(), p.data.to_vec()))
            .collect()
    }

    /// Load raw values by name. Names absent from `state` keep their current
    /// values; shape mismatches are rejected.
    pub fn load_state_dict(&mut self, state: &BTreeMap<String, Vec<f32>>) -> crate::Result<()> {
        for (name, param) in self.entries.iter_mut() {
            if let Some(values) = state.get(name) {
                if values.len() != param.data.len() {
                    return Err(crate::Error::Config(format!(
                        "parameter {name}: checkpoint has {} values, model expects {}",
                        values.len(),
                        param.data.len()
                    )));
                }
                param.data = Array1::from_vec(values.clone());
            }
        }
        Ok(())
    }
}
