//! Student/teacher dual-network runner

use crate::augment::View;
use crate::model::{Embedder, ParameterSet};
use ndarray::Array2;
use std::sync::Arc;

/// Owns the student and teacher parameter sets and routes forward passes.
///
/// The teacher is derived: initialized as an exact copy of the student,
/// frozen, and afterwards only ever moved by [`DualNetworkRunner::ema_update`].
pub struct DualNetworkRunner {
    embedder: Arc<dyn Embedder>,
    student: ParameterSet,
    teacher: ParameterSet,
}

impl DualNetworkRunner {
    pub fn new(embedder: Arc<dyn Embedder>, seed: u64) -> Self {
        let student = embedder.init_params(seed);
        let teacher = student.frozen_copy();
        Self {
            embedder,
            student,
            teacher,
        }
    }

    pub fn out_dim(&self) -> usize {
        self.embedder.out_dim()
    }

    pub fn student(&self) -> &ParameterSet {
        &self.student
    }

    pub fn student_mut(&mut self) -> &mut ParameterSet {
        &mut self.student
    }

    pub fn teacher(&self) -> &ParameterSet {
        &self.teacher
    }

    pub fn teacher_mut(&mut self) -> &mut ParameterSet {
        &mut self.teacher
    }

    /// Student forward over every crop. Rows are crop-major: crop 0 for all
    /// samples, then crop 1, and so on.
    pub fn forward_student(&self, views_by_crop: &[Vec<View>]) -> Array2<f32> {
        grouped_forward(self.embedder.as_ref(), &self.student, views_by_crop)
    }

    /// Teacher forward over the two global crops only. The caller passes the
    /// full crop list; anything past index 1 is ignored.
    pub fn forward_teacher(&self, views_by_crop: &[Vec<View>]) -> Array2<f32> {
        let globals = &views_by_crop[..2.min(views_by_crop.len())];
        grouped_forward(self.embedder.as_ref(), &self.teacher, globals)
    }

    /// Backpropagate embedding gradients into the student parameters.
    ///
    /// `grad_out` rows must be in the same crop-major order as the output of
    /// [`DualNetworkRunner::forward_student`].
    pub fn backward_student(&mut self, views_by_crop: &[Vec<View>], grad_out: &Array2<f32>) {
        let mut row = 0;
        for group in resolution_groups(views_by_crop) {
            let flat = flatten_group(views_by_crop, &group);
            let rows = flat.len();
            let grad = grad_out.slice(ndarray::s![row..row + rows, ..]);
            self.embedder.backward(&mut self.student, &flat, grad);
            row += rows;
        }
        assert_eq!(row, grad_out.nrows());
    }

    /// Teacher EMA step: `teacher = m * teacher + (1 - m) * student`.
    ///
    /// Pure data movement, no gradients are read or written.
    pub fn ema_update(&mut self, momentum: f32) {
        let student = &self.student;
        for ((sname, sp), (tname, tp)) in student.iter().zip(self.teacher.iter_mut()) {
            debug_assert_eq!(sname, tname);
            tp.data.zip_mut_with(&sp.data, |t, &s| {
                *t = momentum * *t + (1.0 - momentum) * s;
            });
        }
    }
}

/// Consecutive crops sharing a resolution, as index ranges into the crop list.
fn resolution_groups(views_by_crop: &[Vec<View>]) -> Vec<std::ops::Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=views_by_crop.len() {
        let boundary = i == views_by_crop.len()
            || views_by_crop[i][0].dim() != views_by_crop[start][0].dim();
        if boundary {
            groups.push(start..i);
            start = i;
        }
    }
    groups
}

fn flatten_group(views_by_crop: &[Vec<View>], group: &std::ops::Range<usize>) -> Vec<View> {
    views_by_crop[group.clone()]
        .iter()
        .flat_map(|crop| crop.iter().cloned())
        .collect()
}

/// One forward pass per resolution group, outputs re-concatenated in the
/// original crop order.
fn grouped_forward(
    embedder: &dyn Embedder,
    params: &ParameterSet,
    views_by_crop: &[Vec<View>],
) -> Array2<f32> {
    let total: usize = views_by_crop.iter().map(Vec::len).sum();
    let mut out = Array2::zeros((total, embedder.out_dim()));
    let mut row = 0;
    for group in resolution_groups(views_by_crop) {
        let flat = flatten_group(views_by_crop, &group);
        let chunk = embedder.forward(params, &flat);
        out.slice_mut(ndarray::s![row..row + chunk.nrows(), ..])
            .assign(&chunk);
        row += chunk.nrows();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PooledEmbedder;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn runner() -> DualNetworkRunner {
        DualNetworkRunner::new(Arc::new(PooledEmbedder::new(2, 4, 8, false)), 3)
    }

    fn crops(batch: usize, locals: usize) -> Vec<Vec<View>> {
        let mut out = Vec::new();
        for crop in 0..2 + locals {
            let size = if crop < 2 { 12 } else { 6 };
            out.push(
                (0..batch)
                    .map(|b| {
                        Array3::from_shape_fn((3, size, size), |(c, y, x)| {
                            (crop * 100 + b * 10 + c + y + x) as f32 / 50.0
                        })
                    })
                    .collect(),
            );
        }
        out
    }

    #[test]
    fn teacher_starts_as_exact_student_copy() {
        let r = runner();
        for ((_, s), (_, t)) in r.student().iter().zip(r.teacher().iter()) {
            assert_eq!(s.data, t.data);
            assert!(!t.requires_grad);
        }
    }

    #[test]
    fn teacher_sees_only_global_crops() {
        let r = runner();
        let batch = crops(3, 4);
        let t = r.forward_teacher(&batch);
        assert_eq!(t.nrows(), 2 * 3);
        let s = r.forward_student(&batch);
        assert_eq!(s.nrows(), 6 * 3);
    }

    #[test]
    fn grouped_forward_matches_per_crop_forward() {
        let r = runner();
        let batch = crops(2, 3);
        let grouped = r.forward_student(&batch);
        // Recompute crop by crop; row order must agree.
        let mut row = 0;
        for crop in &batch {
            let single = grouped_forward(
                &PooledEmbedder::new(2, 4, 8, false),
                r.student(),
                std::slice::from_ref(crop),
            );
            for b in 0..crop.len() {
                for k in 0..8 {
                    assert_relative_eq!(grouped[[row + b, k]], single[[b, k]], epsilon = 1e-5);
                }
            }
            row += crop.len();
        }
    }

    #[test]
    fn ema_update_is_exact() {
        let mut r = runner();
        for (_, p) in r.student_mut().iter_mut() {
            p.data.fill(2.0);
        }
        for (_, p) in r.teacher_mut().iter_mut() {
            p.data.fill(1.0);
        }
        r.ema_update(0.9);
        for (_, p) in r.teacher().iter() {
            for &v in p.data.iter() {
                assert_relative_eq!(v, 1.1, epsilon = 1e-6);
            }
            assert!(p.grad.is_none());
            assert!(!p.requires_grad);
        }
    }

    #[test]
    fn ema_at_momentum_one_freezes_teacher() {
        let mut r = runner();
        let before = r.teacher().state_dict();
        for (_, p) in r.student_mut().iter_mut() {
            p.data.fill(123.0);
        }
        r.ema_update(1.0);
        assert_eq!(r.teacher().state_dict(), before);
    }

    #[test]
    fn backward_accumulates_only_into_student() {
        let mut r = runner();
        let batch = crops(2, 1);
        let out = r.forward_student(&batch);
        let grad = Array2::ones(out.dim());
        r.backward_student(&batch, &grad);
        assert!(r.student().iter().any(|(_, p)| p.grad.is_some()));
        assert!(r.teacher().iter().all(|(_, p)| p.grad.is_none()));
    }
}
