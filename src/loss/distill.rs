//! Centering/sharpening loss engine

use crate::dist::Collective;
use crate::schedule::teacher_temp_schedule;
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of one loss evaluation.
pub struct DistillOutput {
    /// Scalar loss, averaged over all accumulated view pairs.
    pub loss: f32,
    /// Gradient of the loss with respect to the raw student embeddings,
    /// crop-major rows matching the student forward output.
    pub student_grad: Array2<f32>,
    /// Number of (teacher view, student view) pairs accumulated.
    pub pair_terms: usize,
}

/// Persisted engine state; the temperature tables are rebuilt from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillLossState {
    pub center: Vec<f32>,
}

/// The multi-crop self-distillation objective.
///
/// Centering subtracts a running mean from teacher outputs so no dimension
/// can dominate; sharpening divides by a small temperature so the teacher
/// distribution stays peaked. Both are needed to keep the two networks from
/// collapsing onto a constant or uniform solution. The center is a per-run
/// singleton: one vector, updated once per step, part of the checkpoint.
pub struct DistillLoss {
    out_dim: usize,
    ncrops: usize,
    student_temp: f32,
    center_momentum: f32,
    center: Array1<f32>,
    teacher_temp: Vec<f32>,
    collective: Arc<dyn Collective>,
}

impl DistillLoss {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        out_dim: usize,
        ncrops: usize,
        warmup_teacher_temp: f32,
        teacher_temp: f32,
        warmup_teacher_temp_epochs: usize,
        epochs: usize,
        collective: Arc<dyn Collective>,
    ) -> Result<Self> {
        if ncrops < 2 {
            return Err(Error::Config(format!(
                "need at least 2 views for a teacher/student pair, got {ncrops}"
            )));
        }
        Ok(Self {
            out_dim,
            ncrops,
            student_temp: 0.1,
            center_momentum: 0.9,
            center: Array1::zeros(out_dim),
            teacher_temp: teacher_temp_schedule(
                warmup_teacher_temp,
                teacher_temp,
                warmup_teacher_temp_epochs,
                epochs,
            ),
            collective,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_center_momentum(mut self, momentum: f32) -> Self {
        self.center_momentum = momentum;
        self
    }

    pub fn center(&self) -> ArrayView1<'_, f32> {
        self.center.view()
    }

    /// Compute the loss and its gradient with respect to the student
    /// embeddings, then update the center from the teacher embeddings.
    ///
    /// `student_out` has `ncrops * batch` rows, `teacher_out` has `2 * batch`
    /// rows, both crop-major.
    pub fn compute(
        &mut self,
        student_out: ArrayView2<f32>,
        teacher_out: ArrayView2<f32>,
        epoch: usize,
    ) -> Result<DistillOutput> {
        let batch = teacher_out.nrows() / 2;
        if batch == 0 || teacher_out.nrows() != 2 * batch {
            return Err(Error::Config(format!(
                "teacher output must hold 2 equal view chunks, got {} rows",
                teacher_out.nrows()
            )));
        }
        if student_out.nrows() != self.ncrops * batch {
            return Err(Error::Config(format!(
                "student output has {} rows, expected ncrops * batch = {}",
                student_out.nrows(),
                self.ncrops * batch
            )));
        }

        let temp = self.teacher_temp[epoch];

        // Teacher probabilities are constants: no gradient flows through them.
        let mut teacher_prob = Array2::zeros(teacher_out.raw_dim());
        for (mut prow, trow) in teacher_prob
            .rows_mut()
            .into_iter()
            .zip(teacher_out.rows())
        {
            let centered: Vec<f32> = trow
                .iter()
                .zip(self.center.iter())
                .map(|(t, c)| (t - c) / temp)
                .collect();
            softmax_into(&centered, prow.as_slice_mut().unwrap());
        }

        // Student views: scaled logits plus their softmax/log-softmax, per crop.
        let inv_temp = 1.0 / self.student_temp;
        let mut total_loss = 0.0;
        let mut pair_terms = 0;
        let mut grad = Array2::<f32>::zeros(student_out.raw_dim());

        for v in 0..self.ncrops {
            let v_rows = v * batch..(v + 1) * batch;
            for b in 0..batch {
                let srow: Vec<f32> = student_out
                    .row(v * batch + b)
                    .iter()
                    .map(|s| s * inv_temp)
                    .collect();
                let mut sprob = vec![0.0; self.out_dim];
                softmax_into(&srow, &mut sprob);
                let log_prob: Vec<f32> = log_softmax(&srow);

                for iq in 0..2 {
                    if v == iq {
                        // A view is never matched against its own teacher
                        // distribution.
                        continue;
                    }
                    let q = teacher_prob.row(iq * batch + b);
                    let ce: f32 = q
                        .iter()
                        .zip(log_prob.iter())
                        .map(|(&qk, &lk)| -qk * lk)
                        .sum();
                    total_loss += ce / batch as f32;

                    // d(ce)/d(raw student row) = (softmax - q) / student_temp,
                    // mean over the batch folded in here.
                    let scale = inv_temp / batch as f32;
                    let mut grow = grad.row_mut(v_rows.start + b);
                    for k in 0..self.out_dim {
                        grow[k] += (sprob[k] - q[k]) * scale;
                    }
                    if b == 0 {
                        pair_terms += 1;
                    }
                }
            }
        }

        if pair_terms == 0 {
            return Err(Error::Config(
                "no valid teacher/student view pair to accumulate".to_string(),
            ));
        }

        total_loss /= pair_terms as f32;
        grad.mapv_inplace(|g| g / pair_terms as f32);

        self.update_center(teacher_out);

        Ok(DistillOutput {
            loss: total_loss,
            student_grad: grad,
            pair_terms,
        })
    }

    /// EMA the center toward the all-worker batch mean of teacher embeddings.
    fn update_center(&mut self, teacher_out: ArrayView2<f32>) {
        let mut batch_center: Vec<f32> = vec![0.0; self.out_dim];
        for row in teacher_out.rows() {
            for (acc, &v) in batch_center.iter_mut().zip(row.iter()) {
                *acc += v;
            }
        }
        self.collective.all_reduce_sum(&mut batch_center);
        let total_rows = (teacher_out.nrows() * self.collective.world_size()) as f32;

        let cm = self.center_momentum;
        for (c, &bc) in self.center.iter_mut().zip(batch_center.iter()) {
            *c = *c * cm + (bc / total_rows) * (1.0 - cm);
        }
    }

    pub fn state(&self) -> DistillLossState {
        DistillLossState {
            center: self.center.to_vec(),
        }
    }

    pub fn load_state(&mut self, state: &DistillLossState) -> Result<()> {
        if state.center.len() != self.out_dim {
            return Err(Error::Config(format!(
                "checkpoint center has {} dims, loss engine expects {}",
                state.center.len(),
                self.out_dim
            )));
        }
        self.center = Array1::from_vec(state.center.clone());
        Ok(())
    }
}

/// Numerically stable softmax (max subtraction).
fn softmax_into(logits: &[f32], out: &mut [f32]) {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let mut sum = 0.0;
    for (o, &l) in out.iter_mut().zip(logits.iter()) {
        let e = (l - max).exp();
        *o = e;
        sum += e;
    }
    for o in out.iter_mut() {
        *o /= sum;
    }
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum: f32 = logits.iter().map(|&l| (l - max).exp()).sum::<f32>().ln();
    logits.iter().map(|&l| l - max - log_sum).collect()
}
