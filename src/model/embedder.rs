//! Embedder capability and the pooled-linear reference network
//!
//! The training loop only needs two things from a network: a forward pass
//! producing one embedding row per input view, and a backward pass turning
//! embedding gradients into parameter gradients. Everything else about the
//! architecture is opaque to the orchestrator.

use crate::augment::View;
use crate::model::{Param, ParameterSet};
use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// The external "model" capability: batch of views in, embeddings out.
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality (rows of [`Embedder::forward`] output).
    fn out_dim(&self) -> usize;

    /// Build an initial parameter set for this architecture.
    fn init_params(&self, seed: u64) -> ParameterSet;

    /// Forward pass over a batch of same-resolution views.
    ///
    /// Returns `(batch, out_dim)`.
    fn forward(&self, params: &ParameterSet, views: &[View]) -> Array2<f32>;

    /// Backward pass: accumulate parameter gradients for the given embedding
    /// gradient. Parameters with `requires_grad = false` are left untouched.
    fn backward(&self, params: &mut ParameterSet, views: &[View], grad_out: ArrayView2<f32>);
}

/// Reference embedder: adaptive average pool to a fixed grid, a linear trunk
/// with ReLU, and a `head.last_layer` linear projection.
///
/// Pooling to a fixed grid makes the feature dimension independent of the
/// input resolution, so 224px global crops and 96px local crops run through
/// the same parameters, exactly like the multi-crop wrapper expects.
#[derive(Debug)]
pub struct PooledEmbedder {
    pool_grid: usize,
    hidden_dim: usize,
    out_dim: usize,
    norm_last_layer: bool,
}

const CHANNELS: usize = 3;

impl PooledEmbedder {
    pub fn new(pool_grid: usize, hidden_dim: usize, out_dim: usize, norm_last_layer: bool) -> Self {
        Self {
            pool_grid,
            hidden_dim,
            out_dim,
            norm_last_layer,
        }
    }

    fn feature_dim(&self) -> usize {
        CHANNELS * self.pool_grid * self.pool_grid
    }

    /// Adaptive average pool of one CHW view down to `pool_grid`², flattened.
    fn pool(&self, view: &View) -> Array1<f32> {
        let (c, h, w) = view.dim();
        debug_assert_eq!(c, CHANNELS);
        let p = self.pool_grid;
        let mut out = Array1::zeros(c * p * p);
        for ch in 0..c {
            for gy in 0..p {
                let y0 = gy * h / p;
                let y1 = ((gy + 1) * h).div_ceil(p);
                for gx in 0..p {
                    let x0 = gx * w / p;
                    let x1 = ((gx + 1) * w).div_ceil(p);
                    let mut sum = 0.0;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            sum += view[[ch, y, x]];
                        }
                    }
                    let area = ((y1 - y0) * (x1 - x0)) as f32;
                    out[ch * p * p + gy * p + gx] = sum / area;
                }
            }
        }
        out
    }

    fn trunk_forward(&self, params: &ParameterSet, x: &Array1<f32>) -> (Array1<f32>, Array1<f32>) {
        let f = self.feature_dim();
        let hdim = self.hidden_dim;
        let w1 = &params.get("backbone.weight").unwrap().data;
        let b1 = &params.get("backbone.bias").unwrap().data;
        let mut pre = Array1::zeros(hdim);
        for i in 0..hdim {
            let row = &w1.as_slice().unwrap()[i * f..(i + 1) * f];
            let mut acc = b1[i];
            for (wv, xv) in row.iter().zip(x.iter()) {
                acc += wv * xv;
            }
            pre[i] = acc;
        }
        let act = pre.mapv(|v| v.max(0.0));
        (pre, act)
    }

    fn head_forward(&self, params: &ParameterSet, act: &Array1<f32>) -> Array1<f32> {
        let hdim = self.hidden_dim;
        let k = self.out_dim;
        let w2 = &params.get("head.last_layer.weight").unwrap().data;
        let b2 = &params.get("head.last_layer.bias").unwrap().data;
        let mut out = Array1::zeros(k);
        for i in 0..k {
            let row = &w2.as_slice().unwrap()[i * hdim..(i + 1) * hdim];
            let mut acc = b2[i];
            for (wv, av) in row.iter().zip(act.iter()) {
                acc += wv * av;
            }
            out[i] = acc;
        }
        out
    }
}

impl Embedder for PooledEmbedder {
    fn out_dim(&self) -> usize {
        self.out_dim
    }

    fn init_params(&self, seed: u64) -> ParameterSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let f = self.feature_dim();
        let hdim = self.hidden_dim;
        let k = self.out_dim;

        let trunk_init = Normal::new(0.0, 1.0 / (f as f32).sqrt()).unwrap();
        let head_init = Normal::new(0.0, 1.0 / (hdim as f32).sqrt()).unwrap();

        let mut w1 = Array1::zeros(hdim * f);
        w1.mapv_inplace(|_| trunk_init.sample(&mut rng));
        let mut w2 = Array1::zeros(k * hdim);
        w2.mapv_inplace(|_| head_init.sample(&mut rng));

        if self.norm_last_layer {
            // Unit-norm rows for the output projection.
            for i in 0..k {
                let row = &mut w2.as_slice_mut().unwrap()[i * hdim..(i + 1) * hdim];
                let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
                for v in row.iter_mut() {
                    *v /= norm;
                }
            }
        }

        let mut params = ParameterSet::new();
        params.push("backbone.weight", Param::new(w1, true));
        params.push("backbone.bias", Param::new(Array1::zeros(hdim), true));
        params.push("head.last_layer.weight", Param::new(w2, true));
        params.push("head.last_layer.bias", Param::new(Array1::zeros(k), true));
        params
    }

    fn forward(&self, params: &ParameterSet, views: &[View]) -> Array2<f32> {
        let mut out = Array2::zeros((views.len(), self.out_dim));
        for (row, view) in views.iter().enumerate() {
            let x = self.pool(view);
            let (_, act) = self.trunk_forward(params, &x);
            let y = self.head_forward(params, &act);
            out.row_mut(row).assign(&y);
        }
        out
    }

    fn backward(&self, params: &mut ParameterSet, views: &[View], grad_out: ArrayView2<f32>) {
        assert_eq!(grad_out.nrows(), views.len());
        let f = self.feature_dim();
        let hdim = self.hidden_dim;
        let k = self.out_dim;

        let mut gw1 = Array1::<f32>::zeros(hdim * f);
        let mut gb1 = Array1::<f32>::zeros(hdim);
        let mut gw2 = Array1::<f32>::zeros(k * hdim);
        let mut gb2 = Array1::<f32>::zeros(k);

        let w2 = params.get("head.last_layer.weight").unwrap().data.clone();

        for (row, view) in views.iter().enumerate() {
            let x = self.pool(view);
            let (pre, act) = self.trunk_forward(params, &x);
            let dy = grad_out.row(row);

            // Head: dW2 = dy ⊗ act, db2 = dy, d_act = W2ᵀ dy.
            let mut dact = Array1::<f32>::zeros(hdim);
            for i in 0..k {
                let g = dy[i];
                gb2[i] += g;
                let wrow = &w2.as_slice().unwrap()[i * hdim..(i + 1) * hdim];
                for j in 0..hdim {
                    gw2[i * hdim + j] += g * act[j];
                    dact[j] += g * wrow[j];
                }
            }

            // ReLU gate, then trunk: dW1 = d_pre ⊗ x, db1 = d_pre.
            for i in 0..hdim {
                let dpre = if pre[i] > 0.0 { dact[i] } else { 0.0 };
                if dpre == 0.0 {
                    continue;
                }
                gb1[i] += dpre;
                for (j, xv) in x.iter().enumerate() {
                    gw1[i * f + j] += dpre * xv;
                }
            }
        }

        for (name, grad) in [
            ("backbone.weight", gw1),
            ("backbone.bias", gb1),
            ("head.last_layer.weight", gw2),
            ("head.last_layer.bias", gb2),
        ] {
            let param = params.get_mut(name).unwrap();
            if param.requires_grad {
                param.accumulate_grad(&grad);
            }
        }
    }
}

/// Architecture registry.
///
/// The original logged unknown names and then fell over later on an undefined
/// model reference; here an unknown architecture is a configuration error at
/// startup.
pub fn build_embedder(arch: &str, out_dim: usize, norm_last_layer: bool) -> Result<PooledEmbedder> {
    let hidden_dim = match arch {
        "vit_tiny" | "deit_tiny" => 64,
        "vit_small" | "deit_small" => 128,
        "vit_base" => 256,
        other => {
            return Err(Error::Config(format!(
                "unknown architecture: {other} (expected one of vit_tiny, vit_small, vit_base, deit_tiny, deit_small)"
            )))
        }
    };
    Ok(PooledEmbedder::new(4, hidden_dim, out_dim, norm_last_layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;
    use rand::Rng;

    fn random_view(h: usize, w: usize, seed: u64) -> View {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((3, h, w), |_| rng.random_range(-1.0f32..1.0))
    }

    #[test]
    fn unknown_arch_fails_fast() {
        let err = build_embedder("resnet50", 32, true).unwrap_err();
        assert!(err.to_string().contains("unknown architecture"));
    }

    #[test]
    fn forward_shape_matches_out_dim() {
        let emb = PooledEmbedder::new(2, 8, 16, false);
        let params = emb.init_params(0);
        let views = vec![random_view(12, 12, 1), random_view(12, 12, 2)];
        let out = emb.forward(&params, &views);
        assert_eq!(out.dim(), (2, 16));
    }

    #[test]
    fn different_resolutions_share_parameters() {
        let emb = PooledEmbedder::new(2, 8, 16, false);
        let params = emb.init_params(0);
        let big = emb.forward(&params, &[random_view(24, 24, 3)]);
        let small = emb.forward(&params, &[random_view(10, 10, 4)]);
        assert_eq!(big.ncols(), small.ncols());
    }

    #[test]
    fn backward_skips_frozen_params() {
        let emb = PooledEmbedder::new(2, 4, 8, false);
        let mut params = emb.init_params(0).frozen_copy();
        let views = vec![random_view(8, 8, 5)];
        let grad = Array2::ones((1, 8));
        emb.backward(&mut params, &views, grad.view());
        assert!(params.iter().all(|(_, p)| p.grad.is_none()));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let emb = PooledEmbedder::new(2, 4, 3, false);
        let mut params = emb.init_params(7);
        let views = vec![random_view(6, 6, 8)];

        // Scalar objective: sum of embeddings. Its embedding gradient is all ones.
        let grad = Array2::ones((1, 3));
        emb.backward(&mut params, &views, grad.view());

        let eps = 1e-3;
        for name in ["backbone.weight", "head.last_layer.weight", "backbone.bias"] {
            let analytic = params.get(name).unwrap().grad.as_ref().unwrap().clone();
            for idx in [0usize, 1] {
                let orig = params.get(name).unwrap().data[idx];
                params.get_mut(name).unwrap().data[idx] = orig + eps;
                let up: f32 = emb.forward(&params, &views).sum();
                params.get_mut(name).unwrap().data[idx] = orig - eps;
                let down: f32 = emb.forward(&params, &views).sum();
                params.get_mut(name).unwrap().data[idx] = orig;
                let numeric = (up - down) / (2.0 * eps);
                assert_relative_eq!(analytic[idx], numeric, epsilon = 1e-2, max_relative = 0.05);
            }
        }
    }

    #[test]
    fn norm_last_layer_unit_rows() {
        let emb = PooledEmbedder::new(2, 8, 4, true);
        let params = emb.init_params(0);
        let w2 = &params.get("head.last_layer.weight").unwrap().data;
        for i in 0..4 {
            let row = &w2.as_slice().unwrap()[i * 8..(i + 1) * 8];
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
        }
    }
}
