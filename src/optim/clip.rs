//! Gradient clipping

use crate::model::ParameterSet;

/// Clip gradients by global norm.
///
/// Computes `sqrt(Σ ||g_i||²)` over every gradient in the set and scales all
/// of them by `max_norm / norm` when the norm exceeds `max_norm`, preserving
/// relative magnitudes across parameters.
///
/// Returns the global norm before clipping.
pub fn clip_grad_norm(params: &mut ParameterSet, max_norm: f32) -> f32 {
    let mut total_norm_sq = 0.0;
    for (_, param) in params.iter() {
        if let Some(grad) = param.grad.as_ref() {
            total_norm_sq += grad.iter().map(|&g| g * g).sum::<f32>();
        }
    }
    let global_norm = total_norm_sq.sqrt();

    if global_norm > max_norm {
        let clip_coef = max_norm / global_norm;
        for (_, param) in params.iter_mut() {
            if let Some(grad) = param.grad.as_mut() {
                grad.mapv_inplace(|g| g * clip_coef);
            }
        }
    }

    global_norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn params_with_grads() -> ParameterSet {
        let mut ps = ParameterSet::new();
        let mut a = Param::new(arr1(&[0.0, 0.0, 0.0]), true);
        a.grad = Some(arr1(&[3.0, 0.0, 0.0]));
        let mut b = Param::new(arr1(&[0.0]), true);
        b.grad = Some(arr1(&[4.0]));
        ps.push("a", a);
        ps.push("b", b);
        ps
    }

    #[test]
    fn returns_global_norm() {
        let mut ps = params_with_grads();
        let norm = clip_grad_norm(&mut ps, 100.0);
        assert_relative_eq!(norm, 5.0, epsilon = 1e-6);
        // Below the threshold: untouched.
        assert_eq!(ps.get("a").unwrap().grad.as_ref().unwrap()[0], 3.0);
    }

    #[test]
    fn scales_down_when_over_threshold() {
        let mut ps = params_with_grads();
        clip_grad_norm(&mut ps, 1.0);
        let a = ps.get("a").unwrap().grad.as_ref().unwrap()[0];
        let b = ps.get("b").unwrap().grad.as_ref().unwrap()[0];
        // Direction preserved, total norm scaled to 1.
        assert_relative_eq!(a, 0.6, epsilon = 1e-6);
        assert_relative_eq!(b, 0.8, epsilon = 1e-6);
    }
}
