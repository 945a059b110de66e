//! Cosine decay schedule with linear warmup

use std::f32::consts::PI;

/// Precomputed per-step schedule.
///
/// The table length is fixed at construction to `epochs * steps_per_epoch`;
/// lookups beyond the end are a bug in the caller and panic rather than
/// silently extrapolating.
#[derive(Debug, Clone)]
pub struct Schedule {
    values: Vec<f32>,
}

impl Schedule {
    /// Value at a global step.
    pub fn value(&self, step: usize) -> f32 {
        self.values[step]
    }

    /// Total number of steps covered by the table.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

/// Build a warmup + cosine decay schedule.
///
/// The first `warmup_epochs * steps_per_epoch` entries ramp linearly from
/// `start_warmup_value` to `base_value`; the remaining entries follow
/// `final_value + 0.5 * (base_value - final_value) * (1 + cos(pi * progress))`.
/// With `warmup_epochs == 0` the warmup segment is skipped entirely.
pub fn cosine_schedule(
    base_value: f32,
    final_value: f32,
    epochs: usize,
    steps_per_epoch: usize,
    warmup_epochs: usize,
    start_warmup_value: f32,
) -> Schedule {
    let total_steps = epochs * steps_per_epoch;
    let warmup_steps = warmup_epochs * steps_per_epoch;
    assert!(
        warmup_steps <= total_steps,
        "warmup ({warmup_epochs} epochs) exceeds total ({epochs} epochs)"
    );

    let mut values = Vec::with_capacity(total_steps);
    for step in 0..warmup_steps {
        let progress = step as f32 / warmup_steps as f32;
        values.push(start_warmup_value + (base_value - start_warmup_value) * progress);
    }

    let decay_steps = total_steps - warmup_steps;
    for step in 0..decay_steps {
        let progress = if decay_steps > 1 {
            step as f32 / (decay_steps - 1) as f32
        } else {
            1.0
        };
        let cosine = 0.5 * (1.0 + (PI * progress).cos());
        values.push(final_value + (base_value - final_value) * cosine);
    }

    Schedule { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn length_is_fixed_at_construction() {
        let s = cosine_schedule(0.5, 1e-6, 100, 13, 10, 0.0);
        assert_eq!(s.len(), 1300);
    }

    #[test]
    fn pure_cosine_endpoints_match_base_and_final() {
        let s = cosine_schedule(0.04, 0.4, 20, 50, 0, 0.0);
        assert_relative_eq!(s.value(0), 0.04, epsilon = 1e-6);
        assert_relative_eq!(s.value(s.len() - 1), 0.4, epsilon = 1e-6);
    }

    #[test]
    fn pure_cosine_monotone_decreasing_when_base_above_final() {
        let s = cosine_schedule(0.0005, 1e-6, 10, 20, 0, 0.0);
        for w in s.as_slice().windows(2) {
            assert!(w[1] <= w[0] + 1e-9, "schedule increased: {} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn momentum_style_schedule_monotone_increasing_to_one() {
        let s = cosine_schedule(0.996, 1.0, 10, 20, 0, 0.0);
        for w in s.as_slice().windows(2) {
            assert!(w[1] >= w[0] - 1e-9);
        }
        assert_relative_eq!(s.value(s.len() - 1), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn warmup_is_an_exact_linear_ramp() {
        let warmup_epochs = 2;
        let steps_per_epoch = 25;
        let s = cosine_schedule(0.1, 0.001, 10, steps_per_epoch, warmup_epochs, 0.0);
        let warmup_steps = warmup_epochs * steps_per_epoch;
        assert_relative_eq!(s.value(0), 0.0, epsilon = 1e-7);
        let slope = s.value(1) - s.value(0);
        for step in 0..warmup_steps - 1 {
            assert_relative_eq!(s.value(step + 1) - s.value(step), slope, epsilon = 1e-6);
        }
        // First post-warmup entry sits at the cosine start, i.e. the base value.
        assert_relative_eq!(s.value(warmup_steps), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn zero_warmup_skips_ramp() {
        let s = cosine_schedule(0.1, 0.001, 5, 10, 0, 0.0);
        assert_relative_eq!(s.value(0), 0.1, epsilon = 1e-6);
    }

    proptest! {
        #[test]
        fn table_always_bounded_by_base_and_final(
            base in 1e-6f32..1.0,
            final_value in 1e-6f32..1.0,
            epochs in 1usize..20,
            steps in 1usize..40,
        ) {
            let s = cosine_schedule(base, final_value, epochs, steps, 0, 0.0);
            let lo = base.min(final_value) - 1e-5;
            let hi = base.max(final_value) + 1e-5;
            for &v in s.as_slice() {
                prop_assert!(v >= lo && v <= hi, "value {v} outside [{lo}, {hi}]");
            }
        }

        #[test]
        fn length_equals_epochs_times_steps(
            epochs in 0usize..30,
            steps in 0usize..30,
            warmup in 0usize..5,
        ) {
            prop_assume!(warmup * steps <= epochs * steps);
            let s = cosine_schedule(1.0, 0.0, epochs, steps, warmup, 0.0);
            prop_assert_eq!(s.len(), epochs * steps);
        }
    }
}
