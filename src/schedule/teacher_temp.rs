//! Teacher temperature ramp
//!
//! A too-sharp teacher destabilizes early training, so the temperature warms
//! up linearly over the first epochs and then stays constant. One value per
//! epoch, not per step.

/// Build the per-epoch teacher temperature table.
pub fn teacher_temp_schedule(
    warmup_temp: f32,
    temp: f32,
    warmup_epochs: usize,
    epochs: usize,
) -> Vec<f32> {
    assert!(
        warmup_epochs <= epochs,
        "teacher temp warmup ({warmup_epochs}) exceeds total epochs ({epochs})"
    );
    let mut values = Vec::with_capacity(epochs);
    for epoch in 0..warmup_epochs {
        let progress = if warmup_epochs > 1 {
            epoch as f32 / (warmup_epochs - 1) as f32
        } else {
            1.0
        };
        values.push(warmup_temp + (temp - warmup_temp) * progress);
    }
    values.resize(epochs, temp);
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ramps_then_holds() {
        let t = teacher_temp_schedule(0.04, 0.07, 4, 10);
        assert_eq!(t.len(), 10);
        assert_relative_eq!(t[0], 0.04, epsilon = 1e-6);
        assert_relative_eq!(t[3], 0.07, epsilon = 1e-6);
        for &v in &t[4..] {
            assert_relative_eq!(v, 0.07, epsilon = 1e-6);
        }
        assert!(t[1] < t[2]);
    }

    #[test]
    fn zero_warmup_is_constant() {
        let t = teacher_temp_schedule(0.04, 0.04, 0, 5);
        assert_eq!(t, vec![0.04; 5]);
    }

    #[test]
    fn one_entry_per_epoch() {
        assert_eq!(teacher_temp_schedule(0.04, 0.07, 30, 100).len(), 100);
    }
}
