//! Windowed training metrics

use crate::dist::Collective;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fmt;

/// Tracks a scalar over a sliding window plus the running global average.
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    window: VecDeque<f64>,
    window_size: usize,
    count: u64,
    total: f64,
}

impl SmoothedValue {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            count: 0,
            total: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += 1;
        self.total += value;
    }

    /// Mean of the sliding window.
    pub fn avg(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Mean over everything ever recorded (after `synchronize`, over all
    /// workers).
    pub fn global_avg(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total / self.count as f64
    }

    pub fn latest(&self) -> f64 {
        self.window.back().copied().unwrap_or(0.0)
    }

    /// Replace the local count/total with their all-reduced sums. The window
    /// stays local; only the global average becomes world-wide.
    pub fn synchronize(&mut self, collective: &dyn Collective) {
        let mut buf = [self.count as f32, self.total as f32];
        collective.all_reduce_sum(&mut buf);
        self.count = buf[0] as u64;
        self.total = f64::from(buf[1]);
    }
}

impl fmt::Display for SmoothedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} ({:.6})", self.avg(), self.global_avg())
    }
}

/// Named set of smoothed meters with periodic progress lines.
pub struct MetricLogger {
    meters: BTreeMap<String, SmoothedValue>,
    window_size: usize,
}

impl MetricLogger {
    pub fn new(window_size: usize) -> Self {
        Self {
            meters: BTreeMap::new(),
            window_size,
        }
    }

    pub fn update(&mut self, name: &str, value: f64) {
        self.meters
            .entry(name.to_string())
            .or_insert_with(|| SmoothedValue::new(self.window_size))
            .update(value);
    }

    pub fn meter(&self, name: &str) -> Option<&SmoothedValue> {
        self.meters.get(name)
    }

    /// All-reduce every meter's count and total across workers.
    pub fn synchronize(&mut self, collective: &dyn Collective) {
        for meter in self.meters.values_mut() {
            meter.synchronize(collective);
        }
    }

    /// `(name, global average)` pairs, for end-of-epoch log lines.
    pub fn global_averages(&self) -> impl Iterator<Item = (&str, f64)> {
        self.meters.iter().map(|(k, v)| (k.as_str(), v.global_avg()))
    }

    /// Print a progress line every `print_freq` steps and on the last step.
    pub fn log_step(&self, header: &str, step: usize, total_steps: usize, print_freq: usize) {
        if step % print_freq != 0 && step + 1 != total_steps {
            return;
        }
        let meters = self
            .meters
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{header}  [{step}/{total_steps}]  {meters}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{SingleProcess, ThreadGroup};
    use approx::assert_relative_eq;
    use std::thread;

    #[test]
    fn window_average_forgets_old_values() {
        let mut v = SmoothedValue::new(2);
        v.update(10.0);
        v.update(2.0);
        v.update(4.0);
        assert_relative_eq!(v.avg(), 3.0);
        assert_relative_eq!(v.global_avg(), 16.0 / 3.0);
        assert_relative_eq!(v.latest(), 4.0);
    }

    #[test]
    fn synchronize_is_identity_for_single_process() {
        let mut v = SmoothedValue::new(4);
        v.update(1.0);
        v.update(3.0);
        v.synchronize(&SingleProcess);
        assert_relative_eq!(v.global_avg(), 2.0);
    }

    #[test]
    fn synchronize_averages_over_workers() {
        let groups = ThreadGroup::new_group(2);
        let handles: Vec<_> = groups
            .into_iter()
            .enumerate()
            .map(|(rank, group)| {
                thread::spawn(move || {
                    let mut v = SmoothedValue::new(4);
                    v.update(if rank == 0 { 1.0 } else { 3.0 });
                    v.synchronize(&group);
                    v.global_avg()
                })
            })
            .collect();
        for h in handles {
            assert_relative_eq!(h.join().unwrap(), 2.0);
        }
    }

    #[test]
    fn logger_tracks_named_meters() {
        let mut logger = MetricLogger::new(8);
        logger.update("loss", 2.0);
        logger.update("loss", 4.0);
        logger.update("lr", 0.001);
        assert_relative_eq!(logger.meter("loss").unwrap().global_avg(), 3.0);
        let names: Vec<_> = logger.global_averages().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["loss", "lr"]);
    }
}
