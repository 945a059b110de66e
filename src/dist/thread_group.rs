//! In-process all-reduce over OS threads

use super::Collective;
use std::sync::{Arc, Barrier, Mutex};

struct Shared {
    accumulator: Mutex<Vec<f32>>,
    barrier: Barrier,
}

/// A collective group whose workers are threads of one process.
///
/// Each call runs a two-phase sum: every rank adds its buffer into a shared
/// accumulator, the group synchronizes, every rank reads the combined result
/// back, and the group synchronizes again before the accumulator is cleared
/// for the next call.
pub struct ThreadGroup {
    shared: Arc<Shared>,
    world_size: usize,
    rank: usize,
}

impl ThreadGroup {
    /// Create handles for every rank of a `world_size`-worker group.
    pub fn new_group(world_size: usize) -> Vec<ThreadGroup> {
        assert!(world_size > 0);
        let shared = Arc::new(Shared {
            accumulator: Mutex::new(Vec::new()),
            barrier: Barrier::new(world_size),
        });
        (0..world_size)
            .map(|rank| ThreadGroup {
                shared: Arc::clone(&shared),
                world_size,
                rank,
            })
            .collect()
    }
}

impl Collective for ThreadGroup {
    fn all_reduce_sum(&self, buf: &mut [f32]) {
        {
            let mut acc = self.shared.accumulator.lock().unwrap();
            if acc.is_empty() {
                acc.resize(buf.len(), 0.0);
            }
            assert_eq!(
                acc.len(),
                buf.len(),
                "all-reduce buffer size mismatch across ranks"
            );
            for (a, &b) in acc.iter_mut().zip(buf.iter()) {
                *a += b;
            }
        }

        // Every contribution is in; read back the combined sum.
        self.shared.barrier.wait();
        {
            let acc = self.shared.accumulator.lock().unwrap();
            buf.copy_from_slice(&acc);
        }

        // Everyone has read; one rank resets for the next round.
        let leader = self.shared.barrier.wait();
        if leader.is_leader() {
            self.shared.accumulator.lock().unwrap().clear();
        }
        self.shared.barrier.wait();
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sums_across_all_ranks() {
        let handles: Vec<_> = ThreadGroup::new_group(4)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let mut buf = vec![group.rank() as f32 + 1.0; 3];
                    group.all_reduce_sum(&mut buf);
                    buf
                })
            })
            .collect();
        for h in handles {
            // 1 + 2 + 3 + 4 on every rank.
            assert_eq!(h.join().unwrap(), vec![10.0, 10.0, 10.0]);
        }
    }

    #[test]
    fn repeated_rounds_do_not_leak_state() {
        let handles: Vec<_> = ThreadGroup::new_group(2)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let mut results = Vec::new();
                    for round in 0..5 {
                        let mut buf = vec![round as f32];
                        group.all_reduce_sum(&mut buf);
                        results.push(buf[0]);
                    }
                    results
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        }
    }

    #[test]
    fn exactly_one_main_rank() {
        let group = ThreadGroup::new_group(3);
        assert_eq!(group.iter().filter(|g| g.is_main()).count(), 1);
        assert!(group[0].is_main());
    }
}
