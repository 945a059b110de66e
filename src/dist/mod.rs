//! Distributed collective capability
//!
//! The loss engine, gradient synchronization and metric aggregation all go
//! through [`Collective`], so single-process and multi-worker runs share the
//! exact same arithmetic. [`SingleProcess`] is the identity implementation;
//! [`ThreadGroup`] runs a real all-reduce across OS threads and backs the
//! distributed-consistency tests.

mod thread_group;

pub use thread_group::ThreadGroup;

/// All-reduce barrier shared by every worker of a run.
///
/// `all_reduce_sum` must return the identical combined result on every rank,
/// and every rank must call it the same number of times with equally-sized
/// buffers. Mismatches are prevented structurally (same sampler contract on
/// every worker), not detected at runtime.
pub trait Collective: Send + Sync {
    /// Replace `buf` with the elementwise sum across all workers.
    fn all_reduce_sum(&self, buf: &mut [f32]);

    /// Number of workers in the group.
    fn world_size(&self) -> usize;

    /// This worker's rank in `[0, world_size)`.
    fn rank(&self) -> usize;

    /// Only the main worker writes checkpoints and logs.
    fn is_main(&self) -> bool {
        self.rank() == 0
    }
}

/// The degenerate single-worker group: all-reduce is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn all_reduce_sum(&self, _buf: &mut [f32]) {}

    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }
}
