//! Networks and parameters
//!
//! The backbone itself is a collaborator: anything implementing [`Embedder`]
//! can be trained. This module owns the parameter containers, a small
//! pooled-linear reference embedder, the architecture registry and the
//! student/teacher dual-network runner with its EMA update.

mod embedder;
mod params;
mod runner;

pub use embedder::{build_embedder, Embedder, PooledEmbedder};
pub use params::{Param, ParameterSet};
pub use runner::DualNetworkRunner;
