//! Contact tracing: decides which susceptible agents become exposed this tick.
//!
//! Both backends share one contract. They read the same bucketed [`SpatialGrid`] and
//! the same per-agent uniform draws, and return the ids of newly exposed agents.
//! The caller applies the EXPOSED transitions, so a backend never mutates state.
//!
//! # Exposure rule
//!
//! A susceptible agent collects the `k` infectious ids bucketed in its own and the 8
//! surrounding cells. If `k > 0` the per-contact probability is
//! `p_eff = 1 - (1 - p_base)^(1/k)`. Contacts are tested in scan order: the first one
//! within `radius` whose test `draw < p_eff` passes exposes the agent.
//!
//! Every contact of an agent is tested against the same single draw, so an agent with
//! at least one contact in range is exposed with probability `p_eff`, not `p_base`.
//! The aggregate chance therefore falls as `k` grows.

mod host;
mod kernel;

pub use host::HostContactTracer;
pub use kernel::{DeviceBuffers, KernelParams, ParallelContactKernel, EXPOSURE_SENTINEL};

use crate::grid::SpatialGrid;
use contagion_common::{BackendConfig, BackendKind, DiseaseState};
use rand::prelude::*;
use thiserror::Error;

/// Errors raised while dispatching the parallel contact kernel.
/// Any of these is fatal for the tick that hit it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to build kernel thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("kernel parameter block is {actual} bytes, expected {expected}")]
    ParamBlock { expected: usize, actual: usize },

    #[error("device buffer `{buffer}` holds {actual} elements, expected {expected}")]
    BufferLength {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Read-only snapshot handed to a backend for one tick.
#[derive(Debug, Clone, Copy)]
pub struct ContactInput<'a> {
    pub positions_x: &'a [f32],
    pub positions_y: &'a [f32],
    pub states: &'a [DiseaseState],
    /// Already bucketed for this tick.
    pub grid: &'a SpatialGrid,
    /// One uniform draw in `[0, 1)` per agent; only susceptible entries are read.
    pub draws: &'a [f32],
    pub radius_sq: f32,
    pub base_probability: f32,
}

pub trait ContactTracer: Send {
    fn name(&self) -> &'static str;

    /// Returns the ids of susceptible agents that became exposed, in ascending order.
    fn infect_contacts(&mut self, input: &ContactInput<'_>) -> Result<Vec<u32>, DispatchError>;
}

/// Per-contact exposure probability for `contacts` infectious neighbors.
#[inline(always)]
pub fn per_contact_probability(base_probability: f32, contacts: usize) -> f32 {
    if contacts == 0 {
        return 0.0;
    }
    1.0 - (1.0 - base_probability).powf(1.0 / contacts as f32)
}

/// Draws one uniform value per bucketed susceptible agent, in ascending id order.
///
/// Draws are taken on the host once per tick so every backend, and every replay of
/// the tick, consumes identical randomness.
pub fn precompute_draws<R: Rng + ?Sized>(grid: &SpatialGrid, agent_count: usize, rng: &mut R) -> Vec<f32> {
    let mut draws = vec![0.0f32; agent_count];
    for &agent in &grid.susceptible {
        if let Some(slot) = draws.get_mut(agent as usize) {
            *slot = rng.random::<f32>();
        }
    }
    draws
}

/// Builds the backend selected in the configuration.
pub fn build_tracer(backend: &BackendConfig) -> Result<Box<dyn ContactTracer>, DispatchError> {
    match backend.kind {
        BackendKind::Host => Ok(Box::new(HostContactTracer::new())),
        BackendKind::Parallel => Ok(Box::new(ParallelContactKernel::new(backend.threads)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_normalization_edges() {
        assert_eq!(per_contact_probability(0.5, 0), 0.0);
        assert_eq!(per_contact_probability(1.0, 7), 1.0);
        assert_eq!(per_contact_probability(0.0, 7), 0.0);
        assert!((per_contact_probability(0.3, 1) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn per_contact_probabilities_compound_to_base() {
        for k in 1..20 {
            let p = per_contact_probability(0.4, k);
            let aggregate = 1.0 - (1.0 - p).powi(k as i32);
            assert!((aggregate - 0.4).abs() < 1e-4, "k = {}: {}", k, aggregate);
        }
    }
}
