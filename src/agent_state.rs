use contagion_common::{SimParams, SimulationConfig, Vec2};
use anyhow::Result;
use rand::prelude::*;
use rand::distr::Uniform;
use rand_distr::UnitCircle;

/// Holds per-agent kinematic state on the host, laid out as structure-of-arrays.
///
/// Agents are allocated once for the run's fixed count and never removed.
#[derive(Debug)]
pub struct AgentState {
    pub num_agents: u32,

    pub positions_x: Vec<f32>,
    pub positions_y: Vec<f32>,
    /// Unit heading per agent.
    pub directions_x: Vec<f32>,
    pub directions_y: Vec<f32>,
}

impl AgentState {
    /// Builds the agent buffers from explicit positions and headings.
    pub fn from_parts(positions: &[Vec2], directions: &[Vec2]) -> Result<Self> {
        if positions.len() != directions.len() {
            anyhow::bail!(
                "Position count ({}) does not match direction count ({}).",
                positions.len(),
                directions.len()
            );
        }
        Ok(Self {
            num_agents: positions.len() as u32,
            positions_x: positions.iter().map(|p| p.x).collect(),
            positions_y: positions.iter().map(|p| p.y).collect(),
            directions_x: directions.iter().map(|d| d.x).collect(),
            directions_y: directions.iter().map(|d| d.y).collect(),
        })
    }

    /// Places `agents.count` agents uniformly in the world with random unit headings.
    pub fn random(config: &SimulationConfig, rng: &mut StdRng) -> Result<Self> {
        let count = config.agents.count as usize;
        let dist_x = Uniform::new_inclusive(0.0f32, config.world.width)?;
        let dist_y = Uniform::new_inclusive(0.0f32, config.world.height)?;

        let mut positions = Vec::with_capacity(count);
        let mut directions = Vec::with_capacity(count);
        for _ in 0..count {
            positions.push(Vec2::new(rng.sample(dist_x), rng.sample(dist_y)));
            let [dx, dy]: [f32; 2] = rng.sample(UnitCircle);
            directions.push(Vec2::new(dx, dy).normalize_or_zero());
        }
        Self::from_parts(&positions, &directions)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.num_agents as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.num_agents == 0
    }

    #[inline(always)]
    pub fn position(&self, idx: usize) -> Vec2 {
        Vec2::new(self.positions_x[idx], self.positions_y[idx])
    }

    #[inline(always)]
    pub fn direction(&self, idx: usize) -> Vec2 {
        Vec2::new(self.directions_x[idx], self.directions_y[idx])
    }

    pub fn set_position(&mut self, idx: usize, pos: Vec2) {
        self.positions_x[idx] = pos.x;
        self.positions_y[idx] = pos.y;
    }

    pub fn set_direction(&mut self, idx: usize, dir: Vec2) {
        self.directions_x[idx] = dir.x;
        self.directions_y[idx] = dir.y;
    }

    /// Current positions as (x, y) tuples, for output and renderers.
    pub fn positions(&self) -> Vec<(f32, f32)> {
        self.positions_x
            .iter()
            .zip(self.positions_y.iter())
            .map(|(&x, &y)| (x, y))
            .collect()
    }

    /// True when every agent lies inside `[0, width] x [0, height]`.
    pub fn within_bounds(&self, params: &SimParams) -> bool {
        self.positions_x
            .iter()
            .zip(self.positions_y.iter())
            .all(|(&x, &y)| (0.0..=params.world_width).contains(&x) && (0.0..=params.world_height).contains(&y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;

    #[test]
    fn random_placement_stays_in_world_with_unit_headings() {
        let config = sample_config(500);
        let mut rng = StdRng::seed_from_u64(3);
        let agents = AgentState::random(&config, &mut rng).unwrap();
        assert_eq!(agents.len(), 500);
        assert!(agents.within_bounds(&config.get_sim_params()));
        for idx in 0..agents.len() {
            let len = agents.direction(idx).length();
            assert!((len - 1.0).abs() < 1e-4, "heading {} has length {}", idx, len);
        }
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let positions = vec![Vec2::zero(); 3];
        let directions = vec![Vec2::new(1.0, 0.0); 2];
        assert!(AgentState::from_parts(&positions, &directions).is_err());
    }
}
