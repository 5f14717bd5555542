use serde::{Deserialize, Serialize};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    // World & Grid
    pub world_width: f32,
    pub world_height: f32,
    /// Always equal to `transmission_radius`.
    pub grid_cell_size: f32,
    pub inv_grid_cell_size: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub num_grid_cells: u32,

    // Time
    pub dt: f32,

    // Agents
    pub agent_speed: f32,

    // Infection
    pub transmission_radius: f32,
    pub radius_sq: f32,
    pub base_probability: f32,
    pub max_agents_per_cell: u32,
}

impl SimParams {
    /// Number of cells along an axis of length `extent`: `max(1, floor(extent / cell) + 1)`.
    pub fn grid_dim(extent: f32, inv_cell_size: f32) -> u32 {
        let cells = (extent * inv_cell_size).floor();
        if cells.is_finite() && cells >= 0.0 {
            (cells as u32).saturating_add(1).max(1)
        } else {
            1
        }
    }
}
