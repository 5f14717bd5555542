use contagion_common::{DiseaseState, SimParams, Vec2};

/// Offsets of the 3x3 block of cells around (and including) an agent's own cell.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 9] = [
    (-1, -1), (0, -1), (1, -1),
    (-1, 0), (0, 0), (1, 0),
    (-1, 1), (0, 1), (1, 1),
];

/// Uniform grid that buckets INFECTIOUS agents by cell for contact tracing.
///
/// Each cell owns a fixed slot range `[cell * max_per_cell, (cell + 1) * max_per_cell)`
/// in one flat buffer; `cell_counts` records how many of those slots are filled this
/// tick. Susceptible agents are collected in a separate flat list for the exposure pass.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    pub cell_size: f32,
    pub inv_cell_size: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub max_per_cell: u32,
    pub world_width: f32,
    pub world_height: f32,

    /// Infectious agent ids, `num_cells * max_per_cell` slots.
    pub buckets: Vec<u32>,
    /// Filled slots per cell, reset every tick.
    pub cell_counts: Vec<u32>,
    /// Susceptible, in-bounds agent ids in ascending order.
    pub susceptible: Vec<u32>,

    dropped_last_tick: u32,
    dropped_total: u64,
}

impl SpatialGrid {
    /// Allocates a grid whose geometry matches `params` (cell size = transmission radius).
    pub fn new(params: &SimParams) -> Self {
        let num_cells = params.num_grid_cells as usize;
        let max_per_cell = params.max_agents_per_cell.max(1);
        Self {
            cell_size: params.grid_cell_size,
            inv_cell_size: params.inv_grid_cell_size,
            grid_dim_x: params.grid_dim_x.max(1),
            grid_dim_y: params.grid_dim_y.max(1),
            max_per_cell,
            world_width: params.world_width,
            world_height: params.world_height,
            buckets: vec![0; num_cells * max_per_cell as usize],
            cell_counts: vec![0; num_cells],
            susceptible: Vec::new(),
            dropped_last_tick: 0,
            dropped_total: 0,
        }
    }

    /// Discards all buffers and reallocates for new geometry, keeping the drop counter.
    pub fn rebuild(&mut self, params: &SimParams) {
        let dropped_total = self.dropped_total;
        *self = SpatialGrid::new(params);
        self.dropped_total = dropped_total;
        log::info!(
            "Rebuilt contact grid: {}x{} cells of size {:.3}, {} slots per cell.",
            self.grid_dim_x,
            self.grid_dim_y,
            self.cell_size,
            self.max_per_cell
        );
    }

    #[inline(always)]
    pub fn num_cells(&self) -> usize {
        self.cell_counts.len()
    }

    /// Cell coordinates for a position, or `None` outside the world (no wraparound).
    #[inline(always)]
    pub fn cell_coords(&self, pos: Vec2) -> Option<(u32, u32)> {
        if !(pos.x >= 0.0 && pos.x <= self.world_width && pos.y >= 0.0 && pos.y <= self.world_height) {
            return None;
        }
        let grid_x = (pos.x * self.inv_cell_size).floor() as u32;
        let grid_y = (pos.y * self.inv_cell_size).floor() as u32;
        if grid_x < self.grid_dim_x && grid_y < self.grid_dim_y {
            Some((grid_x, grid_y))
        } else {
            None
        }
    }

    /// Calculates the 1D grid cell index for a given position.
    #[inline(always)]
    pub fn cell_index(&self, pos: Vec2) -> Option<usize> {
        self.cell_coords(pos)
            .map(|(x, y)| (y * self.grid_dim_x + x) as usize)
    }

    /// Start of a cell's slot range in `buckets`.
    #[inline(always)]
    pub fn cell_start(&self, cell: usize) -> usize {
        cell * self.max_per_cell as usize
    }

    /// Filled slots of one cell.
    #[inline(always)]
    pub fn cell_occupants(&self, cell: usize) -> &[u32] {
        let start = self.cell_start(cell);
        &self.buckets[start..start + self.cell_counts[cell] as usize]
    }

    /// Bucketing pass: infectious agents go into their cell's slots, susceptible agents
    /// into the flat susceptible list. Out-of-bounds agents are skipped entirely.
    pub fn bucket(&mut self, positions_x: &[f32], positions_y: &[f32], states: &[DiseaseState]) {
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        self.susceptible.clear();
        self.dropped_last_tick = 0;

        let num_agents = states.len().min(positions_x.len()).min(positions_y.len());
        for idx in 0..num_agents {
            let pos = Vec2::new(positions_x[idx], positions_y[idx]);
            let Some(cell) = self.cell_index(pos) else {
                continue;
            };
            match states[idx] {
                DiseaseState::Infectious => {
                    let count = self.cell_counts[cell];
                    if count < self.max_per_cell {
                        let slot = self.cell_start(cell) + count as usize;
                        self.buckets[slot] = idx as u32;
                        self.cell_counts[cell] = count + 1;
                    } else {
                        self.dropped_last_tick += 1;
                    }
                }
                DiseaseState::Susceptible => self.susceptible.push(idx as u32),
                DiseaseState::Exposed | DiseaseState::Recovered => {}
            }
        }

        if self.dropped_last_tick > 0 {
            self.dropped_total += self.dropped_last_tick as u64;
            log::debug!(
                "Dropped {} infectious insertions into full cells (capacity {}).",
                self.dropped_last_tick,
                self.max_per_cell
            );
        }
    }

    /// Visits every bucketed infectious id in the 3x3 block around `pos`.
    /// Neighbor cells outside the grid are skipped.
    #[inline(always)]
    pub fn for_each_nearby_infectious<F>(&self, pos: Vec2, mut f: F)
    where
        F: FnMut(u32),
    {
        let Some((center_x, center_y)) = self.cell_coords(pos) else {
            return;
        };
        for (dx, dy) in NEIGHBOR_OFFSETS {
            let check_x = center_x as i32 + dx;
            let check_y = center_y as i32 + dy;
            if check_x < 0 || check_y < 0 || check_x >= self.grid_dim_x as i32 || check_y >= self.grid_dim_y as i32 {
                continue;
            }
            let cell = (check_y as u32 * self.grid_dim_x + check_x as u32) as usize;
            for &neighbor in self.cell_occupants(cell) {
                f(neighbor);
            }
        }
    }

    pub fn dropped_last_tick(&self) -> u32 {
        self.dropped_last_tick
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// True when this grid's geometry no longer matches `params`.
    pub fn needs_rebuild(&self, params: &SimParams) -> bool {
        self.cell_size != params.grid_cell_size
            || self.grid_dim_x != params.grid_dim_x.max(1)
            || self.grid_dim_y != params.grid_dim_y.max(1)
            || self.max_per_cell != params.max_agents_per_cell.max(1)
            || self.world_width != params.world_width
            || self.world_height != params.world_height
    }
}
