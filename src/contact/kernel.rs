use super::{per_contact_probability, ContactInput, ContactTracer, DispatchError};
use crate::grid::NEIGHBOR_OFFSETS;
use contagion_common::DiseaseState;
use rayon::prelude::*;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Output value of a kernel slot whose agent was not exposed.
pub const EXPOSURE_SENTINEL: u32 = u32::MAX;

/// Fixed-layout parameter block uploaded alongside the buffers.
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct KernelParams {
    pub radius_sq: f32,
    pub base_probability: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub max_per_cell: u32,
    pub cell_size: f32,
    pub inv_cell_size: f32,
    pub agent_count: u32,
    pub world_width: f32,
    pub world_height: f32,
}

/// Flat buffers handed across the dispatch boundary. The kernel only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuffers {
    /// Interleaved `x, y` per agent.
    pub positions: Vec<f32>,
    /// `DiseaseState::code()` per agent.
    pub states: Vec<u32>,
    /// Infectious ids, `max_per_cell` slots per cell.
    pub buckets: Vec<u32>,
    pub cell_starts: Vec<u32>,
    pub cell_counts: Vec<u32>,
    /// Interleaved `dx, dy` pairs of the 3x3 neighborhood.
    pub neighbor_offsets: Vec<i32>,
    pub draws: Vec<f32>,
    /// `KernelParams` as raw bytes.
    pub params: Vec<u8>,
}

impl DeviceBuffers {
    /// Packs a host snapshot into the device layout.
    pub fn upload(input: &ContactInput<'_>) -> Self {
        let grid = input.grid;
        let agent_count = input.states.len();

        let positions = input
            .positions_x
            .iter()
            .zip(input.positions_y.iter())
            .take(agent_count)
            .flat_map(|(&x, &y)| [x, y])
            .collect();
        let cell_starts = (0..grid.num_cells())
            .map(|cell| grid.cell_start(cell) as u32)
            .collect();
        let neighbor_offsets = NEIGHBOR_OFFSETS.iter().flat_map(|&(dx, dy)| [dx, dy]).collect();

        let params = KernelParams {
            radius_sq: input.radius_sq,
            base_probability: input.base_probability,
            grid_dim_x: grid.grid_dim_x,
            grid_dim_y: grid.grid_dim_y,
            max_per_cell: grid.max_per_cell,
            cell_size: grid.cell_size,
            inv_cell_size: grid.inv_cell_size,
            agent_count: agent_count as u32,
            world_width: grid.world_width,
            world_height: grid.world_height,
        };

        Self {
            positions,
            states: input.states.iter().map(|s| s.code()).collect(),
            buckets: grid.buckets.clone(),
            cell_starts,
            cell_counts: grid.cell_counts.clone(),
            neighbor_offsets,
            draws: input.draws[..agent_count.min(input.draws.len())].to_vec(),
            params: params.as_bytes().to_vec(),
        }
    }

    fn validate(&self, params: &KernelParams) -> Result<(), DispatchError> {
        let agents = params.agent_count as usize;
        let cells = params.grid_dim_x as usize * params.grid_dim_y as usize;
        let checks: [(&'static str, usize, usize); 7] = [
            ("positions", agents * 2, self.positions.len()),
            ("states", agents, self.states.len()),
            ("draws", agents, self.draws.len()),
            ("cell_starts", cells, self.cell_starts.len()),
            ("cell_counts", cells, self.cell_counts.len()),
            ("buckets", cells * params.max_per_cell as usize, self.buckets.len()),
            ("neighbor_offsets", NEIGHBOR_OFFSETS.len() * 2, self.neighbor_offsets.len()),
        ];
        for (buffer, expected, actual) in checks {
            if expected != actual {
                return Err(DispatchError::BufferLength { buffer, expected, actual });
            }
        }
        Ok(())
    }
}

/// Data-parallel contact kernel: one task per agent on a dedicated rayon pool.
///
/// Every task writes only its own output slot and reads shared immutable buffers, so the
/// dispatch needs no locks; `ThreadPool::install` is the completion barrier.
pub struct ParallelContactKernel {
    pool: rayon::ThreadPool,
    output: Vec<u32>,
}

impl ParallelContactKernel {
    /// `threads == 0` lets rayon pick the worker count.
    pub fn new(threads: usize) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("contact-kernel-{}", i))
            .build()?;
        log::info!("Contact kernel using {} threads.", pool.current_num_threads());
        Ok(Self { pool, output: Vec::new() })
    }

    /// Runs the kernel over uploaded buffers and reads back the non-sentinel ids.
    pub fn dispatch(&mut self, buffers: &DeviceBuffers) -> Result<Vec<u32>, DispatchError> {
        let params = KernelParams::read_from_bytes(&buffers.params).map_err(|_| DispatchError::ParamBlock {
            expected: std::mem::size_of::<KernelParams>(),
            actual: buffers.params.len(),
        })?;
        buffers.validate(&params)?;

        let output = &mut self.output;
        output.clear();
        output.resize(params.agent_count as usize, EXPOSURE_SENTINEL);
        self.pool.install(|| {
            output
                .par_iter_mut()
                .enumerate()
                .for_each(|(agent, slot)| *slot = expose_thread(agent, buffers, &params));
        });

        Ok(self
            .output
            .iter()
            .copied()
            .filter(|&id| id != EXPOSURE_SENTINEL)
            .collect())
    }
}

impl std::fmt::Debug for ParallelContactKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelContactKernel")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl ContactTracer for ParallelContactKernel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn infect_contacts(&mut self, input: &ContactInput<'_>) -> Result<Vec<u32>, DispatchError> {
        let buffers = DeviceBuffers::upload(input);
        self.dispatch(&buffers)
    }
}

/// Body of one kernel thread. Returns the agent's id if it became exposed.
#[inline(always)]
fn expose_thread(agent: usize, buffers: &DeviceBuffers, params: &KernelParams) -> u32 {
    if buffers.states[agent] != DiseaseState::Susceptible.code() {
        return EXPOSURE_SENTINEL;
    }
    let x = buffers.positions[agent * 2];
    let y = buffers.positions[agent * 2 + 1];
    if !(x >= 0.0 && x <= params.world_width && y >= 0.0 && y <= params.world_height) {
        return EXPOSURE_SENTINEL;
    }
    let center_x = (x * params.inv_cell_size).floor() as u32;
    let center_y = (y * params.inv_cell_size).floor() as u32;
    if center_x >= params.grid_dim_x || center_y >= params.grid_dim_y {
        return EXPOSURE_SENTINEL;
    }

    let cell_at = |pair: usize| -> Option<usize> {
        let check_x = center_x as i32 + buffers.neighbor_offsets[pair * 2];
        let check_y = center_y as i32 + buffers.neighbor_offsets[pair * 2 + 1];
        if check_x < 0 || check_y < 0 || check_x >= params.grid_dim_x as i32 || check_y >= params.grid_dim_y as i32 {
            None
        } else {
            Some(check_y as usize * params.grid_dim_x as usize + check_x as usize)
        }
    };
    let pairs = buffers.neighbor_offsets.len() / 2;

    let contacts: usize = (0..pairs)
        .filter_map(&cell_at)
        .map(|cell| buffers.cell_counts[cell] as usize)
        .sum();
    if contacts == 0 {
        return EXPOSURE_SENTINEL;
    }

    let p_eff = per_contact_probability(params.base_probability, contacts);
    let draw = buffers.draws[agent];
    for cell in (0..pairs).filter_map(&cell_at) {
        let start = buffers.cell_starts[cell] as usize;
        let end = start + buffers.cell_counts[cell] as usize;
        for &contact in &buffers.buckets[start..end] {
            let cx = buffers.positions[contact as usize * 2];
            let cy = buffers.positions[contact as usize * 2 + 1];
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= params.radius_sq && draw < p_eff {
                return agent as u32;
            }
        }
    }
    EXPOSURE_SENTINEL
}
