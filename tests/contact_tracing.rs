//! Contact tracing through both backends over a hand-placed population.

use contagion_common::{DiseaseState, SimulationConfig};
use contagion_engine::contact::{precompute_draws, DeviceBuffers, EXPOSURE_SENTINEL};
use contagion_engine::{ContactInput, ContactTracer, DispatchError, HostContactTracer, ParallelContactKernel, SpatialGrid};
use rand::prelude::*;

const BASE: &str = r#"
[world]
width = 50.0
height = 50.0

[timing]
tick_seconds = 0.1
total_time_s = 5.0
record_interval_s = 1.0

[agents]
count = 2
speed = 0.0

[infection]
transmission_radius = 2.0
transmission_probability = 1.0
max_agents_per_cell = 8

[infection.stage_durations]
exposed = { min = 1.0, max = 1.0 }
infectious = { min = 5.0, max = 5.0 }

[initial_conditions]
seed = 3
"#;

fn config_with(probability: f32, max_per_cell: u32) -> SimulationConfig {
    let mut config = SimulationConfig::from_toml_str(BASE).expect("base config parses");
    config.infection.transmission_probability = probability;
    config.infection.max_agents_per_cell = max_per_cell;
    config
}

fn run_tracer(
    tracer: &mut dyn ContactTracer,
    config: &SimulationConfig,
    xs: &[f32],
    ys: &[f32],
    states: &[DiseaseState],
    draws: &[f32],
) -> Result<Vec<u32>, DispatchError> {
    let params = config.get_sim_params();
    let mut grid = SpatialGrid::new(&params);
    grid.bucket(xs, ys, states);
    let input = ContactInput {
        positions_x: xs,
        positions_y: ys,
        states,
        grid: &grid,
        draws,
        radius_sq: params.radius_sq,
        base_probability: params.base_probability,
    };
    tracer.infect_contacts(&input)
}

#[test]
fn certain_transmission_exposes_neighbor_within_radius() {
    let config = config_with(1.0, 8);
    let xs = [10.0, 11.0, 30.0];
    let ys = [10.0, 10.0, 30.0];
    let states = [DiseaseState::Infectious, DiseaseState::Susceptible, DiseaseState::Susceptible];
    let draws = [0.0, 0.999, 0.0];

    let exposed = run_tracer(&mut HostContactTracer::new(), &config, &xs, &ys, &states, &draws).unwrap();
    assert_eq!(exposed, vec![1]);
}

#[test]
fn zero_probability_never_exposes() {
    let config = config_with(0.0, 8);
    let xs = [10.0, 10.5];
    let ys = [10.0, 10.0];
    let states = [DiseaseState::Infectious, DiseaseState::Susceptible];
    let draws = [0.0, 0.0];

    assert!(run_tracer(&mut HostContactTracer::new(), &config, &xs, &ys, &states, &draws).unwrap().is_empty());
    let mut kernel = ParallelContactKernel::new(2).unwrap();
    assert!(run_tracer(&mut kernel, &config, &xs, &ys, &states, &draws).unwrap().is_empty());
}

#[test]
fn neighbor_cell_outside_radius_does_not_expose() {
    let config = config_with(1.0, 8);
    // Adjacent cells, 3.5 units apart with radius 2.
    let xs = [1.0, 4.5];
    let ys = [1.0, 1.0];
    let states = [DiseaseState::Infectious, DiseaseState::Susceptible];
    let exposed = run_tracer(&mut HostContactTracer::new(), &config, &xs, &ys, &states, &[0.0, 0.0]).unwrap();
    assert!(exposed.is_empty());
}

#[test]
fn full_cell_drops_later_infectious_agents() {
    let config = config_with(1.0, 1);
    // Agent 0 and 1 share a cell; only agent 0 is bucketed. Agent 2 is only within
    // range of agent 1, so it stays susceptible.
    let xs = [0.5, 1.9, 3.8];
    let ys = [0.5, 1.9, 1.9];
    let states = [DiseaseState::Infectious, DiseaseState::Infectious, DiseaseState::Susceptible];
    let draws = [0.0, 0.0, 0.0];

    let exposed = run_tracer(&mut HostContactTracer::new(), &config, &xs, &ys, &states, &draws).unwrap();
    assert!(exposed.is_empty());

    let roomy = config_with(1.0, 2);
    let exposed = run_tracer(&mut HostContactTracer::new(), &roomy, &xs, &ys, &states, &draws).unwrap();
    assert_eq!(exposed, vec![2]);
}

#[test]
fn backends_agree_on_random_population() {
    let mut config = config_with(0.35, 4);
    config.agents.count = 3_000;
    let params = config.get_sim_params();
    let mut rng = StdRng::seed_from_u64(17);

    let xs: Vec<f32> = (0..3_000).map(|_| rng.random_range(0.0..=50.0)).collect();
    let ys: Vec<f32> = (0..3_000).map(|_| rng.random_range(0.0..=50.0)).collect();
    let states: Vec<DiseaseState> = (0..3_000)
        .map(|_| match rng.random_range(0..10) {
            0..=2 => DiseaseState::Infectious,
            3 => DiseaseState::Exposed,
            4 => DiseaseState::Recovered,
            _ => DiseaseState::Susceptible,
        })
        .collect();

    let mut grid = SpatialGrid::new(&params);
    grid.bucket(&xs, &ys, &states);
    let draws = precompute_draws(&grid, xs.len(), &mut rng);
    let input = ContactInput {
        positions_x: &xs,
        positions_y: &ys,
        states: &states,
        grid: &grid,
        draws: &draws,
        radius_sq: params.radius_sq,
        base_probability: params.base_probability,
    };

    let host = HostContactTracer::new().infect_contacts(&input).unwrap();
    let parallel = ParallelContactKernel::new(4).unwrap().infect_contacts(&input).unwrap();
    assert!(!host.is_empty());
    assert!(grid.dropped_last_tick() > 0);
    assert_eq!(host, parallel);
    assert!(host.iter().all(|&id| states[id as usize] == DiseaseState::Susceptible));
}

#[test]
fn corrupted_buffers_fail_dispatch() {
    let config = config_with(1.0, 8);
    let params = config.get_sim_params();
    let xs = [10.0, 11.0];
    let ys = [10.0, 10.0];
    let states = [DiseaseState::Infectious, DiseaseState::Susceptible];
    let mut grid = SpatialGrid::new(&params);
    grid.bucket(&xs, &ys, &states);
    let input = ContactInput {
        positions_x: &xs,
        positions_y: &ys,
        states: &states,
        grid: &grid,
        draws: &[0.0, 0.0],
        radius_sq: params.radius_sq,
        base_probability: params.base_probability,
    };

    let mut kernel = ParallelContactKernel::new(1).unwrap();
    let buffers = DeviceBuffers::upload(&input);
    assert_eq!(kernel.dispatch(&buffers).unwrap(), vec![1]);

    let mut truncated = buffers.clone();
    truncated.params.pop();
    assert!(matches!(kernel.dispatch(&truncated), Err(DispatchError::ParamBlock { .. })));

    let mut short = buffers;
    short.draws.pop();
    assert!(matches!(
        kernel.dispatch(&short),
        Err(DispatchError::BufferLength { buffer: "draws", .. })
    ));
    assert_ne!(EXPOSURE_SENTINEL, 1);
}
