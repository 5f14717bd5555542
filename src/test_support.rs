use contagion_common::{
    AgentsConfig, BackendConfig, DurationRange, InfectionConfig, InitialConditions, OutputConfig,
    RecordingConfig, SimulationConfig, StageDurations, TimingConfig, WorldConfig,
};

/// 100 x 100 world, radius 2, everyone susceptible, seed 42.
pub fn sample_config(count: u32) -> SimulationConfig {
    SimulationConfig {
        world: WorldConfig { width: 100.0, height: 100.0 },
        timing: TimingConfig {
            tick_seconds: 0.1,
            total_time_s: 10.0,
            speed_multiplier: 1.0,
            record_interval_s: 1.0,
            paused: false,
        },
        agents: AgentsConfig { count, speed: 1.0 },
        infection: InfectionConfig {
            transmission_radius: 2.0,
            transmission_probability: 0.5,
            max_agents_per_cell: 16,
            max_grid_slots: 1 << 24,
            stage_durations: StageDurations {
                exposed: DurationRange::new(1.0, 2.0),
                infectious: DurationRange::new(2.0, 4.0),
            },
        },
        initial_conditions: InitialConditions {
            seed: 42,
            exposed: 0,
            infectious: 0,
            recovered: 0,
        },
        backend: BackendConfig::default(),
        recording: RecordingConfig::default(),
        output: OutputConfig::default(),
    }
}
