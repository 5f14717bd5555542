pub mod config;
pub mod disease;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AgentsConfig, BackendConfig, BackendKind, DurationRange, InfectionConfig, InitialConditions,
    OutputConfig, RecordingConfig, SimulationConfig, StageDurations, TimingConfig, WorldConfig,
};
pub use disease::DiseaseState;
pub use sim_params::SimParams;
pub use snapshot::CensusSnapshot;
pub use vecmath::{clamp, Vec2};
