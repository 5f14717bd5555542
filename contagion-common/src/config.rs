use crate::disease::DiseaseState;
use crate::sim_params::SimParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// World extent; agents live in [0, width] x [0, height]
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TimingConfig {
    /// Length of one fixed simulation tick, in seconds.
    pub tick_seconds: f32,
    /// Simulated time covered by a headless run.
    pub total_time_s: f32,
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f32,
    pub record_interval_s: f32,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AgentsConfig {
    /// Fixed for the whole run.
    pub count: u32,
    /// Population-uniform speed, world units per second.
    pub speed: f32,
}

/// Inclusive `[min, max]` stage duration in seconds.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct DurationRange {
    pub min: f32,
    pub max: f32,
}

impl DurationRange {
    pub const ZERO: DurationRange = DurationRange { min: 0.0, max: 0.0 };

    pub fn new(min: f32, max: f32) -> Self {
        DurationRange { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min >= 0.0 && self.min <= self.max
    }
}

/// Stage durations for the states that carry a timer.
/// Susceptible and recovered are fixed at `[0, 0]`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StageDurations {
    pub exposed: DurationRange,
    pub infectious: DurationRange,
}

impl StageDurations {
    pub fn range(&self, state: DiseaseState) -> DurationRange {
        match state {
            DiseaseState::Exposed => self.exposed,
            DiseaseState::Infectious => self.infectious,
            DiseaseState::Susceptible | DiseaseState::Recovered => DurationRange::ZERO,
        }
    }

    /// Replaces the range for `state`. Terminal states only accept `[0, 0]`.
    pub fn set(&mut self, state: DiseaseState, range: DurationRange) -> Result<()> {
        if !range.is_valid() {
            anyhow::bail!("{} duration range [{}, {}] must satisfy 0 <= min <= max.", state, range.min, range.max);
        }
        match state {
            DiseaseState::Exposed => self.exposed = range,
            DiseaseState::Infectious => self.infectious = range,
            DiseaseState::Susceptible | DiseaseState::Recovered => {
                if range != DurationRange::ZERO {
                    anyhow::bail!("{} is a terminal state; its duration is fixed at [0, 0].", state);
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct InfectionConfig {
    /// Contact distance; also the spatial grid cell size.
    pub transmission_radius: f32,
    /// Aggregate per-tick exposure probability for a susceptible agent in contact.
    pub transmission_probability: f32,
    #[serde(default = "default_max_agents_per_cell")]
    pub max_agents_per_cell: u32,
    /// Upper bound on `grid_dim_x * grid_dim_y * max_agents_per_cell`, the number of
    /// bucket slots the contact grid allocates.
    #[serde(default = "default_max_grid_slots")]
    pub max_grid_slots: u64,
    pub stage_durations: StageDurations,
}

// Initial conditions for the simulation, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct InitialConditions {
    pub seed: u64,
    #[serde(default)]
    pub exposed: u32,
    #[serde(default)]
    pub infectious: u32,
    #[serde(default)]
    pub recovered: u32,
}

impl InitialConditions {
    /// Number of agents forced into `state` at run start.
    pub fn seed_count(&self, state: DiseaseState) -> u32 {
        match state {
            DiseaseState::Exposed => self.exposed,
            DiseaseState::Infectious => self.infectious,
            DiseaseState::Recovered => self.recovered,
            DiseaseState::Susceptible => 0,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-threaded two-pass contact tracing.
    #[default]
    Host,
    /// Data-parallel kernel, one task per agent.
    Parallel,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Worker threads for the parallel kernel; 0 lets rayon decide.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RecordingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Finalized recordings kept before the oldest is evicted.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        RecordingConfig {
            enabled: true,
            history_limit: default_history_limit(),
        }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "seir_run".to_string(),
            save_positions: false,
            save_stats: true,
            save_positions_in_snapshot: false,
            format: None,
        }
    }
}

fn default_speed_multiplier() -> f32 {
    1.0
}

fn default_max_agents_per_cell() -> u32 {
    64
}

fn default_max_grid_slots() -> u64 {
    1 << 24
}

fn default_true() -> bool {
    true
}

fn default_history_limit() -> usize {
    5
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub world: WorldConfig,
    pub timing: TimingConfig,
    pub agents: AgentsConfig,
    pub infection: InfectionConfig,
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimulationConfig =
            toml::from_str(text).map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the full configuration as a TOML preset.
    pub fn save_preset<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let text = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
        std::fs::write(path_ref, text)
            .map_err(|e| anyhow::anyhow!("Failed to write preset '{}': {}", path_ref.display(), e))?;
        Ok(())
    }

    /// Converts the configuration into a generic key-value document.
    pub fn to_document(&self) -> Result<toml::Table> {
        match toml::Value::try_from(self)? {
            toml::Value::Table(table) => Ok(table),
            other => anyhow::bail!("Config serialized to a {} instead of a table.", other.type_str()),
        }
    }

    /// Rebuilds a configuration from a key-value document, validating the result.
    pub fn from_document(document: toml::Table) -> Result<Self> {
        let config: SimulationConfig = toml::Value::Table(document)
            .try_into()
            .map_err(|e| anyhow::anyhow!("Malformed config document: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.world.width > 0.0 && self.world.height > 0.0) {
            anyhow::bail!("world width and height must be positive.");
        }
        if !(self.timing.tick_seconds > 0.0) {
            anyhow::bail!("tick_seconds must be positive.");
        }
        if !(self.timing.speed_multiplier >= 0.0) {
            anyhow::bail!("speed_multiplier must be non-negative.");
        }
        if self.agents.count == 0 {
            anyhow::bail!("agent count must be greater than 0.");
        }
        if !(self.agents.speed >= 0.0) || !self.agents.speed.is_finite() {
            anyhow::bail!("agent speed must be a finite non-negative number.");
        }
        if !(self.infection.transmission_radius > 0.0) || !self.infection.transmission_radius.is_finite() {
            anyhow::bail!("transmission_radius must be positive.");
        }
        if !(0.0..=1.0).contains(&self.infection.transmission_probability) {
            anyhow::bail!("transmission_probability must lie in [0, 1].");
        }
        if self.infection.max_agents_per_cell == 0 {
            anyhow::bail!("max_agents_per_cell must be at least 1.");
        }
        let params = self.get_sim_params();
        let slots = (params.grid_dim_x as u64)
            .checked_mul(params.grid_dim_y as u64)
            .and_then(|cells| cells.checked_mul(params.max_agents_per_cell as u64));
        match slots {
            Some(slots) if slots <= self.infection.max_grid_slots => {}
            _ => anyhow::bail!(
                "contact grid of {}x{} cells with {} slots each exceeds max_grid_slots ({}); raise transmission_radius or shrink the world.",
                params.grid_dim_x,
                params.grid_dim_y,
                params.max_agents_per_cell,
                self.infection.max_grid_slots
            ),
        }
        for state in [DiseaseState::Exposed, DiseaseState::Infectious] {
            let range = self.infection.stage_durations.range(state);
            if !range.is_valid() {
                anyhow::bail!("{} duration range [{}, {}] must satisfy 0 <= min <= max.", state, range.min, range.max);
            }
        }
        let ic = &self.initial_conditions;
        let seeded = ic.exposed as u64 + ic.infectious as u64 + ic.recovered as u64;
        if seeded > self.agents.count as u64 {
            anyhow::bail!("initial seed counts ({}) exceed agent count ({}).", seeded, self.agents.count);
        }
        if self.recording.history_limit == 0 {
            anyhow::bail!("recording history_limit must be at least 1.");
        }
        Ok(())
    }

    /// Descriptive key/value pairs for display, in a stable order.
    pub fn summary(&self) -> Vec<(String, String)> {
        let durations = &self.infection.stage_durations;
        vec![
            ("Agents".to_string(), self.agents.count.to_string()),
            ("Agent speed".to_string(), format!("{:.2}", self.agents.speed)),
            ("World".to_string(), format!("{:.1} x {:.1}", self.world.width, self.world.height)),
            ("Transmission radius".to_string(), format!("{:.2}", self.infection.transmission_radius)),
            ("Transmission probability".to_string(), format!("{:.3}", self.infection.transmission_probability)),
            ("Max agents per cell".to_string(), self.infection.max_agents_per_cell.to_string()),
            ("Max grid slots".to_string(), self.infection.max_grid_slots.to_string()),
            ("Exposed duration".to_string(), format!("{:.2}-{:.2} s", durations.exposed.min, durations.exposed.max)),
            ("Infectious duration".to_string(), format!("{:.2}-{:.2} s", durations.infectious.min, durations.infectious.max)),
            ("Tick length".to_string(), format!("{:.3} s", self.timing.tick_seconds)),
            ("Speed multiplier".to_string(), format!("{:.2}x", self.timing.speed_multiplier)),
            ("Paused".to_string(), self.timing.paused.to_string()),
            ("Backend".to_string(), format!("{:?}", self.backend.kind).to_lowercase()),
            ("Seed".to_string(), self.initial_conditions.seed.to_string()),
        ]
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let radius = self.infection.transmission_radius;

        // Grid parameters: cell size tracks the transmission radius.
        let grid_cell_size = radius;
        let inv_grid_cell_size = if grid_cell_size > 1e-9 { 1.0 / grid_cell_size } else { 0.0 };
        let grid_dim_x = SimParams::grid_dim(self.world.width, inv_grid_cell_size);
        let grid_dim_y = SimParams::grid_dim(self.world.height, inv_grid_cell_size);

        SimParams {
            world_width: self.world.width,
            world_height: self.world.height,
            grid_cell_size,
            inv_grid_cell_size,
            grid_dim_x,
            grid_dim_y,
            num_grid_cells: grid_dim_x.saturating_mul(grid_dim_y),
            dt: self.timing.tick_seconds,
            agent_speed: self.agents.speed,
            transmission_radius: radius,
            radius_sq: radius * radius,
            base_probability: self.infection.transmission_probability,
            max_agents_per_cell: self.infection.max_agents_per_cell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[world]
width = 100.0
height = 50.0

[timing]
tick_seconds = 0.1
total_time_s = 10.0
record_interval_s = 1.0

[agents]
count = 200
speed = 1.5

[infection]
transmission_radius = 4.0
transmission_probability = 0.25
max_agents_per_cell = 8

[infection.stage_durations]
exposed = { min = 1.0, max = 2.0 }
infectious = { min = 3.0, max = 5.0 }

[initial_conditions]
seed = 7
infectious = 5
"#;

    #[test]
    fn parses_sample_and_applies_defaults() {
        let config = SimulationConfig::from_toml_str(SAMPLE).expect("sample config should parse");
        assert_eq!(config.agents.count, 200);
        assert_eq!(config.timing.speed_multiplier, 1.0);
        assert!(!config.timing.paused);
        assert_eq!(config.backend.kind, BackendKind::Host);
        assert!(config.recording.enabled);
        assert_eq!(config.initial_conditions.exposed, 0);
        assert_eq!(config.initial_conditions.seed_count(DiseaseState::Infectious), 5);
    }

    #[test]
    fn grid_geometry_follows_radius() {
        let config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let params = config.get_sim_params();
        assert_eq!(params.grid_cell_size, 4.0);
        // floor(100 / 4) + 1, floor(50 / 4) + 1
        assert_eq!(params.grid_dim_x, 26);
        assert_eq!(params.grid_dim_y, 13);
        assert_eq!(params.num_grid_cells, 26 * 13);
        assert_eq!(params.radius_sq, 16.0);
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let text = SAMPLE.replace("transmission_probability = 0.25", "transmission_probability = 1.5");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("transmission_probability"));
    }

    #[test]
    fn rejects_grid_above_slot_cap() {
        let tiny_radius = SAMPLE.replace("transmission_radius = 4.0", "transmission_radius = 0.0001");
        let err = SimulationConfig::from_toml_str(&tiny_radius).unwrap_err();
        assert!(err.to_string().contains("max_grid_slots"));

        // 26 x 13 cells with 8 slots each.
        let mut config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.infection.max_grid_slots, 1 << 24);
        config.infection.max_grid_slots = 26 * 13 * 8;
        assert!(config.validate().is_ok());
        config.infection.max_grid_slots -= 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_duration_range() {
        let text = SAMPLE.replace("exposed = { min = 1.0, max = 2.0 }", "exposed = { min = 3.0, max = 2.0 }");
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn document_round_trip_preserves_every_field() {
        let config = SimulationConfig::from_toml_str(SAMPLE).unwrap();
        let document = config.to_document().unwrap();
        assert!(document.contains_key("infection"));
        let restored = SimulationConfig::from_document(document).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn terminal_states_keep_zero_duration() {
        let mut durations = StageDurations {
            exposed: DurationRange::new(1.0, 2.0),
            infectious: DurationRange::new(1.0, 2.0),
        };
        assert!(durations.set(DiseaseState::Recovered, DurationRange::new(1.0, 1.0)).is_err());
        assert!(durations.set(DiseaseState::Susceptible, DurationRange::ZERO).is_ok());
        assert_eq!(durations.range(DiseaseState::Recovered), DurationRange::ZERO);
        durations.set(DiseaseState::Infectious, DurationRange::new(4.0, 6.0)).unwrap();
        assert_eq!(durations.range(DiseaseState::Infectious).max, 6.0);
    }
}
