//! Configuration change log for reproducible runs.
//!
//! A [`Recording`] holds a deep copy of the configuration a run started from plus every
//! configuration change keyed by the tick boundary it was made at. Replaying the changes
//! with tick `<= t` over the initial copy rebuilds the configuration that was live after
//! `t` ticks.

use anyhow::Result;
use contagion_common::{DiseaseState, DurationRange, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Why a configuration change could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChangeError {
    #[error("change `{change}` rejected: {reason}")]
    Invalid { change: String, reason: String },

    #[error("change path is empty")]
    EmptyPath,

    #[error("path segment `{path}` does not exist")]
    MissingSegment { path: String },

    #[error("path segment `{path}` is not a table")]
    NotATable { path: String },

    #[error("value for `{path}` is a {found}, expected a {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// One mutation of the live configuration.
///
/// The typed variants cover everything the configuration layer can push between ticks.
/// `Document` addresses any field by its key path in the TOML form of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ConfigChange {
    AgentSpeed(f32),
    WorldBounds { width: f32, height: f32 },
    TransmissionRadius(f32),
    TransmissionProbability(f32),
    MaxAgentsPerCell(u32),
    StageDuration { state: DiseaseState, range: DurationRange },
    TickSeconds(f32),
    SpeedMultiplier(f32),
    Paused(bool),
    Document { path: Vec<String>, value: toml::Value },
}

impl ConfigChange {
    /// Builds a path-addressed change from dotted segments.
    pub fn document<S: AsRef<str>>(path: &[S], value: impl Into<toml::Value>) -> Self {
        ConfigChange::Document {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            value: value.into(),
        }
    }

    /// Applies the change to `config`. On error `config` is left untouched.
    pub fn apply_to(&self, config: &mut SimulationConfig) -> Result<(), ChangeError> {
        let mut candidate = config.clone();
        match self {
            ConfigChange::AgentSpeed(speed) => candidate.agents.speed = *speed,
            ConfigChange::WorldBounds { width, height } => {
                candidate.world.width = *width;
                candidate.world.height = *height;
            }
            ConfigChange::TransmissionRadius(radius) => candidate.infection.transmission_radius = *radius,
            ConfigChange::TransmissionProbability(p) => candidate.infection.transmission_probability = *p,
            ConfigChange::MaxAgentsPerCell(max) => candidate.infection.max_agents_per_cell = *max,
            ConfigChange::StageDuration { state, range } => candidate
                .infection
                .stage_durations
                .set(*state, *range)
                .map_err(|e| self.rejected(e))?,
            ConfigChange::TickSeconds(seconds) => candidate.timing.tick_seconds = *seconds,
            ConfigChange::SpeedMultiplier(multiplier) => candidate.timing.speed_multiplier = *multiplier,
            ConfigChange::Paused(paused) => candidate.timing.paused = *paused,
            ConfigChange::Document { path, value } => candidate = apply_document(&candidate, path, value)?,
        }

        candidate.validate().map_err(|e| self.rejected(e))?;
        if candidate.agents.count != config.agents.count {
            return Err(self.rejected("the agent count is fixed for the run"));
        }
        if candidate.initial_conditions != config.initial_conditions {
            return Err(self.rejected("initial conditions only apply when a run starts"));
        }
        *config = candidate;
        Ok(())
    }

    fn rejected(&self, reason: impl ToString) -> ChangeError {
        ChangeError::Invalid {
            change: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigChange::AgentSpeed(v) => write!(f, "agents.speed = {}", v),
            ConfigChange::WorldBounds { width, height } => write!(f, "world = {} x {}", width, height),
            ConfigChange::TransmissionRadius(v) => write!(f, "infection.transmission_radius = {}", v),
            ConfigChange::TransmissionProbability(v) => write!(f, "infection.transmission_probability = {}", v),
            ConfigChange::MaxAgentsPerCell(v) => write!(f, "infection.max_agents_per_cell = {}", v),
            ConfigChange::StageDuration { state, range } => {
                write!(f, "infection.stage_durations.{} = [{}, {}]", state, range.min, range.max)
            }
            ConfigChange::TickSeconds(v) => write!(f, "timing.tick_seconds = {}", v),
            ConfigChange::SpeedMultiplier(v) => write!(f, "timing.speed_multiplier = {}", v),
            ConfigChange::Paused(v) => write!(f, "timing.paused = {}", v),
            ConfigChange::Document { path, value } => write!(f, "{} = {}", path.join("."), value),
        }
    }
}

/// Walks `path` through the document form of `config` and overwrites the terminal key.
/// The key must already exist and keep its value kind (integers may fill float slots).
fn apply_document(config: &SimulationConfig, path: &[String], value: &toml::Value) -> Result<SimulationConfig, ChangeError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(ChangeError::EmptyPath);
    };
    let mut document = config.to_document().map_err(|e| ChangeError::Invalid {
        change: path.join("."),
        reason: e.to_string(),
    })?;

    let mut table = &mut document;
    for (depth, segment) in parents.iter().enumerate() {
        table = match table.get_mut(segment) {
            Some(toml::Value::Table(inner)) => inner,
            Some(_) => return Err(ChangeError::NotATable { path: path[..=depth].join(".") }),
            None => return Err(ChangeError::MissingSegment { path: path[..=depth].join(".") }),
        };
    }

    let Some(slot) = table.get_mut(last) else {
        return Err(ChangeError::MissingSegment { path: path.join(".") });
    };
    let compatible = std::mem::discriminant(slot) == std::mem::discriminant(value)
        || matches!((&*slot, value), (toml::Value::Float(_), toml::Value::Integer(_)));
    if !compatible {
        return Err(ChangeError::TypeMismatch {
            path: path.join("."),
            expected: slot.type_str(),
            found: value.type_str(),
        });
    }
    *slot = value.clone();

    SimulationConfig::from_document(document).map_err(|e| ChangeError::Invalid {
        change: path.join("."),
        reason: e.to_string(),
    })
}

/// Configuration rebuilt at some tick, plus every change that had to be skipped.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub config: SimulationConfig,
    pub skipped: Vec<(u64, ChangeError)>,
}

/// Initial configuration plus the ordered-by-tick change log of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub initial_state: SimulationConfig,
    pub changes: BTreeMap<u64, Vec<ConfigChange>>,
    /// Last tick completed while this recording was live.
    pub final_tick: u64,
}

impl Recording {
    pub fn changes_at(&self, tick: u64) -> &[ConfigChange] {
        self.changes.get(&tick).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn change_count(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    /// Replays every change at ticks `<= target_tick` over a copy of the initial state.
    /// Changes that fail to apply are skipped and reported; reconstruction continues.
    pub fn reconstruct(&self, target_tick: u64) -> Reconstruction {
        let mut config = self.initial_state.clone();
        let mut skipped = Vec::new();
        for (&tick, changes) in self.changes.range(..=target_tick) {
            for change in changes {
                if let Err(e) = change.apply_to(&mut config) {
                    log::warn!("Skipping recorded change at tick {}: {}", tick, e);
                    skipped.push((tick, e));
                }
            }
        }
        Reconstruction { config, skipped }
    }

    /// The configuration that was live after `target_tick` ticks.
    pub fn get_state_at(&self, target_tick: u64) -> SimulationConfig {
        self.reconstruct(target_tick).config
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let file = std::fs::File::create(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to create recording file '{}': {}", path_ref.display(), e))?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)
            .map_err(|e| anyhow::anyhow!("Failed to write recording '{}': {}", path_ref.display(), e))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = std::fs::File::open(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to open recording '{}': {}", path_ref.display(), e))?;
        let recording: Recording = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("Failed to parse recording '{}': {}", path_ref.display(), e))?;
        Ok(recording)
    }
}

/// Collects configuration changes for the live run.
#[derive(Debug, Clone)]
pub struct ChangeRecorder {
    recording: Recording,
}

impl ChangeRecorder {
    /// Deep-copies `initial_config` as the recording's starting point.
    pub fn new(initial_config: &SimulationConfig) -> Self {
        Self {
            recording: Recording {
                initial_state: initial_config.clone(),
                changes: BTreeMap::new(),
                final_tick: 0,
            },
        }
    }

    pub fn record(&mut self, tick: u64, change: ConfigChange) {
        log::debug!("Recording change at tick {}: {}", tick, change);
        self.recording.changes.entry(tick).or_default().push(change);
    }

    /// Marks `tick` as completed under this recording.
    pub fn checkpoint(&mut self, tick: u64) {
        self.recording.final_tick = self.recording.final_tick.max(tick);
    }

    pub fn get_state_at(&self, target_tick: u64) -> SimulationConfig {
        self.recording.get_state_at(target_tick)
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn finalize(self) -> Recording {
        self.recording
    }
}
