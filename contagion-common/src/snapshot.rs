use crate::disease::DiseaseState;
use serde::{Deserialize, Serialize};

/// Census and contact statistics at a specific simulation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusSnapshot {
    /// Number of ticks completed when the snapshot was taken.
    pub tick: u64,
    /// Simulated time in seconds (`tick * tick_seconds` at the time of recording).
    pub time_s: f64,
    /// Agent counts indexed by `DiseaseState::index()`.
    pub counts: [u32; DiseaseState::COUNT],
    /// Agents moved to EXPOSED during the last tick.
    pub newly_exposed: u32,
    /// Infectious insertions dropped because their grid cell was full, summed over the run.
    pub dropped_insertions: u64,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f32, f32)>>,
}

impl CensusSnapshot {
    pub fn count(&self, state: DiseaseState) -> u32 {
        self.counts[state.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}
