//! Bounded history of finished recordings and the session that switches between a
//! live run and the replay of a stored recording.

use crate::recorder::Recording;
use crate::simulation::EpidemicSimulation;
use anyhow::{Context, Result};
use contagion_common::SimulationConfig;
use log::{info, warn};
use std::collections::VecDeque;

/// Finished recordings, oldest first, capped at `limit` entries.
#[derive(Debug, Clone)]
pub struct RecordingHistory {
    recordings: VecDeque<Recording>,
    limit: usize,
    selected: Option<usize>,
}

impl RecordingHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            recordings: VecDeque::with_capacity(limit.max(1)),
            limit: limit.max(1),
            selected: None,
        }
    }

    /// Appends a recording, evicting the oldest one once the limit is reached.
    /// The new recording becomes the selection.
    pub fn push(&mut self, recording: Recording) {
        while self.recordings.len() >= self.limit {
            if let Some(evicted) = self.recordings.pop_front() {
                info!(
                    "Evicted oldest recording ({} ticks) from history (limit {}).",
                    evicted.final_tick, self.limit
                );
            }
        }
        self.recordings.push_back(recording);
        self.selected = Some(self.recordings.len() - 1);
    }

    /// Selects a recording by index. `None` and out-of-range indices select the newest
    /// entry.
    pub fn select_recording(&mut self, index: Option<usize>) {
        self.selected = match index {
            _ if self.recordings.is_empty() => {
                warn!("No recordings stored; nothing to select.");
                None
            }
            None => Some(self.recordings.len() - 1),
            Some(i) if i >= self.recordings.len() => {
                let last = self.recordings.len() - 1;
                warn!("Recording index {} out of range; selecting {}.", i, last);
                Some(last)
            }
            Some(i) => Some(i),
        };
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected(&self) -> Option<&Recording> {
        self.selected.and_then(|i| self.recordings.get(i))
    }

    pub fn get(&self, index: usize) -> Option<&Recording> {
        self.recordings.get(index)
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recording> {
        self.recordings.iter()
    }
}

/// Owns the running simulation and the history of recordings it produced.
#[derive(Debug)]
pub struct SessionManager {
    simulation: EpidemicSimulation,
    history: RecordingHistory,
}

impl SessionManager {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let history = RecordingHistory::new(config.recording.history_limit);
        let simulation = EpidemicSimulation::new(config)?;
        Ok(Self { simulation, history })
    }

    pub fn simulation(&self) -> &EpidemicSimulation {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut EpidemicSimulation {
        &mut self.simulation
    }

    pub fn history(&self) -> &RecordingHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut RecordingHistory {
        &mut self.history
    }

    pub fn is_replaying(&self) -> bool {
        self.simulation.is_replay()
    }

    /// Starts a fresh live run from `config`, archiving the current recording.
    pub fn restart(&mut self, config: SimulationConfig) -> Result<()> {
        if let Some(previous) = self.simulation.reset_with(config)? {
            self.history.push(previous);
        }
        Ok(())
    }

    /// Finalizes the live recording into the history without restarting.
    pub fn finish(&mut self) -> Option<&Recording> {
        let recording = self.simulation.finish_recording()?;
        self.history.push(recording);
        self.history.selected()
    }

    /// Replaces the simulation with a replay of the selected recording. The live run's
    /// recording is archived first.
    pub fn start_replay(&mut self) -> Result<()> {
        let recording = self
            .history
            .selected()
            .cloned()
            .context("No recording selected for replay")?;
        let replay = EpidemicSimulation::from_recording(recording)?;
        if let Some(previous) = self.simulation.finish_recording() {
            self.history.push(previous);
        }
        self.simulation = replay;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;

    fn recording_with_ticks(final_tick: u64) -> Recording {
        let mut recorder = crate::recorder::ChangeRecorder::new(&sample_config(4));
        recorder.checkpoint(final_tick);
        recorder.finalize()
    }

    #[test]
    fn history_evicts_oldest_past_limit() {
        let mut history = RecordingHistory::new(2);
        for ticks in [10, 20, 30] {
            history.push(recording_with_ticks(ticks));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.get(0).unwrap().final_tick, 20);
        assert_eq!(history.selected().unwrap().final_tick, 30);
    }

    #[test]
    fn selection_clamps_to_newest() {
        let mut history = RecordingHistory::new(3);
        history.select_recording(Some(0));
        assert!(history.selected().is_none());

        history.push(recording_with_ticks(1));
        history.push(recording_with_ticks(2));
        history.select_recording(Some(9));
        assert_eq!(history.selected_index(), Some(1));
        history.select_recording(Some(0));
        assert_eq!(history.selected().unwrap().final_tick, 1);
        history.select_recording(None);
        assert_eq!(history.selected().unwrap().final_tick, 2);
    }

    #[test]
    fn session_replays_finished_run() {
        let mut session = SessionManager::new(sample_config(20)).unwrap();
        for _ in 0..5 {
            session.simulation_mut().step().unwrap();
        }
        assert_eq!(session.finish().unwrap().final_tick, 5);
        assert!(!session.simulation().is_recording());

        session.start_replay().unwrap();
        assert!(session.is_replaying());
        assert_eq!(session.simulation().current_tick(), 0);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn restart_archives_recording() {
        let mut session = SessionManager::new(sample_config(20)).unwrap();
        session.simulation_mut().step().unwrap();
        session.restart(sample_config(30)).unwrap();
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.simulation().agents().len(), 30);
        assert!(session.simulation().is_recording());
    }

    #[test]
    fn replay_without_selection_fails() {
        let mut session = SessionManager::new(sample_config(5)).unwrap();
        assert!(session.start_replay().is_err());
        assert!(!session.is_replaying());
    }
}
