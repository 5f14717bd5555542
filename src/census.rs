use contagion_common::DiseaseState;

/// Callback invoked with `(state, new_count)` after a counter changes.
pub type CensusObserver = Box<dyn FnMut(DiseaseState, u32) + Send>;

/// Incrementally maintained per-state population counters.
///
/// Counts are only ever adjusted by transitions, never recomputed by scanning agents.
/// Observers are called in registration order: first for the decremented state,
/// then for the incremented one.
pub struct PopulationCensus {
    counts: [u32; DiseaseState::COUNT],
    observers: Vec<CensusObserver>,
}

impl PopulationCensus {
    /// Every agent starts susceptible.
    pub fn new(agent_count: u32) -> Self {
        let mut counts = [0; DiseaseState::COUNT];
        counts[DiseaseState::Susceptible.index()] = agent_count;
        Self { counts, observers: Vec::new() }
    }

    pub fn subscribe(&mut self, observer: CensusObserver) {
        self.observers.push(observer);
    }

    /// Moves one agent's tally from `from` to `to`. No-op when the states match.
    pub fn record_transition(&mut self, from: DiseaseState, to: DiseaseState) {
        if from == to {
            return;
        }
        let from_count = &mut self.counts[from.index()];
        *from_count = from_count.saturating_sub(1);
        let from_count = *from_count;
        self.counts[to.index()] += 1;
        let to_count = self.counts[to.index()];

        for observer in self.observers.iter_mut() {
            observer(from, from_count);
            observer(to, to_count);
        }
    }

    pub fn count(&self, state: DiseaseState) -> u32 {
        self.counts[state.index()]
    }

    pub fn counts(&self) -> [u32; DiseaseState::COUNT] {
        self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

impl std::fmt::Debug for PopulationCensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulationCensus")
            .field("counts", &self.counts)
            .field("observers", &self.observers.len())
            .finish()
    }
}
