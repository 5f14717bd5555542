//! Per-agent SEIR disease stages and stage timers.

use crate::census::PopulationCensus;
use contagion_common::{DiseaseState, StageDurations};
use rand::prelude::*;
use std::collections::BTreeSet;

/// Owns every agent's disease stage and remaining stage timer.
///
/// `active_timers` holds exactly the agents whose timer is strictly positive, so the
/// per-tick countdown only touches agents with a pending transition. It is ordered so
/// that expiry order, and therefore RNG consumption, is reproducible.
#[derive(Debug)]
pub struct SeirStateMachine {
    states: Vec<DiseaseState>,
    timers: Vec<f32>,
    active_timers: BTreeSet<u32>,
    durations: StageDurations,
    census: PopulationCensus,
}

impl SeirStateMachine {
    pub fn new(agent_count: u32, durations: StageDurations) -> Self {
        Self {
            states: vec![DiseaseState::Susceptible; agent_count as usize],
            timers: vec![0.0; agent_count as usize],
            active_timers: BTreeSet::new(),
            durations,
            census: PopulationCensus::new(agent_count),
        }
    }

    /// Assigns `new_state`, samples its stage timer and updates the active set and census.
    pub fn set_state<R: Rng + ?Sized>(&mut self, agent: u32, new_state: DiseaseState, rng: &mut R) {
        let idx = agent as usize;
        let Some(previous) = self.states.get(idx).copied() else {
            log::warn!("set_state on unknown agent {} (population {}).", agent, self.states.len());
            return;
        };

        let range = self.durations.range(new_state);
        let timer = if range.max > range.min {
            rng.random_range(range.min..=range.max)
        } else {
            range.min
        };

        self.states[idx] = new_state;
        self.timers[idx] = timer;
        if timer > 0.0 {
            self.active_timers.insert(agent);
        } else {
            self.active_timers.remove(&agent);
        }
        self.census.record_transition(previous, new_state);
    }

    /// Counts down active timers; agents whose timer reaches zero advance a stage.
    /// Returns the number of transitions performed.
    pub fn advance_timers<R: Rng + ?Sized>(&mut self, delta: f32, rng: &mut R) -> u32 {
        let mut expired = Vec::new();
        for &agent in &self.active_timers {
            let timer = &mut self.timers[agent as usize];
            *timer -= delta;
            if *timer <= 0.0 {
                expired.push(agent);
            }
        }

        for &agent in &expired {
            self.active_timers.remove(&agent);
            self.transition_agent(agent, rng);
        }
        expired.len() as u32
    }

    /// EXPOSED -> INFECTIOUS, INFECTIOUS -> RECOVERED; anything else is left alone.
    pub fn transition_agent<R: Rng + ?Sized>(&mut self, agent: u32, rng: &mut R) {
        let current = self.states[agent as usize];
        if let Some(next) = current.next() {
            self.set_state(agent, next, rng);
        }
    }

    /// Forces `floor(agent_count * clamp(fraction, 0, 1))` uniformly chosen agents into
    /// `target_state`.
    pub fn seed_stage<R: Rng + ?Sized>(&mut self, fraction: f32, target_state: DiseaseState, rng: &mut R) -> u32 {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let count = (self.states.len() as f64 * fraction as f64).floor() as u32;
        self.seed_count(count, target_state, rng)
    }

    /// Forces exactly `count` distinct, uniformly chosen agents into `target_state`.
    pub fn seed_count<R: Rng + ?Sized>(&mut self, count: u32, target_state: DiseaseState, rng: &mut R) -> u32 {
        let count = (count as usize).min(self.states.len());
        if count == 0 {
            return 0;
        }
        // Fisher-Yates over every index; the prefix is a uniform subset without repeats.
        let mut indices: Vec<u32> = (0..self.states.len() as u32).collect();
        indices.shuffle(rng);
        for &agent in &indices[..count] {
            self.set_state(agent, target_state, rng);
        }
        count as u32
    }

    pub fn set_durations(&mut self, durations: StageDurations) {
        self.durations = durations;
    }

    pub fn durations(&self) -> &StageDurations {
        &self.durations
    }

    #[inline(always)]
    pub fn state(&self, agent: u32) -> DiseaseState {
        self.states[agent as usize]
    }

    pub fn states(&self) -> &[DiseaseState] {
        &self.states
    }

    pub fn timer(&self, agent: u32) -> f32 {
        self.timers[agent as usize]
    }

    pub fn active_timers(&self) -> &BTreeSet<u32> {
        &self.active_timers
    }

    pub fn census(&self) -> &PopulationCensus {
        &self.census
    }

    pub fn census_mut(&mut self) -> &mut PopulationCensus {
        &mut self.census
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contagion_common::DurationRange;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn durations() -> StageDurations {
        StageDurations {
            exposed: DurationRange::new(1.0, 2.0),
            infectious: DurationRange::new(3.0, 3.0),
        }
    }

    fn assert_active_set_consistent(machine: &SeirStateMachine) {
        for agent in 0..machine.len() as u32 {
            let active = machine.active_timers().contains(&agent);
            assert_eq!(active, machine.timer(agent) > 0.0, "agent {}", agent);
        }
    }

    #[test]
    fn set_state_samples_timer_within_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut machine = SeirStateMachine::new(4, durations());
        machine.set_state(2, DiseaseState::Exposed, &mut rng);
        let timer = machine.timer(2);
        assert!((1.0..=2.0).contains(&timer));
        assert!(machine.active_timers().contains(&2));

        machine.set_state(2, DiseaseState::Recovered, &mut rng);
        assert_eq!(machine.timer(2), 0.0);
        assert!(machine.active_timers().is_empty());
        assert_eq!(machine.census().count(DiseaseState::Recovered), 1);
    }

    #[test]
    fn timers_drive_full_progression() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut machine = SeirStateMachine::new(1, durations());
        machine.set_state(0, DiseaseState::Exposed, &mut rng);

        let mut ticks = 0;
        while machine.state(0) != DiseaseState::Recovered {
            machine.advance_timers(0.5, &mut rng);
            assert_active_set_consistent(&machine);
            ticks += 1;
            assert!(ticks < 100, "agent never recovered");
        }
        // At most 2s exposed plus 3s infectious, in half-second ticks.
        assert!(ticks <= 10);
        assert!(machine.active_timers().is_empty());
    }

    #[test]
    fn transition_ignores_terminal_states() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut machine = SeirStateMachine::new(2, durations());
        machine.transition_agent(0, &mut rng);
        assert_eq!(machine.state(0), DiseaseState::Susceptible);
    }

    #[test]
    fn seed_stage_picks_distinct_agents() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut machine = SeirStateMachine::new(100, durations());
        let seeded = machine.seed_stage(0.257, DiseaseState::Infectious, &mut rng);
        assert_eq!(seeded, 25);
        assert_eq!(machine.census().count(DiseaseState::Infectious), 25);
        assert_eq!(machine.census().count(DiseaseState::Susceptible), 75);

        assert_eq!(machine.seed_stage(-3.0, DiseaseState::Exposed, &mut rng), 0);
        assert_eq!(machine.seed_stage(7.0, DiseaseState::Recovered, &mut rng), 100);
        assert_eq!(machine.census().count(DiseaseState::Recovered), 100);
    }

    #[test]
    fn seed_stage_is_not_biased_towards_low_indices() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut hits = vec![0u32; 10];
        for _ in 0..2000 {
            let mut machine = SeirStateMachine::new(10, durations());
            machine.seed_count(1, DiseaseState::Recovered, &mut rng);
            let picked: HashSet<usize> = (0..10)
                .filter(|&i| machine.state(i as u32) == DiseaseState::Recovered)
                .collect();
            assert_eq!(picked.len(), 1);
            for i in picked {
                hits[i] += 1;
            }
        }
        // Expected 200 per slot.
        assert!(hits.iter().all(|&h| (120..=280).contains(&h)), "hits = {:?}", hits);
    }

    proptest! {
        #[test]
        fn census_always_sums_to_population(
            ops in proptest::collection::vec((0u32..50, 0u32..4, 0.0f32..1.5), 1..200),
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut machine = SeirStateMachine::new(50, durations());
            for (agent, code, delta) in ops {
                let state = DiseaseState::from_code(code).unwrap();
                machine.set_state(agent, state, &mut rng);
                machine.advance_timers(delta, &mut rng);
                prop_assert_eq!(machine.census().total(), 50);
                for state in DiseaseState::ALL {
                    let scanned = machine.states().iter().filter(|&&s| s == state).count() as u32;
                    prop_assert_eq!(machine.census().count(state), scanned);
                }
            }
        }
    }
}
