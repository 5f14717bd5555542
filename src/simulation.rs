use crate::agent_state::AgentState;
use crate::census::{CensusObserver, PopulationCensus};
use crate::contact::{build_tracer, precompute_draws, ContactInput, ContactTracer};
use crate::grid::SpatialGrid;
use crate::movement;
use crate::recorder::{ChangeError, ChangeRecorder, ConfigChange, Recording};
use crate::scheduler::FixedStepScheduler;
use crate::seir::SeirStateMachine;
use anyhow::{Context, Result};
use contagion_common::{CensusSnapshot, DiseaseState, DurationRange, SimParams, SimulationConfig};
use log::{debug, error, info, trace, warn};
use rand::prelude::*;
use std::path::Path;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick counter after this tick.
    pub tick: u64,
    /// Susceptible agents exposed by contact tracing.
    pub newly_exposed: u32,
    /// Timer-driven stage transitions (E->I, I->R).
    pub transitions: u32,
    /// Infectious insertions dropped because their grid cell was full.
    pub dropped_insertions: u32,
}

/// Runs the SEIR epidemic over a moving population, one fixed tick at a time.
///
/// A tick is Movement -> stage timers -> contact tracing, in that order, so contacts are
/// tested against post-movement positions and post-timer states: an agent that turns
/// infectious during a tick can already infect others in it. Configuration changes
/// only happen between ticks, through [`EpidemicSimulation::apply_change`].
pub struct EpidemicSimulation {
    /// The live configuration, including every change applied so far.
    config: SimulationConfig,
    params: SimParams,
    agents: AgentState,
    machine: SeirStateMachine,
    grid: SpatialGrid,
    tracer: Box<dyn ContactTracer>,
    scheduler: FixedStepScheduler,
    /// Host-side RNG for placement, seeding, stage timers and contact draws.
    rng: StdRng,
    current_tick: u64,
    /// Simulated seconds; sums each tick's own length.
    elapsed_seconds: f64,
    recorder: Option<ChangeRecorder>,
    /// Change log being re-applied when this simulation is a replay.
    replay: Option<Recording>,
    recorded_snapshots: Vec<CensusSnapshot>,
    last_report: TickReport,
}

impl EpidemicSimulation {
    /// Creates a simulation with the backend selected in `config.backend`.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let tracer = build_tracer(&config.backend).context("Failed to build contact tracer")?;
        Self::with_tracer(config, tracer)
    }

    /// Creates a simulation with an explicit contact-tracing backend.
    pub fn with_tracer(config: SimulationConfig, tracer: Box<dyn ContactTracer>) -> Result<Self> {
        config.validate()?;

        // The seed makes placement, seeding and every later draw reproducible.
        let mut rng = StdRng::seed_from_u64(config.initial_conditions.seed);
        let agents = AgentState::random(&config, &mut rng)?;

        let mut machine = SeirStateMachine::new(config.agents.count, config.infection.stage_durations.clone());
        for state in [DiseaseState::Exposed, DiseaseState::Infectious, DiseaseState::Recovered] {
            let count = config.initial_conditions.seed_count(state);
            if count > 0 {
                let seeded = machine.seed_count(count, state, &mut rng);
                debug!("Seeded {} agents as {}.", seeded, state);
            }
        }

        let params = config.get_sim_params();
        let grid = SpatialGrid::new(&params);
        let mut scheduler = FixedStepScheduler::new(config.timing.tick_seconds as f64);
        scheduler.set_speed_multiplier(config.timing.speed_multiplier as f64);
        scheduler.set_paused(config.timing.paused);
        let recorder = config.recording.enabled.then(|| ChangeRecorder::new(&config));

        info!(
            "Initialized {} agents on a {}x{} grid using the {} contact backend.",
            config.agents.count,
            params.grid_dim_x,
            params.grid_dim_y,
            tracer.name()
        );

        Ok(Self {
            config,
            params,
            agents,
            machine,
            grid,
            tracer,
            scheduler,
            rng,
            current_tick: 0,
            elapsed_seconds: 0.0,
            recorder,
            replay: None,
            recorded_snapshots: Vec::new(),
            last_report: TickReport::default(),
        })
    }

    /// Restarts from the configuration `recording` started with and re-applies every
    /// recorded change before the tick that follows it, tick 0 included. Recording is
    /// disabled for the replay.
    pub fn from_recording(recording: Recording) -> Result<Self> {
        let mut config = recording.initial_state.clone();
        config.recording.enabled = false;

        let mut sim = Self::new(config)?;
        info!(
            "Starting replay of {} ticks with {} recorded changes.",
            recording.final_tick,
            recording.change_count()
        );
        sim.replay = Some(recording);
        Ok(sim)
    }

    /// Advances the simulation by one tick.
    pub fn step(&mut self) -> Result<TickReport> {
        self.apply_replay_changes();

        let dt = self.params.dt;

        // --- 1. Movement ---
        movement::advance(&mut self.agents, &self.params, dt);

        // --- 2. Stage timers ---
        let transitions = self.machine.advance_timers(dt, &mut self.rng);

        // --- 3. Contact tracing ---
        let newly_exposed = self
            .infect_contacts()
            .with_context(|| format!("Contact tracing failed during tick {}", self.current_tick + 1))?;

        self.current_tick += 1;
        self.elapsed_seconds += dt as f64;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.checkpoint(self.current_tick);
        }

        self.last_report = TickReport {
            tick: self.current_tick,
            newly_exposed,
            transitions,
            dropped_insertions: self.grid.dropped_last_tick(),
        };
        trace!("Tick {:?} | census {:?}", self.last_report, self.machine.census().counts());
        Ok(self.last_report)
    }

    /// Feeds a wall-clock frame delta and runs every tick that became due.
    pub fn update(&mut self, frame_delta: f64) -> Result<Vec<TickReport>> {
        let due = self.scheduler.update(frame_delta);
        let mut reports = Vec::with_capacity(due.len());
        for _ in due {
            reports.push(self.step()?);
        }
        Ok(reports)
    }

    /// Runs exactly one tick while paused.
    pub fn single_step(&mut self) -> Result<Option<TickReport>> {
        match self.scheduler.single_step() {
            Some(_) => self.step().map(Some),
            None => Ok(None),
        }
    }

    /// Bucketing pass, host-side draws, then the backend's exposure pass.
    fn infect_contacts(&mut self) -> Result<u32> {
        self.grid.bucket(&self.agents.positions_x, &self.agents.positions_y, self.machine.states());
        let draws = precompute_draws(&self.grid, self.agents.len(), &mut self.rng);

        let input = ContactInput {
            positions_x: &self.agents.positions_x,
            positions_y: &self.agents.positions_y,
            states: self.machine.states(),
            grid: &self.grid,
            draws: &draws,
            radius_sq: self.params.radius_sq,
            base_probability: self.params.base_probability,
        };
        let exposed = self.tracer.infect_contacts(&input).map_err(|e| {
            error!("{} contact backend failed: {}", self.tracer.name(), e);
            e
        })?;

        for &agent in &exposed {
            self.machine.set_state(agent, DiseaseState::Exposed, &mut self.rng);
        }
        Ok(exposed.len() as u32)
    }

    fn apply_replay_changes(&mut self) {
        let Some(replay) = self.replay.as_ref() else {
            return;
        };
        let changes = replay.changes_at(self.current_tick).to_vec();
        for change in changes {
            if let Err(e) = self.apply_change(change) {
                warn!("Skipping recorded change at tick {}: {}", self.current_tick, e);
            }
        }
    }

    // --- Configuration surface (between ticks only) ---

    /// Validates and applies a configuration change, re-derives runtime parameters and
    /// records it at the current tick when recording is enabled.
    pub fn apply_change(&mut self, change: ConfigChange) -> Result<(), ChangeError> {
        let mut candidate = self.config.clone();
        change.apply_to(&mut candidate)?;

        if candidate.backend != self.config.backend {
            self.tracer = build_tracer(&candidate.backend).map_err(|e| ChangeError::Invalid {
                change: change.to_string(),
                reason: e.to_string(),
            })?;
            info!("Switched to the {} contact backend.", self.tracer.name());
        }

        self.config = candidate;
        self.sync_config();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(self.current_tick, change);
        }
        Ok(())
    }

    fn sync_config(&mut self) {
        let params = self.config.get_sim_params();
        if self.grid.needs_rebuild(&params) {
            self.grid.rebuild(&params);
        }
        self.params = params;
        self.machine.set_durations(self.config.infection.stage_durations.clone());
        self.scheduler.set_step_seconds(self.config.timing.tick_seconds as f64);
        self.scheduler.set_speed_multiplier(self.config.timing.speed_multiplier as f64);
        self.scheduler.set_paused(self.config.timing.paused);
    }

    pub fn set_agent_speed(&mut self, speed: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::AgentSpeed(speed))
    }

    pub fn set_world_bounds(&mut self, width: f32, height: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::WorldBounds { width, height })
    }

    pub fn set_transmission_radius(&mut self, radius: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::TransmissionRadius(radius))
    }

    pub fn set_transmission_probability(&mut self, probability: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::TransmissionProbability(probability))
    }

    pub fn set_max_agents_per_cell(&mut self, max: u32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::MaxAgentsPerCell(max))
    }

    pub fn set_stage_duration(&mut self, state: DiseaseState, min: f32, max: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::StageDuration {
            state,
            range: DurationRange::new(min, max),
        })
    }

    pub fn set_tick_seconds(&mut self, seconds: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::TickSeconds(seconds))
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f32) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::SpeedMultiplier(multiplier))
    }

    pub fn set_paused(&mut self, paused: bool) -> Result<(), ChangeError> {
        self.apply_change(ConfigChange::Paused(paused))
    }

    /// Rebuilds agents from the current configuration and starts a new recording.
    /// Returns the recording that was superseded.
    pub fn reset(&mut self) -> Result<Option<Recording>> {
        let config = self.config.clone();
        self.reset_with(config)
    }

    /// Replaces the whole configuration (agent count included) and restarts the run.
    pub fn reset_with(&mut self, config: SimulationConfig) -> Result<Option<Recording>> {
        let fresh = Self::new(config)?;
        let previous = self.finish_recording();
        *self = fresh;
        Ok(previous)
    }

    /// Loads a TOML preset and restarts from it. On failure the live configuration and
    /// run are left untouched.
    pub fn load_preset<P: AsRef<Path>>(&mut self, path: P) -> Result<Option<Recording>> {
        let config = match SimulationConfig::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring preset '{}': {}", path.as_ref().display(), e);
                return Err(e);
            }
        };
        self.reset_with(config)
    }

    pub fn save_preset<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.config.save_preset(path)
    }

    /// Detaches and returns the live recording, if recording was enabled.
    pub fn finish_recording(&mut self) -> Option<Recording> {
        self.recorder.take().map(|recorder| {
            let recording = recorder.finalize();
            info!(
                "Finalized recording: {} ticks, {} changes.",
                recording.final_tick,
                recording.change_count()
            );
            recording
        })
    }

    pub fn subscribe_census(&mut self, observer: CensusObserver) {
        self.machine.census_mut().subscribe(observer);
    }

    /// Collects the current census as a snapshot.
    pub fn record_snapshot(&mut self) {
        let positions = if self.config.output.save_positions_in_snapshot {
            Some(self.agents.positions())
        } else {
            None
        };
        let snapshot = CensusSnapshot {
            tick: self.current_tick,
            time_s: self.elapsed_seconds,
            counts: self.machine.census().counts(),
            newly_exposed: self.last_report.newly_exposed,
            dropped_insertions: self.grid.dropped_total(),
            positions,
        };
        debug!("Recording snapshot at tick {}: {:?}", snapshot.tick, snapshot.counts);
        self.recorded_snapshots.push(snapshot);
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &[CensusSnapshot] {
        &self.recorded_snapshots
    }

    // --- Read surface for renderers and tests ---

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn agents(&self) -> &AgentState {
        &self.agents
    }

    pub fn states(&self) -> &[DiseaseState] {
        self.machine.states()
    }

    pub fn state_machine(&self) -> &SeirStateMachine {
        &self.machine
    }

    pub fn census(&self) -> &PopulationCensus {
        self.machine.census()
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn backend_name(&self) -> &'static str {
        self.tracer.name()
    }

    /// Interpolation fraction between the last two ticks.
    pub fn alpha(&self) -> f64 {
        self.scheduler.alpha()
    }

    pub fn scheduler(&self) -> &FixedStepScheduler {
        &self.scheduler
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn last_report(&self) -> TickReport {
        self.last_report
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn is_replay(&self) -> bool {
        self.replay.is_some()
    }

    pub fn recorder(&self) -> Option<&ChangeRecorder> {
        self.recorder.as_ref()
    }

    pub fn summary(&self) -> Vec<(String, String)> {
        self.config.summary()
    }

    /// Current positions of all agents as (x, y) tuples.
    pub fn get_results(&self) -> Vec<(f32, f32)> {
        self.agents.positions()
    }
}

impl std::fmt::Debug for EpidemicSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpidemicSimulation")
            .field("tick", &self.current_tick)
            .field("backend", &self.tracer.name())
            .field("census", &self.machine.census().counts())
            .field("recording", &self.recorder.is_some())
            .field("replay", &self.replay.is_some())
            .finish()
    }
}
