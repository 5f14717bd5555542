//! Fixed-step scheduler: turns variable wall-clock frame deltas into a
//! deterministic sequence of equally sized ticks.

/// One emitted simulation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvent {
    /// Tick counter value after this tick (1-based).
    pub tick: u64,
    pub step_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct FixedStepScheduler {
    accumulator: f64,
    step_seconds: f64,
    speed_multiplier: f64,
    paused: bool,
    tick: u64,
    alpha: f64,
}

impl FixedStepScheduler {
    pub fn new(step_seconds: f64) -> Self {
        Self {
            accumulator: 0.0,
            step_seconds: step_seconds.max(f64::EPSILON),
            speed_multiplier: 1.0,
            paused: false,
            tick: 0,
            alpha: 0.0,
        }
    }

    /// Feeds a wall-clock delta and returns every tick that became due.
    ///
    /// A slow frame drains the accumulator in a loop so no simulated time is lost.
    pub fn update(&mut self, delta: f64) -> Vec<TickEvent> {
        let mut ticks = Vec::new();
        if self.paused {
            return ticks;
        }
        if delta.is_finite() && delta > 0.0 {
            self.accumulator += delta * self.speed_multiplier;
        }
        while self.accumulator >= self.step_seconds {
            self.accumulator -= self.step_seconds;
            ticks.push(self.emit());
        }
        self.alpha = self.accumulator / self.step_seconds;
        ticks
    }

    /// Emits exactly one tick while paused. Returns `None` when running.
    pub fn single_step(&mut self) -> Option<TickEvent> {
        if self.paused {
            Some(self.emit())
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.alpha = 0.0;
        self.tick = 0;
    }

    fn emit(&mut self) -> TickEvent {
        self.tick += 1;
        TickEvent { tick: self.tick, step_seconds: self.step_seconds }
    }

    /// Sub-tick interpolation fraction in `[0, 1)` for visual smoothing.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn step_seconds(&self) -> f64 {
        self.step_seconds
    }

    pub fn set_step_seconds(&mut self, step_seconds: f64) {
        if step_seconds > 0.0 && step_seconds.is_finite() {
            self.step_seconds = step_seconds;
        } else {
            log::warn!("Ignoring non-positive tick length {}.", step_seconds);
        }
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        if multiplier >= 0.0 && multiplier.is_finite() {
            self.speed_multiplier = multiplier;
        } else {
            log::warn!("Ignoring invalid speed multiplier {}.", multiplier);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}
