//! Fixed-timestep simulation clock.
//!
//! The host calls [`SimulationLoop::frame`] once per display refresh with a
//! millisecond timestamp. Elapsed real time is clamped, added to an
//! accumulator, and consumed in whole `time_step` increments; each increment
//! runs the update phase once. Render runs exactly once per frame with the
//! leftover fraction as `render_alpha`.

use serde::{Deserialize, Serialize};

/// Tolerance for the accumulator comparison. Keeps an exact multiple of the
/// step (e.g. 60 x 1/60 s) from losing its last step to rounding.
const STEP_EPSILON: f64 = 1e-9;

/// Errors from clock construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    #[error("time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),
    #[error("max frame time must be finite and positive, got {0}")]
    InvalidMaxFrameTime(f64),
}

/// Clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Fixed simulation increment in seconds.
    pub time_step: f64,
    /// Upper bound on real time consumed by one host callback, in seconds.
    pub max_frame_time: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_step: 1.0 / 60.0,
            max_frame_time: 0.1,
        }
    }
}

impl ClockConfig {
    pub fn validate(&self) -> Result<(), ClockError> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(ClockError::InvalidTimeStep(self.time_step));
        }
        if !(self.max_frame_time.is_finite() && self.max_frame_time > 0.0) {
            return Err(ClockError::InvalidMaxFrameTime(self.max_frame_time));
        }
        Ok(())
    }
}

/// Timing record handed to the update and render phases.
///
/// Only the loop writes it; phases get a shared borrow for the duration of
/// one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    world_time: f64,
    time_step: f64,
    render_alpha: f64,
    steps: u64,
}

impl ClockState {
    fn new(time_step: f64) -> Self {
        Self {
            world_time: 0.0,
            time_step,
            render_alpha: 0.0,
            steps: 0,
        }
    }

    /// Simulated seconds since the loop started.
    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Fraction of the pending step already elapsed, in `[0, 1)`.
    pub fn render_alpha(&self) -> f64 {
        self.render_alpha
    }

    /// Number of fixed steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

/// The two phase functions driven by the loop.
pub trait FramePhases {
    type Error;

    /// Called once per consumed fixed step.
    fn update(&mut self, clock: &ClockState) -> Result<(), Self::Error>;

    /// Called exactly once per host callback, after all updates.
    fn render(&mut self, clock: &ClockState) -> Result<(), Self::Error>;
}

/// Closure pair implementing [`FramePhases`].
pub struct Phases<U, R> {
    pub update: U,
    pub render: R,
}

impl<U, R, E> FramePhases for Phases<U, R>
where
    U: FnMut(&ClockState) -> Result<(), E>,
    R: FnMut(&ClockState) -> Result<(), E>,
{
    type Error = E;

    fn update(&mut self, clock: &ClockState) -> Result<(), E> {
        (self.update)(clock)
    }

    fn render(&mut self, clock: &ClockState) -> Result<(), E> {
        (self.render)(clock)
    }
}

/// What one host callback did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Clamped real time consumed by this callback, in seconds.
    pub frame_time: f64,
    /// Update phases run.
    pub updates: u32,
    pub render_alpha: f64,
}

/// Fixed-step accumulator loop.
#[derive(Debug, Clone)]
pub struct SimulationLoop {
    clock: ClockState,
    accumulator: f64,
    max_frame_time: f64,
    last_time_ms: Option<f64>,
}

impl SimulationLoop {
    pub fn new(config: ClockConfig) -> Result<Self, ClockError> {
        config.validate()?;
        Ok(Self {
            clock: ClockState::new(config.time_step),
            accumulator: 0.0,
            max_frame_time: config.max_frame_time,
            last_time_ms: None,
        })
    }

    /// Seed the previous timestamp so the first frame measures from `now_ms`.
    pub fn start(&mut self, now_ms: f64) {
        tracing::debug!(now_ms, time_step = self.clock.time_step, "simulation loop started");
        self.last_time_ms = Some(now_ms);
    }

    pub fn is_started(&self) -> bool {
        self.last_time_ms.is_some()
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    /// Leftover real time not yet consumed by a full step.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Run one host callback.
    ///
    /// An unstarted loop is started at `now_ms` first, so its opening frame
    /// consumes no time. A timestamp earlier than the previous one counts as
    /// zero elapsed time. Errors from either phase propagate immediately;
    /// steps already taken in this frame stay taken.
    pub fn frame<P: FramePhases>(
        &mut self,
        now_ms: f64,
        phases: &mut P,
    ) -> Result<FrameStats, P::Error> {
        let last = *self.last_time_ms.get_or_insert(now_ms);
        self.last_time_ms = Some(now_ms);

        let elapsed = ((now_ms - last) / 1000.0).max(0.0);
        let frame_time = elapsed.min(self.max_frame_time);
        if elapsed > self.max_frame_time {
            tracing::trace!(elapsed, frame_time, "frame time clamped");
        }
        self.accumulator += frame_time;

        let step = self.clock.time_step;
        let mut updates = 0u32;
        while self.accumulator + STEP_EPSILON >= step {
            self.clock.world_time += step;
            self.clock.steps += 1;
            self.accumulator = (self.accumulator - step).max(0.0);
            updates += 1;
            phases.update(&self.clock)?;
        }

        self.clock.render_alpha = self.accumulator / step;
        phases.render(&self.clock)?;

        tracing::trace!(
            updates,
            world_time = self.clock.world_time,
            alpha = self.clock.render_alpha,
            "frame complete"
        );

        Ok(FrameStats {
            frame_time,
            updates,
            render_alpha: self.clock.render_alpha,
        })
    }
}
