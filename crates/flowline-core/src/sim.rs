//! Tick and publish timing.
//!
//! The engine itself has no notion of wall-clock time: [`TickScheduler`]
//! turns "run one tick" into a fixed-`dt` step, and [`Cadence`] turns elapsed
//! time into a whole number of ticks or publishes, carrying the remainder
//! forward. Hosts pick how to drive them (a timer thread, a test loop, a
//! headless run).

use crate::engine::FlowEngine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default simulation tick rate.
pub const DEFAULT_TICK_HZ: f64 = 120.0;

/// Default snapshot publish rate.
pub const DEFAULT_PUBLISH_HZ: f64 = 20.0;

/// Highest accepted rate: one period per nanosecond, the resolution of
/// [`Duration`].
pub const MAX_HZ: f64 = 1e9;

/// Cadence tolerance, relative to the period.
const CADENCE_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Rate configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateError {
    #[error("{field} must be finite and greater than zero, got {value}")]
    Invalid { field: &'static str, value: f64 },

    #[error("{field} of {value} Hz has no representable period (max {MAX_HZ} Hz)")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Check that `value` is usable as a frequency: finite, positive, and with
/// a period that fits in a [`Duration`] of at least one nanosecond.
pub fn validate_hz(field: &'static str, value: f64) -> Result<f64, RateError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RateError::Invalid { field, value });
    }
    period_of(field, value)?;
    Ok(value)
}

fn period_of(field: &'static str, hz: f64) -> Result<Duration, RateError> {
    if hz > MAX_HZ {
        return Err(RateError::OutOfRange { field, value: hz });
    }
    Duration::try_from_secs_f64(1.0 / hz).map_err(|_| RateError::OutOfRange { field, value: hz })
}

/// Tick and publish frequencies, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    pub tick_hz: f64,
    pub publish_hz: f64,
}

impl RateConfig {
    /// Build a validated configuration.
    pub fn new(tick_hz: f64, publish_hz: f64) -> Result<Self, RateError> {
        let config = Self {
            tick_hz,
            publish_hz,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RateError> {
        validate_hz("tick_hz", self.tick_hz)?;
        validate_hz("publish_hz", self.publish_hz)?;
        Ok(())
    }

    /// Simulated seconds per tick.
    pub fn tick_dt(&self) -> f64 {
        1.0 / self.tick_hz
    }

    pub fn tick_interval(&self) -> Result<Duration, RateError> {
        period_of("tick_hz", self.tick_hz)
    }

    pub fn publish_interval(&self) -> Result<Duration, RateError> {
        period_of("publish_hz", self.publish_hz)
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            publish_hz: DEFAULT_PUBLISH_HZ,
        }
    }
}

// ---------------------------------------------------------------------------
// Tick scheduler
// ---------------------------------------------------------------------------

/// Drives an engine in fixed steps of `1 / tick_hz` seconds.
///
/// `dt` never depends on how late a host timer fires. The loop generation is
/// bumped on every restart so hosts know to discard timers created for an
/// older configuration.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    tick_hz: f64,
    running: bool,
    generation: u64,
}

impl TickScheduler {
    pub fn new(tick_hz: f64) -> Result<Self, RateError> {
        Ok(Self {
            tick_hz: validate_hz("tick_hz", tick_hz)?,
            running: true,
            generation: 0,
        })
    }

    pub fn tick_hz(&self) -> f64 {
        self.tick_hz
    }

    /// Fixed step duration in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_hz
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run one step unless paused. Returns whether a step ran.
    pub fn tick(&self, engine: &mut FlowEngine) -> bool {
        if !self.running {
            return false;
        }
        engine.step(self.dt());
        true
    }

    /// Change the tick rate and restart the loop. The engine and its clock
    /// are not touched.
    pub fn reconfigure(&mut self, tick_hz: f64) -> Result<(), RateError> {
        self.tick_hz = validate_hz("tick_hz", tick_hz)?;
        self.restart();
        Ok(())
    }

    /// Bump the loop generation without changing the rate.
    pub fn restart(&mut self) {
        self.generation += 1;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn resume(&mut self) {
        self.running = true;
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            running: true,
            generation: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// Fixed-step accumulator: feed it elapsed time, get back how many whole
/// periods have passed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cadence {
    hz: f64,
    accumulator: f64,
}

impl Cadence {
    /// `hz` is expected to be validated already.
    pub fn new(hz: f64) -> Self {
        Self {
            hz,
            accumulator: 0.0,
        }
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    pub fn period(&self) -> f64 {
        1.0 / self.hz
    }

    /// Time carried over from previous calls.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Add `elapsed` seconds and return the number of periods now due.
    /// Negative or non-finite input counts as zero.
    pub fn due(&mut self, elapsed: f64) -> u64 {
        if elapsed.is_finite() && elapsed > 0.0 {
            self.accumulator += elapsed;
        }
        let period = self.period();
        let tolerance = period * CADENCE_TOLERANCE;
        let mut steps = 0;
        while self.accumulator + tolerance >= period {
            self.accumulator -= period;
            steps += 1;
        }
        self.accumulator = self.accumulator.max(0.0);
        steps
    }

    /// Drop any carried-over time.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
