//! Frame timing and the fixed-step accumulator.
//!
//! [`FixedTimestep`] turns variable frame deltas into a whole number of fixed
//! steps, catch-up style: each frame adds its (scaled) delta to an accumulator
//! and runs `floor(accumulator / step)` steps, carrying the remainder. The
//! accumulator is a `Duration`, so the arithmetic is exact integer nanoseconds
//! and no drift builds up over long runs.

use std::time::Duration;

use tracing::debug;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fixed-step accumulator.
///
/// ```
/// use std::time::Duration;
/// use tessera_engine::time::FixedTimestep;
///
/// let mut clock = FixedTimestep::new(Duration::from_millis(10));
/// assert_eq!(clock.advance(Duration::from_millis(35)), 3);
/// assert_eq!(clock.remainder(), Duration::from_millis(5));
/// assert_eq!(clock.advance(Duration::from_millis(5)), 1);
/// assert_eq!(clock.remainder(), Duration::ZERO);
/// ```
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    max_steps: Option<u32>,
}

impl FixedTimestep {
    /// Create an accumulator for `step`. A zero step is raised to one
    /// nanosecond.
    pub fn new(step: Duration) -> Self {
        Self {
            step: step.max(Duration::from_nanos(1)),
            accumulator: Duration::ZERO,
            max_steps: None,
        }
    }

    /// Cap the steps returned by a single [`advance`](Self::advance). Time
    /// beyond the cap is dropped rather than carried.
    pub fn with_max_steps(mut self, max_steps: Option<u32>) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Add `delta` and return how many fixed steps are now due.
    ///
    /// Afterwards the remainder is strictly less than one step.
    pub fn advance(&mut self, delta: Duration) -> u32 {
        self.accumulator = self.accumulator.saturating_add(delta);
        let step_nanos = self.step.as_nanos();
        let due = self.accumulator.as_nanos() / step_nanos;
        let remainder = self.accumulator.as_nanos() % step_nanos;
        // remainder < step, so both parts fit.
        self.accumulator = Duration::new(
            (remainder / NANOS_PER_SEC) as u64,
            (remainder % NANOS_PER_SEC) as u32,
        );

        let due = u32::try_from(due).unwrap_or(u32::MAX);
        match self.max_steps {
            Some(max) if due > max => {
                debug!(due, max, "fixed steps clamped, excess time dropped");
                max
            }
            _ => due,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    /// Time carried into the next frame.
    pub fn remainder(&self) -> Duration {
        self.accumulator
    }

    /// Fraction of a step carried over, in `[0, 1)`. Useful for interpolating
    /// between the last two fixed states.
    pub fn alpha(&self) -> f64 {
        self.accumulator.as_secs_f64() / self.step.as_secs_f64()
    }

    /// Drop any carried time.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

/// Timing information handed to every system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTime {
    /// Wall-clock time since the previous frame.
    pub delta: Duration,
    /// `delta` multiplied by the configured time scale.
    pub scaled_delta: Duration,
    /// Length of one fixed step.
    pub fixed_step: Duration,
    /// Fixed steps run this frame.
    pub fixed_steps: u32,
    /// Zero-based frame index.
    pub frame: u64,
}

/// `delta * scale`, saturating on overflow. A scale of exactly 1 is exact.
pub(crate) fn scale_delta(delta: Duration, scale: f64) -> Duration {
    if scale == 1.0 {
        return delta;
    }
    Duration::try_from_secs_f64(delta.as_secs_f64() * scale).unwrap_or(if scale > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
