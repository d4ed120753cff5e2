//! Edge Detection
//!
//! Hysteresis-based rising edge detection for control signals, plus a plain
//! boolean edge detector for buttons and switches.

use crate::port::{GATE_HIGH_THRESHOLD, GATE_LOW_THRESHOLD};

/// Linearly maps `x` from the range `[x_min, x_max]` to `[y_min, y_max]`
#[inline]
pub fn rescale(x: f64, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> f64 {
    y_min + (x - x_min) / (x_max - x_min) * (y_max - y_min)
}

/// Maps a gate voltage so that 0.1V reads as 0 and 2V reads as 1
#[inline]
pub fn gate_level(voltage: f64) -> f64 {
    rescale(voltage, GATE_LOW_THRESHOLD, GATE_HIGH_THRESHOLD, 0.0, 1.0)
}

/// Schmitt trigger with hysteresis
///
/// Expects its input pre-scaled so the low threshold sits at 0 and the high
/// threshold at 1 (see [`gate_level`]). Starts in the high state, so a signal
/// that is already high when processing begins does not fire.
#[derive(Debug, Clone, Copy)]
pub struct SchmittTrigger {
    high: bool,
    low_threshold: f64,
    high_threshold: f64,
}

impl SchmittTrigger {
    pub fn new() -> Self {
        Self::with_thresholds(0.0, 1.0)
    }

    pub fn with_thresholds(low_threshold: f64, high_threshold: f64) -> Self {
        Self {
            high: true,
            low_threshold,
            high_threshold,
        }
    }

    /// Returns true exactly on the sample the input rises through the high threshold
    #[inline]
    pub fn process(&mut self, input: f64) -> bool {
        if self.high {
            if input <= self.low_threshold {
                self.high = false;
            }
        } else if input >= self.high_threshold {
            self.high = true;
            return true;
        }
        false
    }

    pub fn is_high(&self) -> bool {
        self.high
    }

    pub fn reset(&mut self) {
        self.high = true;
    }
}

impl Default for SchmittTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires once when a boolean goes from false to true
#[derive(Debug, Clone, Copy)]
pub struct BooleanTrigger {
    state: bool,
}

impl BooleanTrigger {
    pub fn new() -> Self {
        Self { state: true }
    }

    #[inline]
    pub fn process(&mut self, state: bool) -> bool {
        let triggered = state && !self.state;
        self.state = state;
        triggered
    }

    pub fn reset(&mut self) {
        self.state = true;
    }
}

impl Default for BooleanTrigger {
    fn default() -> Self {
        Self::new()
    }
}
