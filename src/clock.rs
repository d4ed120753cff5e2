//! Clock Multiplication and Division
//!
//! Derives a scaled gate train from a stream of incoming clock edges, tracking
//! the measured input period so the output stays phase-continuous when the
//! tempo or the ratio changes.

/// Selectable clock ratios: negative values divide, positive values multiply
pub const CLOCK_RATIO_OPTIONS: [i32; 11] = [-16, -8, -4, -3, -2, 1, 2, 3, 4, 8, 16];

/// Shortest output gate, in seconds
const MIN_GATE_SECONDS: f64 = 0.001;

/// Display label for a clock ratio, e.g. "x 1/4" or "x 2"
pub fn ratio_label(ratio: i32) -> String {
    if ratio < 0 {
        format!("x 1/{}", -ratio)
    } else {
        format!("x {}", ratio.max(1))
    }
}

/// Snaps an arbitrary ratio onto the nearest entry of [`CLOCK_RATIO_OPTIONS`]
pub fn nearest_ratio(ratio: i64) -> i32 {
    CLOCK_RATIO_OPTIONS
        .iter()
        .copied()
        .min_by_key(|&option| (option as i64).abs_diff(ratio))
        .unwrap_or(1)
}

/// Clock multiplier/divider driven by incoming clock pulses
///
/// Before two input edges have been seen the input period is unknown and the
/// output stays low.
#[derive(Debug, Clone, Copy)]
pub struct MultDivClock {
    ratio: i32,
    seconds_since_last_clock: f64,
    input_clock_length: f64,
    divider_count: i32,
    divided_progress: f64,
}

impl MultDivClock {
    pub fn new() -> Self {
        Self::with_ratio(1)
    }

    pub fn with_ratio(ratio: i32) -> Self {
        Self {
            ratio,
            seconds_since_last_clock: -1.0,
            input_clock_length: -1.0,
            divider_count: 0,
            divided_progress: 0.0,
        }
    }

    pub fn ratio(&self) -> i32 {
        self.ratio
    }

    /// A ratio of 0 is accepted and behaves as 1
    pub fn set_ratio(&mut self, ratio: i32) {
        self.ratio = ratio;
    }

    fn division(&self) -> i32 {
        (-self.ratio).max(1)
    }

    fn multiplication(&self) -> i32 {
        self.ratio.max(1)
    }

    /// Advances by `delta_time` and returns the output gate level, 0.0 or 1.0
    pub fn process(&mut self, delta_time: f64, clock_pulse_received: bool) -> f64 {
        if clock_pulse_received {
            if self.seconds_since_last_clock > 0.0 {
                self.input_clock_length = self.seconds_since_last_clock;
            }
            self.seconds_since_last_clock = 0.0;
        }

        if self.seconds_since_last_clock < 0.0 {
            return 0.0;
        }
        self.seconds_since_last_clock += delta_time;

        let division = self.division();
        let multiplication = self.multiplication();

        if clock_pulse_received {
            if self.divider_count < 1 {
                self.divided_progress = 0.0;
            } else {
                self.divided_progress += delta_time;
            }
            self.divider_count += 1;
            if self.divider_count >= division {
                self.divider_count = 0;
            }
        } else {
            self.divided_progress += delta_time;
        }

        let divided_seconds = self.input_clock_length * division as f64;
        let multiplied_seconds = divided_seconds / multiplication as f64;
        let gate_seconds = (multiplied_seconds * 0.5).max(MIN_GATE_SECONDS);

        if self.divided_progress < divided_seconds {
            let cycles = self.divided_progress / multiplied_seconds;
            let position = (cycles - cycles.trunc()) * multiplied_seconds;
            if position <= gate_seconds {
                return 1.0;
            }
        }
        0.0
    }

    /// Period of the scaled output clock in seconds; negative until measured
    pub fn effective_clock_length(&self) -> f64 {
        self.input_clock_length * self.division() as f64 / self.multiplication() as f64
    }

    /// Last measured input period in seconds; negative until measured
    pub fn input_clock_length(&self) -> f64 {
        self.input_clock_length
    }

    /// Forgets the measured period and divider position, keeping the ratio
    pub fn reset(&mut self) {
        *self = Self::with_ratio(self.ratio);
    }
}

impl Default for MultDivClock {
    fn default() -> Self {
        Self::new()
    }
}
