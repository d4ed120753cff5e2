//! Pulse and Gate Generators

use crate::port::GATE_HIGH_VOLTAGE;

/// Default trigger length in seconds
pub const DEFAULT_PULSE_LENGTH: f64 = 1e-3;

/// Largest subdivision count a [`MultiGateClock`] will produce
pub const MAX_GATE_DIVISIONS: i32 = 8;

/// Fixed-length pulse generator
///
/// Retriggering while a pulse is still running extends it only if the new
/// duration is longer than what remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulseGenerator {
    remaining: f64,
}

impl PulseGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a pulse of [`DEFAULT_PULSE_LENGTH`]
    pub fn trigger(&mut self) {
        self.trigger_for(DEFAULT_PULSE_LENGTH);
    }

    pub fn trigger_for(&mut self, duration: f64) {
        if duration > self.remaining {
            self.remaining = duration;
        }
    }

    /// Advances by `delta_time` and reports whether the pulse is still high
    #[inline]
    pub fn process(&mut self, delta_time: f64) -> bool {
        if self.remaining > 0.0 {
            self.remaining -= delta_time;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.remaining = 0.0;
    }
}

/// A gate whose subdivision can be chosen at read time
///
/// `reset` arms one full period; `gate` then splits whatever remains of that
/// period into `2 * divisions` equal slots and is high on alternate slots,
/// starting high. Because the split happens on request, the division can
/// change in the middle of a period.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiGateClock {
    remaining: f64,
    full_pulse_length: f64,
}

impl MultiGateClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rearms with a new full period length
    pub fn reset(&mut self, full_pulse_length: f64) {
        self.full_pulse_length = full_pulse_length;
        self.remaining = full_pulse_length;
    }

    /// Advances by `delta_time` and reports whether the period is still running
    #[inline]
    pub fn process(&mut self, delta_time: f64) -> bool {
        if self.remaining > 0.0 {
            self.remaining -= delta_time;
            true
        } else {
            false
        }
    }

    /// Gate voltage for the requested subdivision
    ///
    /// `0` is always high, negative or above [`MAX_GATE_DIVISIONS`] is always low.
    pub fn gate(&self, divisions: i32) -> f64 {
        if divisions == 0 {
            return GATE_HIGH_VOLTAGE;
        }
        if divisions < 0 || divisions > MAX_GATE_DIVISIONS || self.remaining <= 0.0 {
            return 0.0;
        }

        let on_length = self.full_pulse_length / (2.0 * divisions as f64);
        if on_length <= 0.0 {
            return 0.0;
        }
        let slot = (self.remaining / on_length).floor() as i64;
        if slot % 2 == 1 {
            GATE_HIGH_VOLTAGE
        } else {
            0.0
        }
    }
}
