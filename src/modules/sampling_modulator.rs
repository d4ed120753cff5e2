//! Sampling Modulator
//!
//! A clocked sample-and-hold with an 8-step on/off/reset pattern. An internal
//! square-wave clock (or an external clock) steps through the pattern; active
//! steps emit a trigger and resample the input. Every jump in the clock, trigger
//! and held outputs goes through a MinBLEP generator.

use crate::minblep::MinBlepGenerator;
use crate::port::{
    GraphModule, ParamDef, ParamId, ParamRange, PortDef, PortSpec, PortValues, SignalKind,
    GATE_HIGH_VOLTAGE,
};
use crate::pulse::PulseGenerator;
use crate::serialize::{SamplingModulatorSettings, SettingsError};
use crate::trigger::{gate_level, SchmittTrigger};
use std::fmt;

/// Number of step switches
pub const NUM_STEPS: usize = 8;

/// Frequency of the internal clock with all pitch controls at zero
const MIN_DIAL_FREQUENCY: f64 = 1.0;

/// Octaves covered by the rate knob
const RATE_OCTAVES: f64 = 16.0;

/// Peak-to-peak level of the naive square and trigger before output scaling
const NAIVE_HIGH: f64 = 2.0;

/// Port identifiers
pub mod ports {
    use crate::port::PortId;

    pub const SYNC: PortId = 0;
    pub const VOCT: PortId = 1;
    pub const HOLD: PortId = 2;
    pub const IN: PortId = 3;

    pub const CLOCK: PortId = 10;
    pub const TRIGGER: PortId = 11;
    pub const OUT: PortId = 12;
}

/// Parameter identifiers
pub mod params {
    use crate::port::ParamId;

    pub const RATE: ParamId = 0;
    pub const FINE: ParamId = 1;
    pub const CLOCK_MODE: ParamId = 2;
    /// First of [`super::NUM_STEPS`] consecutive step switches
    pub const STEP: ParamId = 3;
    pub const STEP_LAST: ParamId = STEP + super::NUM_STEPS as ParamId - 1;
}

/// State of a single step switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepState {
    /// Ends the sequence at this step
    Reset,
    /// Step is skipped: no trigger, no new sample
    Off,
    /// Step triggers and samples
    #[default]
    On,
}

impl StepState {
    /// Switch value as stored by the panel: Reset = 0, Off = 1, On = 2
    pub fn value(self) -> f64 {
        match self {
            StepState::Reset => 0.0,
            StepState::Off => 1.0,
            StepState::On => 2.0,
        }
    }

    pub fn from_value(value: f64) -> Self {
        match (ParamRange::Discrete { min: 0, max: 2 }).apply(value) as i32 {
            0 => StepState::Reset,
            1 => StepState::Off,
            _ => StepState::On,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Reset => write!(f, "Reset"),
            StepState::Off => write!(f, "Off"),
            StepState::On => write!(f, "On"),
        }
    }
}

/// Where step advances come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// The sync input is the clock
    External,
    /// The internal oscillator is the clock; sync resets its phase
    #[default]
    Internal,
}

impl ClockMode {
    pub fn value(self) -> f64 {
        match self {
            ClockMode::External => 0.0,
            ClockMode::Internal => 1.0,
        }
    }

    pub fn from_value(value: f64) -> Self {
        if (ParamRange::Discrete { min: 0, max: 1 }).apply(value) == 0.0 {
            ClockMode::External
        } else {
            ClockMode::Internal
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::External => write!(f, "External"),
            ClockMode::Internal => write!(f, "Internal"),
        }
    }
}

/// Returns `(effective, active)`: the sequence length up to the first Reset
/// step, and how many On steps lie within it
pub fn sequence_lengths(steps: &[StepState; NUM_STEPS]) -> (usize, usize) {
    let effective = steps
        .iter()
        .position(|&s| s == StepState::Reset)
        .unwrap_or(NUM_STEPS);
    let active = steps[..effective]
        .iter()
        .filter(|&&s| s == StepState::On)
        .count();
    (effective, active)
}

#[inline]
fn sub_sample_offset(crossing: f64) -> f64 {
    if crossing > -1.0 && crossing <= 0.0 {
        crossing
    } else {
        0.0
    }
}

/// Panel controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingModulatorParams {
    /// Coarse rate, 0–1 spanning 16 octaves
    pub rate: f64,
    /// Fine tune, 0–1 octave
    pub fine: f64,
    pub clock_mode: ClockMode,
    pub steps: [StepState; NUM_STEPS],
}

impl Default for SamplingModulatorParams {
    fn default() -> Self {
        Self {
            rate: 0.0,
            fine: 0.0,
            clock_mode: ClockMode::Internal,
            steps: [StepState::On; NUM_STEPS],
        }
    }
}

/// Input voltages for one sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingModulatorInputs {
    pub sync: f64,
    pub voct: f64,
    pub hold: f64,
    pub input: f64,
}

/// Output voltages and light levels for one sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingModulatorOutputs {
    pub clock: f64,
    pub trigger: f64,
    pub out: f64,
    pub step_lights: [f64; NUM_STEPS],
}

/// Stepped sample-and-hold modulator
pub struct SamplingModulator {
    pub params: SamplingModulatorParams,
    remove_dc: bool,
    sample_rate: f64,

    current_step: usize,
    effective_steps: usize,
    step_phase: f64,
    half_phase: bool,
    held_value: f64,

    // Naive levels already accounted for in the MinBLEP generators; the first
    // sample after construction or reset seeds them without a discontinuity
    square_level: Option<f64>,
    trigger_level: Option<f64>,

    trigger_generator: PulseGenerator,
    hold_detector: SchmittTrigger,
    clock_detector: SchmittTrigger,
    square_blep: MinBlepGenerator,
    trigger_blep: MinBlepGenerator,
    hold_blep: MinBlepGenerator,

    spec: PortSpec,
    param_defs: Vec<ParamDef>,
}

impl SamplingModulator {
    pub fn new(sample_rate: f64) -> Self {
        let mut param_defs = vec![
            ParamDef::new(
                params::RATE,
                "Rate",
                0.0,
                ParamRange::Linear { min: 0.0, max: 1.0 },
            ),
            ParamDef::new(
                params::FINE,
                "Fine tune",
                0.0,
                ParamRange::Linear { min: 0.0, max: 1.0 },
            ),
            ParamDef::new(
                params::CLOCK_MODE,
                "Clock",
                ClockMode::Internal.value(),
                ParamRange::Discrete { min: 0, max: 1 },
            ),
        ];
        param_defs.extend((0..NUM_STEPS).map(|i| {
            ParamDef::new(
                params::STEP + i as ParamId,
                format!("Step {}", i + 1),
                StepState::On.value(),
                ParamRange::Discrete { min: 0, max: 2 },
            )
        }));

        Self {
            params: SamplingModulatorParams::default(),
            remove_dc: true,
            sample_rate,
            current_step: 0,
            effective_steps: NUM_STEPS,
            step_phase: 0.0,
            half_phase: false,
            held_value: 0.0,
            square_level: None,
            trigger_level: None,
            trigger_generator: PulseGenerator::new(),
            hold_detector: SchmittTrigger::new(),
            clock_detector: SchmittTrigger::new(),
            square_blep: MinBlepGenerator::new(),
            trigger_blep: MinBlepGenerator::new(),
            hold_blep: MinBlepGenerator::new(),
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(ports::SYNC, "sync", SignalKind::Clock),
                    PortDef::new(ports::VOCT, "voct", SignalKind::VoltPerOctave),
                    PortDef::new(ports::HOLD, "hold", SignalKind::Gate),
                    PortDef::new(ports::IN, "in", SignalKind::CvBipolar),
                ],
                outputs: vec![
                    PortDef::new(ports::CLOCK, "clock", SignalKind::Clock),
                    PortDef::new(ports::TRIGGER, "trig", SignalKind::Trigger),
                    PortDef::new(ports::OUT, "out", SignalKind::CvBipolar),
                ],
            },
            param_defs,
        }
    }

    pub fn remove_dc(&self) -> bool {
        self.remove_dc
    }

    pub fn set_remove_dc(&mut self, remove_dc: bool) {
        log::debug!(target: "stepclock::sampling_modulator", "remove DC offset: {}", remove_dc);
        self.remove_dc = remove_dc;
    }

    pub fn settings(&self) -> SamplingModulatorSettings {
        SamplingModulatorSettings {
            remove_dc: self.remove_dc,
        }
    }

    pub fn apply_settings(&mut self, settings: &SamplingModulatorSettings) {
        self.set_remove_dc(settings.remove_dc);
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Sequence length as of the last processed sample
    pub fn effective_steps(&self) -> usize {
        self.effective_steps
    }

    pub fn held_value(&self) -> f64 {
        self.held_value
    }

    pub fn phase(&self) -> f64 {
        self.step_phase
    }

    fn sample_held_value(&mut self, input: f64, crossing: f64) {
        let delta = input - self.held_value;
        self.held_value = input;
        self.hold_blep
            .insert_discontinuity(sub_sample_offset(crossing), delta);
    }

    fn move_square(&mut self, crossing: f64, level: f64) {
        if let Some(previous) = self.square_level {
            if previous != level {
                self.square_blep
                    .insert_discontinuity(sub_sample_offset(crossing), level - previous);
            }
        }
        self.square_level = Some(level);
    }

    fn move_trigger(&mut self, crossing: f64, level: f64) {
        if let Some(previous) = self.trigger_level {
            if previous != level {
                self.trigger_blep
                    .insert_discontinuity(sub_sample_offset(crossing), level - previous);
            }
        }
        self.trigger_level = Some(level);
    }

    /// Processes one sample
    pub fn process(&mut self, inputs: &SamplingModulatorInputs) -> SamplingModulatorOutputs {
        let sample_time = 1.0 / self.sample_rate;
        let steps = self.params.steps;
        let internal = self.params.clock_mode == ClockMode::Internal;

        let (effective, active) = sequence_lengths(&steps);
        self.effective_steps = effective;
        let length = effective.max(1);
        if self.current_step >= length {
            self.current_step %= length;
        }

        let mut advance_step = false;
        if self.clock_detector.process(gate_level(inputs.sync)) {
            advance_step = true;
            if internal {
                self.step_phase = 0.0;
                self.half_phase = false;
            }
        }

        if self.hold_detector.process(gate_level(inputs.hold)) {
            self.sample_held_value(inputs.input, 0.0);
        }

        let pitch = RATE_OCTAVES * self.params.rate + self.params.fine + inputs.voct;
        let frequency = ParamRange::VoltPerOctave {
            base_freq: MIN_DIAL_FREQUENCY,
        }
        .apply(pitch);

        let old_phase = self.step_phase;
        let delta_phase = (sample_time * frequency).clamp(1e-6, 0.5);
        self.step_phase += delta_phase;

        if !self.half_phase && self.step_phase >= 0.5 {
            let crossing = -(self.step_phase - 0.5) / delta_phase;
            self.move_square(crossing, 0.0);
            self.move_trigger(crossing, 0.0);
            self.half_phase = true;
        }

        if self.step_phase >= 1.0 {
            self.step_phase -= 1.0;
            let crossing = -self.step_phase / delta_phase;
            self.move_square(crossing, NAIVE_HIGH);
            self.half_phase = false;
            if internal {
                advance_step = true;
            }
        }

        if advance_step {
            self.current_step = (self.current_step + 1) % length;

            if steps[self.current_step] == StepState::On {
                let crossing = -(old_phase + delta_phase - 1.0) / delta_phase;
                let level = if self.step_phase < 0.5 { NAIVE_HIGH } else { 0.0 };
                self.move_trigger(crossing, level);
                self.trigger_generator.trigger();
                if !self.hold_detector.is_high() {
                    self.sample_held_value(inputs.input, crossing);
                }
            }
        }

        // Anything not covered by a timed crossing (sync resets, switch changes)
        // lands at the start of this sample
        let first_half = self.step_phase < 0.5;
        let naive_square = if first_half { NAIVE_HIGH } else { 0.0 };
        let naive_trigger = if first_half && steps[self.current_step] == StepState::On {
            NAIVE_HIGH
        } else {
            0.0
        };
        self.move_square(0.0, naive_square);
        self.move_trigger(0.0, naive_trigger);

        let out = self.held_value + self.hold_blep.process();
        let mut square = naive_square + self.square_blep.process();
        let mut trigger = naive_trigger + self.trigger_blep.process();

        if self.remove_dc {
            square -= 1.0;
            trigger -= 1.0;
            if effective > 0 {
                trigger += (effective - active) as f64 / effective as f64;
            }
        }

        let pulse_high = self.trigger_generator.process(sample_time);
        let trigger_out = if internal {
            5.0 * trigger
        } else if pulse_high {
            GATE_HIGH_VOLTAGE
        } else {
            0.0
        };

        let mut step_lights = [0.0; NUM_STEPS];
        step_lights[self.current_step] = 1.0;

        SamplingModulatorOutputs {
            clock: 5.0 * square,
            trigger: trigger_out,
            out,
            step_lights,
        }
    }
}

impl Default for SamplingModulator {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl GraphModule for SamplingModulator {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let result = self.process(&SamplingModulatorInputs {
            sync: inputs.get_or(ports::SYNC, 0.0),
            voct: inputs.get_or(ports::VOCT, 0.0),
            hold: inputs.get_or(ports::HOLD, 0.0),
            input: inputs.get_or(ports::IN, 0.0),
        });

        outputs.set(ports::CLOCK, result.clock);
        outputs.set(ports::TRIGGER, result.trigger);
        outputs.set(ports::OUT, result.out);
    }

    fn reset(&mut self) {
        self.current_step = 0;
        self.step_phase = 0.0;
        self.half_phase = false;
        self.held_value = 0.0;
        self.square_level = None;
        self.trigger_level = None;
        self.trigger_generator.reset();
        self.hold_detector.reset();
        self.clock_detector.reset();
        self.square_blep.reset();
        self.trigger_blep.reset();
        self.hold_blep.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn params(&self) -> &[ParamDef] {
        &self.param_defs
    }

    fn get_param(&self, id: ParamId) -> Option<f64> {
        match id {
            params::RATE => Some(self.params.rate),
            params::FINE => Some(self.params.fine),
            params::CLOCK_MODE => Some(self.params.clock_mode.value()),
            params::STEP..=params::STEP_LAST => {
                Some(self.params.steps[(id - params::STEP) as usize].value())
            }
            _ => None,
        }
    }

    fn set_param(&mut self, id: ParamId, value: f64) {
        match id {
            params::RATE => self.params.rate = value.clamp(0.0, 1.0),
            params::FINE => self.params.fine = value.clamp(0.0, 1.0),
            params::CLOCK_MODE => self.params.clock_mode = ClockMode::from_value(value),
            params::STEP..=params::STEP_LAST => {
                self.params.steps[(id - params::STEP) as usize] = StepState::from_value(value)
            }
            _ => {}
        }
    }

    fn param_display(&self, id: ParamId) -> Option<String> {
        match id {
            params::CLOCK_MODE => Some(self.params.clock_mode.to_string()),
            params::STEP..=params::STEP_LAST => {
                Some(self.params.steps[(id - params::STEP) as usize].to_string())
            }
            _ => None,
        }
    }

    fn type_id(&self) -> &'static str {
        "sampling_modulator"
    }

    fn serialize_state(&self) -> Option<serde_json::Value> {
        self.settings().to_value().ok()
    }

    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<(), SettingsError> {
        let settings = SamplingModulatorSettings::from_value(state)?;
        self.apply_settings(&settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minblep::BUFFER_LEN;
    use approx::assert_abs_diff_eq;

    const SAMPLE_RATE: f64 = 1000.0;

    fn steps(pattern: &[StepState; NUM_STEPS]) -> SamplingModulator {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.steps = *pattern;
        module
    }

    /// Rate knob value giving `hz` with fine and V/Oct at zero
    fn rate_for(hz: f64) -> f64 {
        hz.log2() / RATE_OCTAVES
    }

    use StepState::{Off, On, Reset};

    #[test]
    fn test_sequence_lengths() {
        assert_eq!(sequence_lengths(&[On; NUM_STEPS]), (8, 8));
        assert_eq!(
            sequence_lengths(&[On, On, Reset, On, On, On, On, On]),
            (2, 2)
        );
        assert_eq!(
            sequence_lengths(&[On, Off, On, Off, Reset, On, Reset, On]),
            (4, 2)
        );
        assert_eq!(sequence_lengths(&[Reset; NUM_STEPS]), (0, 0));
    }

    #[test]
    fn test_first_off_step_starts_silent() {
        let mut module = steps(&[Off, On, On, On, On, On, On, On]);
        module.set_remove_dc(false);
        let inputs = SamplingModulatorInputs::default();

        for _ in 0..2 {
            for _ in 0..4 * BUFFER_LEN {
                let out = module.process(&inputs);
                assert_eq!(module.current_step(), 0);
                assert_abs_diff_eq!(out.trigger, 0.0, epsilon = 1e-9);
                assert_abs_diff_eq!(out.clock, 10.0, epsilon = 1e-9);
            }
            module.reset();
        }
    }

    #[test]
    fn test_step_display_strings() {
        assert_eq!(Reset.to_string(), "Reset");
        assert_eq!(Off.to_string(), "Off");
        assert_eq!(On.to_string(), "On");
        assert_eq!(ClockMode::External.to_string(), "External");

        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.set_param(params::STEP + 3, 0.0);
        assert_eq!(module.param_display(params::STEP + 3).as_deref(), Some("Reset"));
        assert_eq!(module.param_display(params::CLOCK_MODE).as_deref(), Some("Internal"));
        assert_eq!(module.param_display(params::RATE), None);
    }

    #[test]
    fn test_reset_step_truncates_sequence() {
        let mut module = steps(&[On, On, Reset, On, On, On, On, On]);
        module.params.rate = rate_for(50.0);
        let inputs = SamplingModulatorInputs::default();

        let mut visited = [false; NUM_STEPS];
        for _ in 0..2000 {
            module.process(&inputs);
            assert!(module.current_step() < 2);
            visited[module.current_step()] = true;
        }
        assert_eq!(module.effective_steps(), 2);
        assert!(visited[0] && visited[1]);
    }

    #[test]
    fn test_all_reset_clamps_to_single_step() {
        let mut module = steps(&[Reset; NUM_STEPS]);
        module.params.rate = rate_for(100.0);
        let inputs = SamplingModulatorInputs::default();
        for _ in 0..500 {
            let out = module.process(&inputs);
            assert_eq!(module.current_step(), 0);
            assert!(out.trigger.is_finite());
            assert!(out.clock.is_finite());
        }
    }

    #[test]
    fn test_shrinking_sequence_wraps_current_step() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(100.0);
        let inputs = SamplingModulatorInputs::default();
        while module.current_step() != 5 {
            module.process(&inputs);
        }
        module.params.steps[3] = Reset;
        module.process(&inputs);
        assert!(module.current_step() < 3);
    }

    #[test]
    fn test_internal_clock_frequency() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(10.0);
        let inputs = SamplingModulatorInputs::default();

        let mut advances = 0;
        let mut last = module.current_step();
        for _ in 0..1000 {
            module.process(&inputs);
            if module.current_step() != last {
                advances += 1;
                last = module.current_step();
            }
        }
        assert!((9..=10).contains(&advances), "advances: {}", advances);
    }

    #[test]
    fn test_voct_doubles_rate() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(10.0);
        let inputs = SamplingModulatorInputs {
            voct: 1.0,
            ..Default::default()
        };
        let mut advances = 0;
        let mut last = module.current_step();
        for _ in 0..1000 {
            module.process(&inputs);
            if module.current_step() != last {
                advances += 1;
                last = module.current_step();
            }
        }
        assert!((19..=20).contains(&advances), "advances: {}", advances);
    }

    #[test]
    fn test_square_output_levels() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(5.0);
        let inputs = SamplingModulatorInputs::default();

        let clock: Vec<f64> = (0..1000).map(|_| module.process(&inputs).clock).collect();
        // Away from the edges the band-limited square sits at ±5V
        assert_abs_diff_eq!(clock[50], 5.0, epsilon = 1e-3);
        assert_abs_diff_eq!(clock[150], -5.0, epsilon = 1e-3);
        let mean = clock.iter().sum::<f64>() / clock.len() as f64;
        assert!(mean.abs() < 0.5, "mean {}", mean);
    }

    #[test]
    fn test_square_without_dc_removal() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.set_remove_dc(false);
        module.params.rate = rate_for(5.0);
        let inputs = SamplingModulatorInputs::default();
        let clock: Vec<f64> = (0..200).map(|_| module.process(&inputs).clock).collect();
        assert_abs_diff_eq!(clock[50], 10.0, epsilon = 1e-3);
        assert_abs_diff_eq!(clock[150], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_trigger_skips_off_steps() {
        let mut module = steps(&[On, Off, On, Off, On, Off, On, Off]);
        module.set_remove_dc(false);
        module.params.rate = rate_for(5.0);
        let inputs = SamplingModulatorInputs::default();

        // 200 samples per step: look at the middle of each first half
        let mut seen = [false; 2];
        for _ in 0..8 {
            let mut frame = SamplingModulatorOutputs::default();
            let mut step = 0;
            for i in 0..200 {
                let out = module.process(&inputs);
                if i == 50 {
                    frame = out;
                    step = module.current_step();
                }
            }
            let on = module.params.steps[step] == On;
            seen[on as usize] = true;
            let expected = if on { 10.0 } else { 0.0 };
            assert_abs_diff_eq!(frame.trigger, expected, epsilon = 1e-3);
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn test_dc_compensation_tracks_duty_cycle() {
        let mut module = steps(&[On, Off, Off, Off, Reset, On, On, On]);
        module.params.rate = rate_for(5.0);
        let inputs = SamplingModulatorInputs::default();

        // Off-step first half: naive 0, minus 1, plus (4 - 1) / 4
        let mut off_level = None;
        for i in 0..800 {
            let out = module.process(&inputs);
            if module.current_step() == 2 && i % 200 == 50 {
                off_level = Some(out.trigger);
            }
        }
        let level = off_level.unwrap_or(f64::NAN);
        assert_abs_diff_eq!(level, 5.0 * (-1.0 + 0.75), epsilon = 1e-3);
    }

    #[test]
    fn test_held_value_sampled_on_active_steps() {
        let mut module = steps(&[On, Off, On, On, On, On, On, On]);
        module.params.rate = rate_for(5.0);
        let mut inputs = SamplingModulatorInputs {
            input: 1.0,
            ..Default::default()
        };

        // Run into step 1 (Off): value from step 0 must be held
        while module.current_step() != 1 {
            module.process(&inputs);
        }
        let held_at_off = module.held_value();
        inputs.input = 3.0;
        for _ in 0..100 {
            module.process(&inputs);
        }
        assert_eq!(module.current_step(), 1);
        assert_eq!(module.held_value(), held_at_off);

        while module.current_step() != 2 {
            module.process(&inputs);
        }
        assert_eq!(module.held_value(), 3.0);
        for _ in 0..BUFFER_LEN {
            module.process(&inputs);
        }
        let out = module.process(&inputs).out;
        assert_abs_diff_eq!(out, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_held_step_is_band_limited() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(5.0);
        let mut inputs = SamplingModulatorInputs::default();
        for _ in 0..150 {
            module.process(&inputs);
        }
        inputs.input = 4.0;
        while module.held_value() == 0.0 {
            let out = module.process(&inputs).out;
            if module.held_value() != 0.0 {
                // The jump to 4V is spread over the following samples
                assert!(out < 2.0, "out {}", out);
            }
        }
        for _ in 0..BUFFER_LEN {
            module.process(&inputs);
        }
        assert_abs_diff_eq!(module.process(&inputs).out, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hold_input_samples_immediately_and_blocks_steps() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(20.0);
        let mut inputs = SamplingModulatorInputs {
            input: 2.0,
            ..Default::default()
        };
        module.process(&inputs);

        inputs.hold = 10.0;
        module.process(&inputs);
        assert_eq!(module.held_value(), 2.0);

        // While hold stays high, step advances don't resample
        inputs.input = -3.0;
        for _ in 0..300 {
            module.process(&inputs);
        }
        assert_eq!(module.held_value(), 2.0);

        inputs.hold = 0.0;
        for _ in 0..300 {
            module.process(&inputs);
        }
        assert_eq!(module.held_value(), -3.0);
    }

    #[test]
    fn test_external_clock_advances_on_sync_edges() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.clock_mode = ClockMode::External;
        module.params.rate = rate_for(100.0);
        let mut inputs = SamplingModulatorInputs::default();

        // The free-running oscillator alone must not advance
        for _ in 0..200 {
            module.process(&inputs);
        }
        assert_eq!(module.current_step(), 0);

        let mut trigger_samples = 0;
        for edge in 1..=3 {
            inputs.sync = 10.0;
            let out = module.process(&inputs);
            assert_eq!(module.current_step(), edge);
            assert_eq!(out.trigger, GATE_HIGH_VOLTAGE);
            inputs.sync = 0.0;
            for _ in 0..20 {
                if module.process(&inputs).trigger > 0.0 {
                    trigger_samples += 1;
                }
            }
        }
        // 1ms pulse at 1kHz: at most one extra sample each
        assert!(trigger_samples <= 3);
    }

    #[test]
    fn test_internal_sync_resets_phase_and_advances() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(2.0);
        let mut inputs = SamplingModulatorInputs::default();
        for _ in 0..100 {
            module.process(&inputs);
        }
        assert!(module.phase() > 0.1);

        inputs.sync = 5.0;
        module.process(&inputs);
        assert_eq!(module.current_step(), 1);
        assert!(module.phase() < 0.01);
    }

    #[test]
    fn test_step_lights_follow_current_step() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.params.rate = rate_for(50.0);
        let inputs = SamplingModulatorInputs::default();
        for _ in 0..300 {
            let out = module.process(&inputs);
            let lit: Vec<usize> = (0..NUM_STEPS).filter(|&i| out.step_lights[i] > 0.0).collect();
            assert_eq!(lit, vec![module.current_step()]);
        }
    }

    #[test]
    fn test_graph_module_tick_and_state() {
        let mut module = SamplingModulator::new(SAMPLE_RATE);
        module.set_param(params::RATE, rate_for(5.0));
        let mut inputs = PortValues::new();
        let mut outputs = PortValues::new();
        inputs.set(ports::IN, 1.5);

        for _ in 0..50 {
            module.tick(&inputs, &mut outputs);
        }
        assert!(outputs.get(ports::CLOCK).is_some());
        assert!(outputs.get(ports::TRIGGER).is_some());
        assert!((outputs.get(ports::CLOCK).unwrap_or(0.0) - 5.0).abs() < 1e-3);

        module.set_remove_dc(false);
        let state = module.serialize_state();
        assert!(state.is_some());

        let mut restored = SamplingModulator::new(SAMPLE_RATE);
        if let Some(state) = state {
            assert!(restored.deserialize_state(&state).is_ok());
        }
        assert!(!restored.remove_dc());
        assert_eq!(restored.type_id(), "sampling_modulator");
        assert_eq!(restored.params().len(), 3 + NUM_STEPS);
    }
}
