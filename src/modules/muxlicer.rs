//! Muxlicer
//!
//! An 8-step sequential switch. A clock (external, or an internal one set by
//! tap tempo) is multiplied or divided and walks an address through eight
//! steps. The active step gets a gate, optionally subdivided into 1–8 pulses,
//! and either receives the common input scaled by its level slider
//! (1-in-8-out) or routes its own input to the common output (8-in-1-out).
//!
//! Play state is driven by a three-position momentary switch and a reset
//! input; a second clock engine derives an independent output clock.

use crate::clock::{nearest_ratio, ratio_label, MultDivClock};
use crate::io::{ExpanderLink, ExpanderMessage};
use crate::port::{
    GraphModule, ParamDef, ParamId, ParamRange, PortDef, PortId, PortSpec, PortValues, SignalKind,
    GATE_HIGH_VOLTAGE,
};
use crate::pulse::{MultiGateClock, PulseGenerator};
use crate::serialize::{MuxlicerSettings, SettingsError};
use crate::trigger::{gate_level, rescale, BooleanTrigger, SchmittTrigger};
use std::fmt;
use std::sync::Arc;

/// Number of steps in the sequence
pub const SEQUENCE_LENGTH: usize = 8;

/// Gate modes reachable in quadratic-only mode
pub const QUADRATIC_GATE_MODES: [i32; 5] = [-1, 1, 2, 4, 8];

/// Voltages the unpatched "all" input can be normalled to
pub const ALL_IN_NORMAL_OPTIONS: [i32; 3] = [1, 5, 10];

/// Taps further apart than this don't set the tempo
const MAX_TAP_INTERVAL: f64 = 2.0;

const DEFAULT_INTERNAL_CLOCK_LENGTH: f64 = 0.25;

const END_OF_CYCLE_PULSE_LENGTH: f64 = 1e-3;

const MIN_GATE_MODE: f64 = -1.0;
const MAX_GATE_MODE: f64 = 8.0;

/// Port identifiers
pub mod ports {
    use super::SEQUENCE_LENGTH;
    use crate::port::PortId;

    pub const GATE_MODE_CV: PortId = 0;
    pub const ADDRESS_CV: PortId = 1;
    pub const CLOCK: PortId = 2;
    pub const RESET: PortId = 3;
    pub const COM_IN: PortId = 4;
    /// First of [`SEQUENCE_LENGTH`] consecutive per-step inputs
    pub const MUX_IN: PortId = 5;
    pub const ALL_IN: PortId = MUX_IN + SEQUENCE_LENGTH as PortId;

    pub const CLOCK_OUT: PortId = 20;
    pub const ALL_GATES: PortId = 21;
    pub const END_OF_CYCLE: PortId = 22;
    /// First of [`SEQUENCE_LENGTH`] consecutive gate outputs
    pub const GATE: PortId = 23;
    /// First of [`SEQUENCE_LENGTH`] consecutive per-step outputs
    pub const MUX_OUT: PortId = GATE + SEQUENCE_LENGTH as PortId;
    pub const COM_OUT: PortId = MUX_OUT + SEQUENCE_LENGTH as PortId;
}

/// Parameter identifiers
pub mod params {
    use super::SEQUENCE_LENGTH;
    use crate::port::ParamId;

    pub const PLAY: ParamId = 0;
    pub const ADDRESS: ParamId = 1;
    pub const GATE_MODE: ParamId = 2;
    pub const TAP_TEMPO: ParamId = 3;
    /// First of [`SEQUENCE_LENGTH`] consecutive level sliders
    pub const LEVEL: ParamId = 4;
    pub const LEVEL_LAST: ParamId = LEVEL + SEQUENCE_LENGTH as ParamId - 1;
}

/// Sequencer run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    /// Runs one full pass, then stops
    PlayOnce,
    #[default]
    Stopped,
    Playing,
}

impl PlayState {
    /// Persisted index: PlayOnce = 0, Stopped = 1, Playing = 2
    pub fn index(self) -> i64 {
        match self {
            PlayState::PlayOnce => 0,
            PlayState::Stopped => 1,
            PlayState::Playing => 2,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(PlayState::PlayOnce),
            1 => Some(PlayState::Stopped),
            2 => Some(PlayState::Playing),
            _ => None,
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::PlayOnce => write!(f, "Play once"),
            PlayState::Stopped => write!(f, "Stopped"),
            PlayState::Playing => write!(f, "Playing"),
        }
    }
}

/// Position of the momentary play switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaySwitch {
    /// Bottom: start one pass from the first step, or restart the pass
    PlayOnce,
    #[default]
    Neutral,
    /// Top: toggle between playing and stopped
    Play,
}

impl PlaySwitch {
    pub fn value(self) -> f64 {
        match self {
            PlaySwitch::PlayOnce => 0.0,
            PlaySwitch::Neutral => 1.0,
            PlaySwitch::Play => 2.0,
        }
    }

    pub fn from_value(value: f64) -> Self {
        match (ParamRange::Discrete { min: 0, max: 2 }).apply(value) as i32 {
            0 => PlaySwitch::PlayOnce,
            1 => PlaySwitch::Neutral,
            _ => PlaySwitch::Play,
        }
    }
}

impl fmt::Display for PlaySwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaySwitch::PlayOnce => write!(f, "Play once / reset"),
            PlaySwitch::Neutral => write!(f, "Neutral"),
            PlaySwitch::Play => write!(f, "Play / stop"),
        }
    }
}

/// Signal routing through the multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// COM input is distributed to the per-step outputs
    #[default]
    OneInEightOut,
    /// Per-step inputs are collected into the COM output
    EightInOneOut,
}

impl IoMode {
    /// Persisted index: OneInEightOut = 0, EightInOneOut = 1
    pub fn index(self) -> i64 {
        match self {
            IoMode::OneInEightOut => 0,
            IoMode::EightInOneOut => 1,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(IoMode::OneInEightOut),
            1 => Some(IoMode::EightInOneOut),
            _ => None,
        }
    }

    /// Input ports read in this mode (besides the control inputs)
    pub fn active_inputs(self) -> Vec<PortId> {
        match self {
            IoMode::OneInEightOut => vec![ports::COM_IN],
            IoMode::EightInOneOut => (0..SEQUENCE_LENGTH as PortId)
                .map(|i| ports::MUX_IN + i)
                .chain(std::iter::once(ports::ALL_IN))
                .collect(),
        }
    }

    /// Output ports written in this mode (besides gates and clocks)
    pub fn active_outputs(self) -> Vec<PortId> {
        match self {
            IoMode::OneInEightOut => (0..SEQUENCE_LENGTH as PortId)
                .map(|i| ports::MUX_OUT + i)
                .collect(),
            IoMode::EightInOneOut => vec![ports::COM_OUT],
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::OneInEightOut => write!(f, "1 in 8 out"),
            IoMode::EightInOneOut => write!(f, "8 in 1 out"),
        }
    }
}

/// Display label for a gate mode
pub fn gate_mode_label(mode: i32) -> String {
    match mode {
        m if m < 0 => "No gate".to_string(),
        0 => "Full gate".to_string(),
        1 => "Half gate".to_string(),
        m => format!("{} gates", m),
    }
}

/// Snaps a voltage onto the nearest of [`ALL_IN_NORMAL_OPTIONS`]
pub fn nearest_normal_voltage(voltage: i64) -> i32 {
    ALL_IN_NORMAL_OPTIONS
        .iter()
        .copied()
        .min_by_key(|&option| (option as i64).abs_diff(voltage))
        .unwrap_or(10)
}

/// Panel controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxlicerParams {
    pub play_switch: PlaySwitch,
    /// -1…7; below 0 the clock drives the address
    pub address: f64,
    /// -1…8
    pub gate_mode: f64,
    pub tap_tempo: bool,
    /// 0…1 per step
    pub levels: [f64; SEQUENCE_LENGTH],
}

impl Default for MuxlicerParams {
    fn default() -> Self {
        Self {
            play_switch: PlaySwitch::Neutral,
            address: -1.0,
            gate_mode: 0.0,
            tap_tempo: false,
            levels: [1.0; SEQUENCE_LENGTH],
        }
    }
}

/// Input voltages for one sample; `None` marks an unpatched jack
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MuxlicerInputs {
    pub gate_mode_cv: Option<f64>,
    pub address_cv: f64,
    pub clock: Option<f64>,
    pub reset: f64,
    pub com: f64,
    pub mux: [Option<f64>; SEQUENCE_LENGTH],
    pub all: Option<f64>,
}

/// Output voltages and light levels for one sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MuxlicerOutputs {
    pub clock: f64,
    pub all_gates: f64,
    pub end_of_cycle: f64,
    pub gates: [f64; SEQUENCE_LENGTH],
    pub mux: [f64; SEQUENCE_LENGTH],
    pub com: f64,
    pub clock_light: f64,
    pub gate_lights: [f64; SEQUENCE_LENGTH],
}

/// 8-step sequential switch with clock multiplication and subdivided gates
pub struct Muxlicer {
    pub params: MuxlicerParams,
    sample_rate: f64,

    play_state: PlayState,
    io_mode: IoMode,
    quadratic_gates_only: bool,
    all_in_normal_voltage: i32,

    run_index: usize,
    address_index: usize,
    reset_pending: bool,

    internal_clock_progress: f64,
    internal_clock_length: f64,
    tap_time: f64,

    play_state_trigger: BooleanTrigger,
    tap_tempo_trigger: BooleanTrigger,
    input_clock_detector: SchmittTrigger,
    main_clock_detector: SchmittTrigger,
    reset_detector: SchmittTrigger,

    end_of_cycle: PulseGenerator,
    main_clock: MultDivClock,
    output_clock: MultDivClock,
    multi_gate: MultiGateClock,

    expander: Option<Arc<ExpanderLink>>,

    spec: PortSpec,
    param_defs: Vec<ParamDef>,
}

impl Muxlicer {
    pub fn new(sample_rate: f64) -> Self {
        let mut inputs = vec![
            PortDef::new(ports::GATE_MODE_CV, "gate_mode_cv", SignalKind::CvUnipolar),
            PortDef::new(ports::ADDRESS_CV, "address_cv", SignalKind::CvBipolar),
            PortDef::new(ports::CLOCK, "clock", SignalKind::Clock),
            PortDef::new(ports::RESET, "reset", SignalKind::Trigger),
            PortDef::new(ports::COM_IN, "com", SignalKind::CvBipolar),
        ];
        inputs.extend((0..SEQUENCE_LENGTH).map(|i| {
            PortDef::new(
                ports::MUX_IN + i as PortId,
                format!("mux_{}", i + 1),
                SignalKind::CvBipolar,
            )
            .normalled_to(ports::ALL_IN)
        }));
        inputs.push(
            PortDef::new(ports::ALL_IN, "all", SignalKind::CvBipolar).with_default(10.0),
        );

        let mut outputs = vec![
            PortDef::new(ports::CLOCK_OUT, "clock", SignalKind::Clock),
            PortDef::new(ports::ALL_GATES, "all_gates", SignalKind::Gate),
            PortDef::new(ports::END_OF_CYCLE, "eoc", SignalKind::Trigger),
        ];
        outputs.extend((0..SEQUENCE_LENGTH).map(|i| {
            PortDef::new(
                ports::GATE + i as PortId,
                format!("gate_{}", i + 1),
                SignalKind::Gate,
            )
        }));
        outputs.extend((0..SEQUENCE_LENGTH).map(|i| {
            PortDef::new(
                ports::MUX_OUT + i as PortId,
                format!("mux_{}", i + 1),
                SignalKind::CvBipolar,
            )
        }));
        outputs.push(PortDef::new(ports::COM_OUT, "com", SignalKind::CvBipolar));

        let mut param_defs = vec![
            ParamDef::new(
                params::PLAY,
                "Play switch",
                PlaySwitch::Neutral.value(),
                ParamRange::Discrete { min: 0, max: 2 },
            ),
            ParamDef::new(
                params::ADDRESS,
                "Address",
                -1.0,
                ParamRange::Linear { min: -1.0, max: 7.0 },
            ),
            ParamDef::new(
                params::GATE_MODE,
                "Gate mode",
                0.0,
                ParamRange::Linear {
                    min: MIN_GATE_MODE,
                    max: MAX_GATE_MODE,
                },
            ),
            ParamDef::new(
                params::TAP_TEMPO,
                "Tap tempo",
                0.0,
                ParamRange::Discrete { min: 0, max: 1 },
            ),
        ];
        param_defs.extend((0..SEQUENCE_LENGTH).map(|i| {
            ParamDef::new(
                params::LEVEL + i as ParamId,
                format!("Slider {}", i + 1),
                1.0,
                ParamRange::Linear { min: 0.0, max: 1.0 },
            )
        }));

        Self {
            params: MuxlicerParams::default(),
            sample_rate,
            play_state: PlayState::Stopped,
            io_mode: IoMode::OneInEightOut,
            quadratic_gates_only: false,
            all_in_normal_voltage: 10,
            run_index: 0,
            address_index: 0,
            reset_pending: false,
            internal_clock_progress: 0.0,
            internal_clock_length: DEFAULT_INTERNAL_CLOCK_LENGTH,
            tap_time: 99999.0,
            play_state_trigger: BooleanTrigger::new(),
            tap_tempo_trigger: BooleanTrigger::new(),
            input_clock_detector: SchmittTrigger::new(),
            main_clock_detector: SchmittTrigger::new(),
            reset_detector: SchmittTrigger::new(),
            end_of_cycle: PulseGenerator::new(),
            main_clock: MultDivClock::new(),
            output_clock: MultDivClock::new(),
            multi_gate: MultiGateClock::new(),
            expander: None,
            spec: PortSpec { inputs, outputs },
            param_defs,
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn set_play_state(&mut self, play_state: PlayState) {
        log::debug!(target: "stepclock::muxlicer", "play state: {}", play_state);
        self.play_state = play_state;
    }

    pub fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    pub fn set_io_mode(&mut self, io_mode: IoMode) {
        log::debug!(target: "stepclock::muxlicer", "I/O mode: {}", io_mode);
        self.io_mode = io_mode;
    }

    pub fn quadratic_gates_only(&self) -> bool {
        self.quadratic_gates_only
    }

    pub fn set_quadratic_gates_only(&mut self, enabled: bool) {
        log::debug!(target: "stepclock::muxlicer", "quadratic gates only: {}", enabled);
        self.quadratic_gates_only = enabled;
    }

    pub fn all_in_normal_voltage(&self) -> i32 {
        self.all_in_normal_voltage
    }

    /// Values outside [`ALL_IN_NORMAL_OPTIONS`] snap to the nearest option
    pub fn set_all_in_normal_voltage(&mut self, voltage: i32) {
        let snapped = nearest_normal_voltage(voltage as i64);
        log::debug!(target: "stepclock::muxlicer", "all input normalled to {}V", snapped);
        self.all_in_normal_voltage = snapped;
        // Hosts read the unpatched level of the "all" input from its port default
        if let Some(port) = self.spec.inputs.iter_mut().find(|p| p.id == ports::ALL_IN) {
            port.default = snapped as f64;
        }
    }

    pub fn main_clock_ratio(&self) -> i32 {
        self.main_clock.ratio()
    }

    pub fn set_main_clock_ratio(&mut self, ratio: i32) {
        let ratio = nearest_ratio(ratio as i64);
        log::debug!(target: "stepclock::muxlicer", "main clock {}", ratio_label(ratio));
        self.main_clock.set_ratio(ratio);
    }

    pub fn output_clock_ratio(&self) -> i32 {
        self.output_clock.ratio()
    }

    pub fn set_output_clock_ratio(&mut self, ratio: i32) {
        let ratio = nearest_ratio(ratio as i64);
        log::debug!(target: "stepclock::muxlicer", "output clock {}", ratio_label(ratio));
        self.output_clock.set_ratio(ratio);
    }

    pub fn settings(&self) -> MuxlicerSettings {
        MuxlicerSettings {
            io_mode: self.io_mode,
            quadratic_gates_only: self.quadratic_gates_only,
            all_in_normal_voltage: self.all_in_normal_voltage,
            main_clock_ratio: self.main_clock.ratio(),
            output_clock_ratio: self.output_clock.ratio(),
            play_state: self.play_state,
        }
    }

    pub fn apply_settings(&mut self, settings: &MuxlicerSettings) {
        self.set_io_mode(settings.io_mode);
        self.set_quadratic_gates_only(settings.quadratic_gates_only);
        self.set_all_in_normal_voltage(settings.all_in_normal_voltage);
        self.set_main_clock_ratio(settings.main_clock_ratio);
        self.set_output_clock_ratio(settings.output_clock_ratio);
        self.set_play_state(settings.play_state);
    }

    /// Starts publishing per-sample state to an adjacent expander
    pub fn attach_expander(&mut self, link: Arc<ExpanderLink>) {
        log::debug!(target: "stepclock::muxlicer", "expander attached");
        self.expander = Some(link);
    }

    pub fn detach_expander(&mut self) {
        if self.expander.take().is_some() {
            log::debug!(target: "stepclock::muxlicer", "expander detached");
        }
    }

    /// Step the clock-driven sequence is on
    pub fn run_index(&self) -> usize {
        self.run_index
    }

    /// Step currently routed, either the run index or the address override
    pub fn address_index(&self) -> usize {
        self.address_index
    }

    /// Period of the internal (tap tempo) clock in seconds
    pub fn internal_clock_length(&self) -> f64 {
        self.internal_clock_length
    }

    /// Gate subdivision in effect, in -1…8
    pub fn gate_mode(&self, gate_mode_cv: Option<f64>) -> i32 {
        let knob = self.params.gate_mode;
        // CV scaling not verified against hardware
        let gate = match gate_mode_cv {
            Some(cv) => {
                let cv = cv.clamp(0.0, 5.0) / 5.0;
                let attenuation = rescale(knob, MIN_GATE_MODE, MAX_GATE_MODE, 0.0, 1.0);
                rescale(cv * attenuation, 0.0, 1.0, MIN_GATE_MODE, MAX_GATE_MODE)
            }
            None => knob,
        };

        if self.quadratic_gates_only {
            let index = rescale(gate, MIN_GATE_MODE, MAX_GATE_MODE, 0.0, 4.99)
                .floor()
                .clamp(0.0, (QUADRATIC_GATE_MODES.len() - 1) as f64);
            QUADRATIC_GATE_MODES[index as usize]
        } else {
            gate.round().clamp(MIN_GATE_MODE, MAX_GATE_MODE) as i32
        }
    }

    fn process_play_switch(&mut self) {
        let position = self.params.play_switch;
        let active = position != PlaySwitch::Neutral;
        if !self.play_state_trigger.process(active) || !active {
            return;
        }

        match (self.play_state, position) {
            (PlayState::Stopped, PlaySwitch::Play) => self.play_state = PlayState::Playing,
            (PlayState::Stopped, _) => {
                self.play_state = PlayState::PlayOnce;
                self.run_index = 0;
                self.reset_pending = true;
            }
            (_, PlaySwitch::Play) => self.play_state = PlayState::Stopped,
            (_, _) => {
                self.run_index = 0;
                self.reset_pending = true;
            }
        }
    }

    /// Processes one sample
    pub fn process(&mut self, inputs: &MuxlicerInputs) -> MuxlicerOutputs {
        let sample_time = 1.0 / self.sample_rate;

        let using_external_clock = inputs.clock.is_some();
        let external_clock_pulse = match inputs.clock {
            Some(clock) => self.input_clock_detector.process(gate_level(clock)),
            None => self.tap_tempo_trigger.process(self.params.tap_tempo),
        };

        if self.reset_detector.process(gate_level(inputs.reset)) {
            self.reset_pending = true;
            if self.play_state == PlayState::Stopped {
                self.play_state = PlayState::PlayOnce;
            }
        }

        self.process_play_switch();

        let address = self.params.address + inputs.address_cv;
        let sequence_running = address < 0.0;

        if external_clock_pulse {
            if self.tap_time < MAX_TAP_INTERVAL {
                self.internal_clock_length = self.tap_time;
            }
            self.tap_time = 0.0;
            self.internal_clock_progress = 0.0;
        }
        self.tap_time += sample_time;
        self.internal_clock_progress += sample_time;

        let internal_clock_pulse = self.internal_clock_progress >= self.internal_clock_length;
        if internal_clock_pulse {
            self.internal_clock_progress = 0.0;
        }

        let clock_pulse = if using_external_clock {
            external_clock_pulse
        } else {
            internal_clock_pulse
        };

        let main_gate = self.main_clock.process(sample_time, clock_pulse);
        let main_clock_edge = self.main_clock_detector.process(main_gate);

        if self.reset_pending {
            self.run_index = 0;
            self.reset_pending = false;
        }

        if main_clock_edge {
            if sequence_running {
                self.run_index += 1;
                if self.run_index >= SEQUENCE_LENGTH {
                    self.run_index = 0;
                    self.end_of_cycle.trigger_for(END_OF_CYCLE_PULSE_LENGTH);
                    if self.play_state == PlayState::PlayOnce {
                        self.play_state = PlayState::Stopped;
                    }
                }
            }
            self.multi_gate
                .reset(self.main_clock.effective_clock_length());
        }

        self.address_index = if sequence_running {
            self.run_index
        } else {
            address.round().clamp(0.0, (SEQUENCE_LENGTH - 1) as f64) as usize
        };
        let step = self.address_index;

        self.multi_gate.process(sample_time);
        let gate_mode = self.gate_mode(inputs.gate_mode_cv);
        let gate = self.multi_gate.gate(gate_mode);
        let playing = self.play_state != PlayState::Stopped;

        let mut outputs = MuxlicerOutputs::default();
        if playing {
            outputs.gates[step] = gate;
            outputs.gate_lights[step] = gate / GATE_HIGH_VOLTAGE;
            outputs.all_gates = gate;

            let level = self.params.levels[step];
            match self.io_mode {
                IoMode::OneInEightOut => outputs.mux[step] = level * inputs.com,
                IoMode::EightInOneOut => {
                    let all = inputs.all.unwrap_or(self.all_in_normal_voltage as f64);
                    outputs.com = level * inputs.mux[step].unwrap_or(all);
                }
            }
        }

        let output_clock_high = self.output_clock.process(sample_time, clock_pulse) > 0.0;
        outputs.clock = if output_clock_high {
            GATE_HIGH_VOLTAGE
        } else {
            0.0
        };
        outputs.clock_light = if output_clock_high { 1.0 } else { 0.0 };

        outputs.end_of_cycle = if self.end_of_cycle.process(sample_time) {
            GATE_HIGH_VOLTAGE
        } else {
            0.0
        };

        if let Some(link) = &self.expander {
            link.write(&ExpanderMessage {
                address_index: step,
                all_gates: gate,
                output_clock: outputs.clock,
                is_playing: playing,
            });
            link.request_flip();
        }

        outputs
    }
}

impl Default for Muxlicer {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl GraphModule for Muxlicer {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues) {
        let mut mux = [None; SEQUENCE_LENGTH];
        for (i, slot) in mux.iter_mut().enumerate() {
            *slot = inputs.get(ports::MUX_IN + i as PortId);
        }

        let result = self.process(&MuxlicerInputs {
            gate_mode_cv: inputs.get(ports::GATE_MODE_CV),
            address_cv: inputs.get_or(ports::ADDRESS_CV, 0.0),
            clock: inputs.get(ports::CLOCK),
            reset: inputs.get_or(ports::RESET, 0.0),
            com: inputs.get_or(ports::COM_IN, 0.0),
            mux,
            all: inputs.get(ports::ALL_IN),
        });

        outputs.set(ports::CLOCK_OUT, result.clock);
        outputs.set(ports::ALL_GATES, result.all_gates);
        outputs.set(ports::END_OF_CYCLE, result.end_of_cycle);
        for i in 0..SEQUENCE_LENGTH {
            outputs.set(ports::GATE + i as PortId, result.gates[i]);
            outputs.set(ports::MUX_OUT + i as PortId, result.mux[i]);
        }
        outputs.set(ports::COM_OUT, result.com);
    }

    fn reset(&mut self) {
        self.internal_clock_length = DEFAULT_INTERNAL_CLOCK_LENGTH;
        self.internal_clock_progress = 0.0;
        self.run_index = 0;
        self.address_index = 0;
        self.reset_pending = false;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn params(&self) -> &[ParamDef] {
        &self.param_defs
    }

    fn get_param(&self, id: ParamId) -> Option<f64> {
        match id {
            params::PLAY => Some(self.params.play_switch.value()),
            params::ADDRESS => Some(self.params.address),
            params::GATE_MODE => Some(self.params.gate_mode),
            params::TAP_TEMPO => Some(if self.params.tap_tempo { 1.0 } else { 0.0 }),
            params::LEVEL..=params::LEVEL_LAST => {
                Some(self.params.levels[(id - params::LEVEL) as usize])
            }
            _ => None,
        }
    }

    fn set_param(&mut self, id: ParamId, value: f64) {
        let Some(def) = self.param_defs.iter().find(|p| p.id == id) else {
            return;
        };
        let value = def.range.apply(value);
        match id {
            params::PLAY => self.params.play_switch = PlaySwitch::from_value(value),
            params::ADDRESS => self.params.address = value,
            params::GATE_MODE => self.params.gate_mode = value,
            params::TAP_TEMPO => self.params.tap_tempo = value > 0.5,
            params::LEVEL..=params::LEVEL_LAST => {
                self.params.levels[(id - params::LEVEL) as usize] = value
            }
            _ => {}
        }
    }

    fn param_display(&self, id: ParamId) -> Option<String> {
        match id {
            params::PLAY => Some(self.params.play_switch.to_string()),
            params::ADDRESS => {
                let address = self.params.address.round();
                if address < 0.0 {
                    Some("Sequenced".to_string())
                } else {
                    Some(format!("Step {}", address as i32 + 1))
                }
            }
            params::GATE_MODE => Some(gate_mode_label(self.gate_mode(None))),
            _ => None,
        }
    }

    fn type_id(&self) -> &'static str {
        "muxlicer"
    }

    fn serialize_state(&self) -> Option<serde_json::Value> {
        self.settings().to_value().ok()
    }

    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<(), SettingsError> {
        let settings = MuxlicerSettings::from_value(state)?;
        self.apply_settings(&settings);
        Ok(())
    }
}
