//! Signal Conventions and Port System
//!
//! This module defines the signal types, port definitions, and the type-erased
//! per-sample interface a host uses to drive the modules in this crate.

use crate::serialize::SettingsError;
use libm::Libm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a port within a module
pub type PortId = u32;

/// Unique identifier for a parameter within a module
pub type ParamId = u32;

/// Voltage below which a gate-like input reads as low
pub const GATE_LOW_THRESHOLD: f64 = 0.1;

/// Voltage above which a gate-like input reads as high
pub const GATE_HIGH_THRESHOLD: f64 = 2.0;

/// Nominal level for emitted gates, triggers and clocks
pub const GATE_HIGH_VOLTAGE: f64 = 10.0;

/// Semantic signal classification following hardware modular conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Audio signal, AC-coupled, typically ±5V peak
    Audio,

    /// Bipolar control voltage, ±5V
    CvBipolar,

    /// Unipolar control voltage, 0–10V
    CvUnipolar,

    /// Pitch CV following 1V/octave
    VoltPerOctave,

    /// Gate signal, 0V (low) or +10V (high)
    Gate,

    /// Trigger signal, short pulse at +10V
    Trigger,

    /// Clock signal, regular gate train
    Clock,
}

impl SignalKind {
    /// Returns the typical voltage range (min, max) for this signal type
    pub fn voltage_range(&self) -> (f64, f64) {
        match self {
            SignalKind::Audio => (-5.0, 5.0),
            SignalKind::CvBipolar => (-5.0, 5.0),
            SignalKind::CvUnipolar => (0.0, 10.0),
            SignalKind::VoltPerOctave => (-5.0, 5.0),
            SignalKind::Gate => (0.0, 10.0),
            SignalKind::Trigger => (0.0, 10.0),
            SignalKind::Clock => (-5.0, 10.0),
        }
    }

    /// Hysteresis thresholds (low, high) for edge detection
    pub fn gate_thresholds(&self) -> Option<(f64, f64)> {
        match self {
            SignalKind::Gate | SignalKind::Trigger | SignalKind::Clock => {
                Some((GATE_LOW_THRESHOLD, GATE_HIGH_THRESHOLD))
            }
            _ => None,
        }
    }
}

/// Definition of a single port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Unique identifier within the module
    pub id: PortId,

    /// Human-readable name (e.g., "sync", "voct", "out")
    pub name: String,

    /// Signal type for validation and UI hints
    pub kind: SignalKind,

    /// Default value when no cable connected
    pub default: f64,

    /// For inputs: internal source when unpatched (normalled connection)
    pub normalled_to: Option<PortId>,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            default: 0.0,
            normalled_to: None,
        }
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    pub fn normalled_to(mut self, port: PortId) -> Self {
        self.normalled_to = Some(port);
        self
    }
}

/// Specification of all ports for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl PortSpec {
    pub fn input_by_name(&self, name: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_by_name(&self, name: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn input_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output_by_id(&self, id: PortId) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.id == id)
    }
}

/// Runtime port values container
///
/// An input that has no entry is treated as unpatched.
#[derive(Debug, Clone, Default)]
pub struct PortValues {
    pub values: HashMap<PortId, f64>,
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PortId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    pub fn get_or(&self, id: PortId, default: f64) -> f64 {
        self.values.get(&id).copied().unwrap_or(default)
    }

    pub fn set(&mut self, id: PortId, value: f64) {
        self.values.insert(id, value);
    }
}

/// Parameter range mapping for panel controls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamRange {
    /// Continuous control clamped to (min, max)
    Linear { min: f64, max: f64 },

    /// Switch or selector: rounded to the nearest integer in (min, max)
    Discrete { min: i32, max: i32 },

    /// V/Oct: input is in volts, output is frequency
    VoltPerOctave { base_freq: f64 },
}

impl ParamRange {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            ParamRange::Linear { min, max } => value.clamp(*min, *max),
            ParamRange::Discrete { min, max } => {
                Libm::<f64>::round(value).clamp(*min as f64, *max as f64)
            }
            ParamRange::VoltPerOctave { base_freq } => {
                base_freq * Libm::<f64>::pow(2.0, value)
            }
        }
    }
}

/// Parameter definition for UI binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub default: f64,
    pub range: ParamRange,
}

impl ParamDef {
    pub fn new(id: ParamId, name: impl Into<String>, default: f64, range: ParamRange) -> Self {
        Self {
            id,
            name: name.into(),
            default,
            range,
        }
    }
}

/// Type-erased module interface for host integration
pub trait GraphModule: Send + Sync {
    /// Returns the module's port specification
    fn port_spec(&self) -> &PortSpec;

    /// Process one sample given port values
    fn tick(&mut self, inputs: &PortValues, outputs: &mut PortValues);

    /// Reset internal state
    fn reset(&mut self);

    /// Set sample rate
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Get parameter definitions for UI binding
    fn params(&self) -> &[ParamDef] {
        &[]
    }

    /// Get a parameter value
    fn get_param(&self, _id: ParamId) -> Option<f64> {
        None
    }

    /// Set a parameter value
    fn set_param(&mut self, _id: ParamId, _value: f64) {}

    /// Display string for a parameter's current value, for selector-style controls
    fn param_display(&self, _id: ParamId) -> Option<String> {
        None
    }

    /// Get module type identifier for serialization
    fn type_id(&self) -> &'static str {
        "unknown"
    }

    /// Serialize persisted settings
    fn serialize_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore persisted settings
    fn deserialize_state(&mut self, _state: &serde_json::Value) -> Result<(), SettingsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_ranges() {
        assert_eq!(SignalKind::Audio.voltage_range(), (-5.0, 5.0));
        assert_eq!(SignalKind::Gate.voltage_range(), (0.0, 10.0));
        assert_eq!(SignalKind::CvUnipolar.voltage_range(), (0.0, 10.0));
    }

    #[test]
    fn test_signal_kind_gate_thresholds() {
        assert_eq!(SignalKind::Gate.gate_thresholds(), Some((0.1, 2.0)));
        assert_eq!(SignalKind::Clock.gate_thresholds(), Some((0.1, 2.0)));
        assert!(SignalKind::Audio.gate_thresholds().is_none());
        assert!(SignalKind::VoltPerOctave.gate_thresholds().is_none());
    }

    #[test]
    fn test_port_values() {
        let mut pv = PortValues::new();
        pv.set(0, 1.0);
        pv.set(1, 2.0);
        assert_eq!(pv.get(0), Some(1.0));
        assert_eq!(pv.get(1), Some(2.0));
        assert_eq!(pv.get(2), None);
        assert_eq!(pv.get_or(2, 5.0), 5.0);

        pv.set(1, -3.0);
        assert_eq!(pv.get_or(1, 5.0), -3.0);
    }

    #[test]
    fn test_param_range_linear_clamps() {
        let range = ParamRange::Linear { min: -1.0, max: 7.0 };
        assert_eq!(range.apply(3.5), 3.5);
        assert_eq!(range.apply(-4.0), -1.0);
        assert_eq!(range.apply(12.0), 7.0);
    }

    #[test]
    fn test_param_range_discrete_rounds() {
        let range = ParamRange::Discrete { min: 0, max: 2 };
        assert_eq!(range.apply(1.4), 1.0);
        assert_eq!(range.apply(1.6), 2.0);
        assert_eq!(range.apply(9.0), 2.0);
        assert_eq!(range.apply(-3.0), 0.0);
    }

    #[test]
    fn test_param_range_voct() {
        let range = ParamRange::VoltPerOctave { base_freq: 1.0 };
        assert!((range.apply(0.0) - 1.0).abs() < 1e-12);
        assert!((range.apply(1.0) - 2.0).abs() < 1e-12);
        assert!((range.apply(10.0) - 1024.0).abs() < 1e-9);
    }

    #[test]
    fn test_port_spec_lookup() {
        let spec = PortSpec {
            inputs: vec![
                PortDef::new(0, "sync", SignalKind::Clock),
                PortDef::new(1, "in", SignalKind::CvBipolar).normalled_to(0),
            ],
            outputs: vec![PortDef::new(10, "out", SignalKind::CvBipolar).with_default(1.0)],
        };

        assert!(spec.input_by_name("sync").is_some());
        assert!(spec.input_by_name("nonexistent").is_none());
        assert_eq!(spec.input_by_id(1).and_then(|p| p.normalled_to), Some(0));
        assert!((spec.output_by_name("out").map(|p| p.default).unwrap_or(0.0) - 1.0).abs() < 1e-12);
        assert!(spec.output_by_id(99).is_none());
    }
}
