//! Serialization and Persistence
//!
//! Settings documents for each module, the error type shared by everything that
//! loads them, and a registry that instantiates modules by type id and restores
//! their saved state.
//!
//! Loading is tolerant: a missing key, or a key holding the wrong JSON type,
//! keeps that field's default, and out-of-range values are snapped to the
//! nearest valid one with a warning.

use crate::clock::nearest_ratio;
use crate::modules::muxlicer::{nearest_normal_voltage, IoMode, PlayState};
use crate::modules::{Muxlicer, SamplingModulator};
use crate::port::{GraphModule, PortSpec};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Errors from loading a settings document
#[derive(Debug)]
pub enum SettingsError {
    /// Document text is not valid JSON
    Json(serde_json::Error),
    /// Document root is not a key/value object
    NotAnObject,
    /// No module is registered under this type id
    UnknownModule(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Json(err) => write!(f, "Invalid settings document: {}", err),
            SettingsError::NotAnObject => write!(f, "Settings document is not an object"),
            SettingsError::UnknownModule(type_id) => write!(f, "Unknown module: {}", type_id),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Json(err)
    }
}

/// Reads a field, treating a value of the wrong type as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn object(value: &serde_json::Value) -> Result<&serde_json::Value, SettingsError> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(SettingsError::NotAnObject)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MuxlicerDocument {
    #[serde(
        rename = "modeCOMIO",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    mode_com_io: Option<i64>,

    #[serde(
        rename = "quadraticGatesOnly",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    quadratic_gates_only: Option<bool>,

    #[serde(
        rename = "allInNormalVoltage",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    all_in_normal_voltage: Option<i64>,

    #[serde(
        rename = "mainClockMultDiv",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    main_clock_mult_div: Option<i64>,

    #[serde(
        rename = "outputClockMultDiv",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    output_clock_mult_div: Option<i64>,

    #[serde(
        rename = "playState",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    play_state: Option<i64>,
}

/// Persisted Muxlicer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxlicerSettings {
    pub io_mode: IoMode,
    pub quadratic_gates_only: bool,
    /// Voltage an unpatched "all" input is normalled to: 1, 5 or 10
    pub all_in_normal_voltage: i32,
    pub main_clock_ratio: i32,
    pub output_clock_ratio: i32,
    pub play_state: PlayState,
}

impl Default for MuxlicerSettings {
    fn default() -> Self {
        Self {
            io_mode: IoMode::OneInEightOut,
            quadratic_gates_only: false,
            all_in_normal_voltage: 10,
            main_clock_ratio: 1,
            output_clock_ratio: 1,
            play_state: PlayState::Stopped,
        }
    }
}

fn coerce_ratio(key: &str, ratio: i64) -> i32 {
    let snapped = nearest_ratio(ratio);
    if snapped as i64 != ratio {
        log::warn!(
            target: "stepclock::settings",
            "{} = {} is not a clock ratio, using {}",
            key,
            ratio,
            snapped
        );
    }
    snapped
}

impl MuxlicerSettings {
    fn from_document(doc: MuxlicerDocument) -> Self {
        let mut settings = Self::default();

        if let Some(index) = doc.mode_com_io {
            match IoMode::from_index(index) {
                Some(mode) => settings.io_mode = mode,
                None => log::warn!(
                    target: "stepclock::settings",
                    "modeCOMIO = {} is not an I/O mode, using {}",
                    index,
                    settings.io_mode
                ),
            }
        }

        if let Some(enabled) = doc.quadratic_gates_only {
            settings.quadratic_gates_only = enabled;
        }

        if let Some(voltage) = doc.all_in_normal_voltage {
            let snapped = nearest_normal_voltage(voltage);
            if snapped as i64 != voltage {
                log::warn!(
                    target: "stepclock::settings",
                    "allInNormalVoltage = {} is not an option, using {}",
                    voltage,
                    snapped
                );
            }
            settings.all_in_normal_voltage = snapped;
        }

        if let Some(ratio) = doc.main_clock_mult_div {
            settings.main_clock_ratio = coerce_ratio("mainClockMultDiv", ratio);
        }
        if let Some(ratio) = doc.output_clock_mult_div {
            settings.output_clock_ratio = coerce_ratio("outputClockMultDiv", ratio);
        }

        if let Some(index) = doc.play_state {
            match PlayState::from_index(index) {
                Some(state) => settings.play_state = state,
                None => log::warn!(
                    target: "stepclock::settings",
                    "playState = {} is not a play state, using {}",
                    index,
                    settings.play_state
                ),
            }
        }

        settings
    }

    fn to_document(self) -> MuxlicerDocument {
        MuxlicerDocument {
            mode_com_io: Some(self.io_mode.index()),
            quadratic_gates_only: Some(self.quadratic_gates_only),
            all_in_normal_voltage: Some(self.all_in_normal_voltage as i64),
            main_clock_mult_div: Some(self.main_clock_ratio as i64),
            output_clock_mult_div: Some(self.output_clock_ratio as i64),
            play_state: Some(self.play_state.index()),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, SettingsError> {
        Ok(serde_json::to_value(self.to_document())?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, SettingsError> {
        let doc = MuxlicerDocument::deserialize(object(value)?)?;
        Ok(Self::from_document(doc))
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SamplingModulatorDocument {
    #[serde(
        rename = "removeDC",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    remove_dc: Option<bool>,
}

/// Persisted SamplingModulator configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingModulatorSettings {
    pub remove_dc: bool,
}

impl Default for SamplingModulatorSettings {
    fn default() -> Self {
        Self { remove_dc: true }
    }
}

impl SamplingModulatorSettings {
    pub fn to_value(&self) -> Result<serde_json::Value, SettingsError> {
        Ok(serde_json::to_value(SamplingModulatorDocument {
            remove_dc: Some(self.remove_dc),
        })?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, SettingsError> {
        let doc = SamplingModulatorDocument::deserialize(object(value)?)?;
        let mut settings = Self::default();
        if let Some(remove_dc) = doc.remove_dc {
            settings.remove_dc = remove_dc;
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(&self.to_value()?)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

/// Saved module instance: type, panel controls and settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Module type identifier
    pub module_type: String,

    /// Panel control values by parameter id
    #[serde(default)]
    pub parameters: HashMap<u32, f64>,

    /// Module-specific settings document
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

impl ModuleDef {
    pub fn new(module_type: impl Into<String>) -> Self {
        Self {
            module_type: module_type.into(),
            parameters: HashMap::new(),
            state: None,
        }
    }

    /// Captures the parameters and settings of a live module
    pub fn capture(module: &dyn GraphModule) -> Self {
        let parameters = module
            .params()
            .iter()
            .filter_map(|p| module.get_param(p.id).map(|v| (p.id, v)))
            .collect();
        Self {
            module_type: module.type_id().to_string(),
            parameters,
            state: module.serialize_state(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Module factory function type
pub type ModuleFactory = Box<dyn Fn(f64) -> Box<dyn GraphModule> + Send + Sync>;

/// Metadata about a registered module type
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    pub type_id: String,
    pub name: String,
    pub description: String,
    pub port_spec: PortSpec,
}

/// Registry of available module types for instantiation
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
    metadata: HashMap<String, ModuleMetadata>,
}

impl ModuleRegistry {
    /// Create a registry holding the built-in modules
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            metadata: HashMap::new(),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        self.register_factory(
            "sampling_modulator",
            "Sampling Modulator",
            "Clocked sample-and-hold with an 8-step on/off/reset pattern",
            |sr| Box::new(SamplingModulator::new(sr)),
        );

        self.register_factory(
            "muxlicer",
            "Muxlicer",
            "8-step sequential switch with clock mult/div and subdivided gates",
            |sr| Box::new(Muxlicer::new(sr)),
        );
    }

    /// Register a module factory with metadata
    pub fn register_factory<F>(&mut self, type_id: &str, name: &str, description: &str, factory: F)
    where
        F: Fn(f64) -> Box<dyn GraphModule> + Send + Sync + 'static,
    {
        // Get port spec from a temporary instance
        let port_spec = factory(44100.0).port_spec().clone();

        self.factories
            .insert(type_id.to_string(), Box::new(factory));
        self.metadata.insert(
            type_id.to_string(),
            ModuleMetadata {
                type_id: type_id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                port_spec,
            },
        );
    }

    /// Instantiate a module by type ID
    pub fn instantiate(&self, type_id: &str, sample_rate: f64) -> Option<Box<dyn GraphModule>> {
        self.factories.get(type_id).map(|f| f(sample_rate))
    }

    /// Instantiate a module from a saved definition, restoring its controls and settings
    pub fn restore(
        &self,
        def: &ModuleDef,
        sample_rate: f64,
    ) -> Result<Box<dyn GraphModule>, SettingsError> {
        let mut module = self
            .instantiate(&def.module_type, sample_rate)
            .ok_or_else(|| SettingsError::UnknownModule(def.module_type.clone()))?;

        for (&id, &value) in &def.parameters {
            module.set_param(id, value);
        }
        if let Some(state) = &def.state {
            module.deserialize_state(state)?;
        }

        log::debug!(
            target: "stepclock::settings",
            "restored {} with {} parameters",
            def.module_type,
            def.parameters.len()
        );
        Ok(module)
    }

    /// List all registered module types
    pub fn list_modules(&self) -> impl Iterator<Item = &ModuleMetadata> {
        self.metadata.values()
    }

    /// Get metadata for a specific module type
    pub fn get_metadata(&self, type_id: &str) -> Option<&ModuleMetadata> {
        self.metadata.get(type_id)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_muxlicer_settings_keys() {
        let settings = MuxlicerSettings {
            io_mode: IoMode::EightInOneOut,
            quadratic_gates_only: true,
            all_in_normal_voltage: 5,
            main_clock_ratio: -4,
            output_clock_ratio: 8,
            play_state: PlayState::Playing,
        };
        let value = settings.to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "modeCOMIO": 1,
                "quadraticGatesOnly": true,
                "allInNormalVoltage": 5,
                "mainClockMultDiv": -4,
                "outputClockMultDiv": 8,
                "playState": 2
            })
        );
        assert_eq!(MuxlicerSettings::from_value(&value).unwrap(), settings);
    }

    #[test]
    fn test_muxlicer_settings_json_text() {
        let settings = MuxlicerSettings {
            main_clock_ratio: 3,
            ..Default::default()
        };
        let json = settings.to_json().unwrap();
        assert!(json.contains("\"mainClockMultDiv\": 3"));
        assert_eq!(MuxlicerSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_missing_and_unknown_keys_keep_defaults() {
        let settings = MuxlicerSettings::from_value(&json!({
            "quadraticGatesOnly": true,
            "someFutureKey": [1, 2, 3]
        }))
        .unwrap();
        assert!(settings.quadratic_gates_only);
        assert_eq!(settings.io_mode, IoMode::OneInEightOut);
        assert_eq!(settings.all_in_normal_voltage, 10);
        assert_eq!(settings.play_state, PlayState::Stopped);

        assert_eq!(
            MuxlicerSettings::from_value(&json!({})).unwrap(),
            MuxlicerSettings::default()
        );
    }

    #[test]
    fn test_wrong_types_keep_defaults() {
        let settings = MuxlicerSettings::from_value(&json!({
            "modeCOMIO": "one",
            "quadraticGatesOnly": 1,
            "mainClockMultDiv": null,
            "playState": 2.5
        }))
        .unwrap();
        assert_eq!(settings, MuxlicerSettings::default());
    }

    #[test]
    fn test_out_of_range_values_are_coerced() {
        let settings = MuxlicerSettings::from_value(&json!({
            "modeCOMIO": 7,
            "allInNormalVoltage": 12,
            "mainClockMultDiv": 0,
            "outputClockMultDiv": -6,
            "playState": -1
        }))
        .unwrap();
        assert_eq!(settings.io_mode, IoMode::OneInEightOut);
        assert_eq!(settings.all_in_normal_voltage, 10);
        assert_eq!(settings.main_clock_ratio, 1);
        assert_eq!(settings.output_clock_ratio, -8);
        assert_eq!(settings.play_state, PlayState::Stopped);

        let settings = MuxlicerSettings::from_value(&json!({ "allInNormalVoltage": 2 })).unwrap();
        assert_eq!(settings.all_in_normal_voltage, 1);
    }

    #[test]
    fn test_extreme_integers_are_coerced() {
        let settings = MuxlicerSettings::from_value(&json!({
            "allInNormalVoltage": i64::MIN,
            "mainClockMultDiv": i64::MIN,
            "outputClockMultDiv": i64::MAX
        }))
        .unwrap();
        assert_eq!(settings.all_in_normal_voltage, 1);
        assert_eq!(settings.main_clock_ratio, -16);
        assert_eq!(settings.output_clock_ratio, 16);

        let settings = MuxlicerSettings::from_value(&json!({
            "allInNormalVoltage": i64::MAX,
            "mainClockMultDiv": i64::MAX,
            "outputClockMultDiv": i64::MIN
        }))
        .unwrap();
        assert_eq!(settings.all_in_normal_voltage, 10);
        assert_eq!(settings.main_clock_ratio, 16);
        assert_eq!(settings.output_clock_ratio, -16);
    }

    #[test]
    fn test_non_object_documents_are_rejected() {
        assert!(matches!(
            MuxlicerSettings::from_value(&json!([1, 2])),
            Err(SettingsError::NotAnObject)
        ));
        assert!(matches!(
            SamplingModulatorSettings::from_value(&json!(true)),
            Err(SettingsError::NotAnObject)
        ));
        assert!(matches!(
            MuxlicerSettings::from_json("{ not json"),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn test_sampling_modulator_settings() {
        let settings = SamplingModulatorSettings { remove_dc: false };
        let value = settings.to_value().unwrap();
        assert_eq!(value, json!({ "removeDC": false }));
        assert_eq!(SamplingModulatorSettings::from_value(&value).unwrap(), settings);

        let defaulted = SamplingModulatorSettings::from_json("{\"removeDC\": \"no\"}").unwrap();
        assert!(defaulted.remove_dc);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SettingsError::NotAnObject.to_string(),
            "Settings document is not an object"
        );
        assert_eq!(
            SettingsError::UnknownModule("vco".into()).to_string(),
            "Unknown module: vco"
        );
    }

    #[test]
    fn test_registry_lists_builtin_modules() {
        let registry = ModuleRegistry::new();
        assert_eq!(registry.list_modules().count(), 2);

        let meta = registry.get_metadata("muxlicer").unwrap();
        assert_eq!(meta.name, "Muxlicer");
        assert!(meta.port_spec.output_by_name("eoc").is_some());

        let module = registry.instantiate("sampling_modulator", 48000.0).unwrap();
        assert_eq!(module.type_id(), "sampling_modulator");
        assert!(registry.instantiate("vco", 48000.0).is_none());
    }

    #[test]
    fn test_module_def_capture_and_restore() {
        let registry = ModuleRegistry::new();
        let mut muxlicer = Muxlicer::new(48000.0);
        muxlicer.set_param(crate::modules::muxlicer::params::LEVEL + 2, 0.25);
        muxlicer.set_output_clock_ratio(-2);

        let def = ModuleDef::capture(&muxlicer);
        let json = def.to_json().unwrap();
        let loaded = ModuleDef::from_json(&json).unwrap();
        let restored = registry.restore(&loaded, 48000.0).unwrap();

        assert_eq!(
            restored.get_param(crate::modules::muxlicer::params::LEVEL + 2),
            Some(0.25)
        );
        assert_eq!(restored.serialize_state(), muxlicer.serialize_state());
    }

    #[test]
    fn test_restore_unknown_module_fails() {
        let registry = ModuleRegistry::new();
        let result = registry.restore(&ModuleDef::new("reverb"), 48000.0);
        assert!(matches!(result, Err(SettingsError::UnknownModule(_))));
    }
}
