//! # Stepclock: Clocked Step Modules
//!
//! `stepclock` implements two clock-driven sequencing modules at per-sample
//! resolution, together with the DSP primitives they are built from.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **Layer 1: Primitives** - Edge detection, band-limited steps (MinBLEP), pulse and
//!   subdivided gate generators, clock multiplication/division
//! - **Layer 2: Port System** - Signal conventions, port and parameter definitions, and the
//!   type-erased per-sample interface
//! - **Layer 3: Modules** - [`SamplingModulator`] and [`Muxlicer`], with persisted settings
//!   and an expander link
//!
//! Per-sample processing never allocates, locks or logs. Settings changes and
//! document loading happen off the audio thread and report through the `log` facade.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepclock::prelude::*;
//!
//! let mut muxlicer = Muxlicer::new(48000.0);
//! muxlicer.set_main_clock_ratio(2);
//! muxlicer.params.play_switch = PlaySwitch::Play;
//!
//! let inputs = MuxlicerInputs {
//!     clock: Some(0.0),
//!     com: 5.0,
//!     ..Default::default()
//! };
//! let outputs = muxlicer.process(&inputs);
//! println!("step {} gate {}", muxlicer.address_index(), outputs.all_gates);
//!
//! // Persist and restore settings
//! let json = muxlicer.settings().to_json().unwrap();
//! let settings = MuxlicerSettings::from_json(&json).unwrap();
//! muxlicer.apply_settings(&settings);
//! ```

pub mod clock;
pub mod io;
pub mod minblep;
pub mod modules;
pub mod port;
pub mod pulse;
pub mod serialize;
pub mod trigger;

/// Prelude module for convenient imports
pub mod prelude {
    // Layer 1: Primitives
    pub use crate::clock::{MultDivClock, CLOCK_RATIO_OPTIONS};
    pub use crate::minblep::MinBlepGenerator;
    pub use crate::pulse::{MultiGateClock, PulseGenerator};
    pub use crate::trigger::{BooleanTrigger, SchmittTrigger};

    // Layer 2: Port System
    pub use crate::port::{
        GraphModule, ParamDef, ParamId, ParamRange, PortDef, PortId, PortSpec, PortValues,
        SignalKind,
    };

    // Layer 3: Modules
    pub use crate::modules::{
        ClockMode, IoMode, Muxlicer, MuxlicerInputs, MuxlicerOutputs, MuxlicerParams, PlayState,
        PlaySwitch, SamplingModulator, SamplingModulatorInputs, SamplingModulatorOutputs,
        SamplingModulatorParams, StepState,
    };

    // Expander
    pub use crate::io::{AtomicF64, ExpanderLink, ExpanderMessage};

    // Serialization
    pub use crate::serialize::{
        ModuleDef, ModuleMetadata, ModuleRegistry, MuxlicerSettings, SamplingModulatorSettings,
        SettingsError,
    };
}

// Re-export key types at crate root for convenience
pub use prelude::*;
