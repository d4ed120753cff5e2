//! Modules
//!
//! The two sequencing modules. Each has a typed, allocation-free `process`
//! entry point and a [`GraphModule`](crate::port::GraphModule) adapter that
//! reads and writes [`PortValues`](crate::port::PortValues).

pub mod muxlicer;
pub mod sampling_modulator;

pub use muxlicer::{
    IoMode, Muxlicer, MuxlicerInputs, MuxlicerOutputs, MuxlicerParams, PlayState, PlaySwitch,
};
pub use sampling_modulator::{
    ClockMode, SamplingModulator, SamplingModulatorInputs, SamplingModulatorOutputs,
    SamplingModulatorParams, StepState,
};
