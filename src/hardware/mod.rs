// src/hardware/mod.rs
// Declare the submodules within the `hardware` module
pub mod temperature;

pub use temperature::{TelemetrySample, parse_temperature};
