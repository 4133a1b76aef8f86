// src/gcode/mod.rs
//! G-code generated from manual printer controls.
pub mod commands;

pub use commands::{Axis, PreheatProfile};
