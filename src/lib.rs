//! # marlin-host
//!
//! Control host for a Marlin 3D printer attached over a serial link.
//!
//! - [`communication::serial::SerialLink`] owns the port, runs the background
//!   receive loop and writes commands.
//! - [`hardware::temperature::parse_temperature`] pulls hotend/bed readings out
//!   of free-form firmware output.
//! - [`print_job::PrintJobController`] streams a loaded G-code job line by line
//!   with pause/resume/stop.
//!
//! Everything observable is published on the [`communication::event_system::EventBus`].

pub mod communication;
pub mod config;
pub mod file_manager;
pub mod gcode;
pub mod hardware;
pub mod print_job;

pub use communication::event_system::{EventBus, HostEvent, LogLevel, LogLine};
pub use communication::serial::{NativeSerial, SerialInterface, SerialLink, SerialStream};
pub use config::HostConfig;
pub use hardware::temperature::{TelemetrySample, parse_temperature};
pub use print_job::{CommandSink, PrintJob, PrintJobController, PrintJobError, PrintState};
