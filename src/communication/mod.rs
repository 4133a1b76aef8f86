// src/communication/mod.rs
pub mod event_system;
pub mod serial;

pub use event_system::{EventBus, HostEvent, LogLevel, LogLine};
pub use serial::{LineAssembler, LinkError, NativeSerial, SerialInterface, SerialLink, SerialStream};
