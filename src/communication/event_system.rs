use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::hardware::temperature::TelemetrySample;
use crate::print_job::PrintState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Error,
    /// A command we transmitted.
    Echo,
    /// A line the device sent us.
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            LogLevel::Info => write!(f, "[INFO] {}", self.message),
            LogLevel::Error => write!(f, "[ERROR] {}", self.message),
            LogLevel::Echo => write!(f, ">>> {}", self.message),
            LogLevel::Received => write!(f, "< {}", self.message),
        }
    }
}

/// Everything the host reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostEvent {
    Log(LogLine),
    Telemetry(TelemetrySample),
    Progress { percent: u8 },
    StateChanged { state: PrintState },
    Connection { connected: bool },
}

/// Fan-out channel shared by the serial link and the print controller.
///
/// Publishing never waits. A subscriber that falls more than `capacity`
/// events behind loses the oldest ones and sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<HostEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> Receiver<HostEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: HostEvent) {
        // No subscribers is fine; events are fire-and-forget.
        let _ = self.sender.send(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(HostEvent::Log(LogLine::new(level, message)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn echo(&self, command: impl Into<String>) {
        self.log(LogLevel::Echo, command);
    }

    pub fn received(&self, line: impl Into<String>) {
        self.log(LogLevel::Received, line);
    }

    pub fn telemetry(&self, sample: TelemetrySample) {
        self.emit(HostEvent::Telemetry(sample));
    }

    pub fn progress(&self, percent: u8) {
        self.emit(HostEvent::Progress { percent: percent.min(100) });
    }

    pub fn state_changed(&self, state: PrintState) {
        self.emit(HostEvent::StateChanged { state });
    }

    pub fn connection(&self, connected: bool) {
        self.emit(HostEvent::Connection { connected });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
