// src/communication/serial.rs - Serial link to the printer
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::communication::event_system::EventBus;
use crate::config::{SerialConfig, is_standard_baud};
use crate::hardware::temperature::parse_temperature;
use crate::print_job::CommandSink;

const READ_BUFFER_SIZE: usize = 1024;
/// A device that never sends a newline must not grow the line buffer forever.
const MAX_LINE_LENGTH: usize = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Could not connect to {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: io::Error,
    },
    #[error("Unsupported baud rate: {0}")]
    InvalidBaudRate(u32),
    #[error("Not connected")]
    NotConnected,
    #[error("Serial write error: {0}")]
    Write(#[from] io::Error),
    #[error("Serial write timeout")]
    WriteTimeout,
}

/// An open byte stream to the device.
///
/// Both methods take `&self`: the receive loop reads while commands are
/// written from other tasks.
#[async_trait]
pub trait SerialStream: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write_all(&self, buf: &[u8]) -> io::Result<()>;
}

/// Opens ports and lists the ones available on this machine.
#[async_trait]
pub trait SerialInterface: Send + Sync {
    async fn open(&self, port: &str, baud: u32) -> io::Result<Arc<dyn SerialStream>>;
    fn available_ports(&self) -> Vec<String>;
}

/// `SerialInterface` backed by the operating system's serial ports via serial2-tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSerial;

struct NativePort(serial2_tokio::SerialPort);

#[async_trait]
impl SerialStream for NativePort {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf).await
    }
}

#[async_trait]
impl SerialInterface for NativeSerial {
    async fn open(&self, port: &str, baud: u32) -> io::Result<Arc<dyn SerialStream>> {
        let serial = serial2_tokio::SerialPort::open(port, baud)?;
        Ok(Arc::new(NativePort(serial)))
    }

    fn available_ports(&self) -> Vec<String> {
        match serial2_tokio::SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                vec![]
            }
        }
    }
}

/// Splits raw inbound bytes into trimmed text lines.
///
/// Bytes after the last `\n` are held until the rest of the line arrives.
/// Invalid UTF-8 is replaced, never rejected.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every non-empty line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || self.pending.len() >= MAX_LINE_LENGTH {
                self.flush_into(&mut lines);
            }
            if byte != b'\n' {
                self.pending.push(byte);
            }
        }
        lines
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

struct Connection {
    port_name: String,
    baud: u32,
    stream: Arc<dyn SerialStream>,
    /// Cleared by `disconnect` (stop request) or by the receive loop when the device goes away.
    running: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Owns the single connection to the printer.
///
/// Inbound lines are drained by a background task and published as
/// `Received` log events and telemetry samples; `send` writes under the
/// connection lock so two writers never interleave inside one line.
pub struct SerialLink {
    interface: Arc<dyn SerialInterface>,
    events: EventBus,
    read_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SerialLink {
    pub fn new(interface: Arc<dyn SerialInterface>, events: EventBus, read_timeout: Duration) -> Self {
        Self {
            interface,
            events,
            read_timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn with_config(interface: Arc<dyn SerialInterface>, events: EventBus, config: &SerialConfig) -> Self {
        Self::new(interface, events, config.read_timeout())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Port identifiers the user may pick from.
    pub fn available_ports(&self) -> Vec<String> {
        self.interface.available_ports()
    }

    /// Open `port` and start the receive loop.
    ///
    /// Any previous connection is closed first. The outcome is also reported
    /// as a log event, so callers driving a display may ignore the result.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<(), LinkError> {
        if !is_standard_baud(baud) {
            let err = LinkError::InvalidBaudRate(baud);
            tracing::error!("{}", err);
            self.events.error(err.to_string());
            return Err(err);
        }

        let mut guard = self.connection.lock().await;
        if let Some(previous) = guard.take() {
            tracing::info!("Closing {} before reconnecting", previous.port_name);
            self.close(previous).await;
        }

        tracing::info!("Connecting to printer: {} at {} baud", port, baud);
        let stream = match self.interface.open(port, baud).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = LinkError::Open { port: port.to_string(), source };
                tracing::error!("{}", err);
                self.events.error(err.to_string());
                return Err(err);
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(receive_loop(
            stream.clone(),
            running.clone(),
            self.events.clone(),
            self.read_timeout,
        ));
        *guard = Some(Connection {
            port_name: port.to_string(),
            baud,
            stream,
            running,
            reader,
        });

        self.events.info(format!("Connected to {} at {}bps.", port, baud));
        self.events.connection(true);
        Ok(())
    }

    /// Stop the receive loop and release the port. Safe to call at any time.
    pub async fn disconnect(&self) {
        let previous = self.connection.lock().await.take();
        match previous {
            Some(connection) => {
                let port = connection.port_name.clone();
                // A lost connection has already announced itself
                let was_open = connection.is_open();
                self.close(connection).await;
                tracing::info!("Disconnected from {}", port);
                self.events.info("Disconnected.");
                if was_open {
                    self.events.connection(false);
                }
            }
            None => tracing::debug!("Disconnect requested while not connected"),
        }
    }

    async fn close(&self, mut connection: Connection) {
        connection.running.store(false, Ordering::SeqCst);
        // The loop re-checks the flag after every read timeout.
        let grace = self.read_timeout + Duration::from_millis(50);
        if timeout(grace, &mut connection.reader).await.is_err() {
            tracing::warn!("Receive loop for {} did not stop in time, aborting", connection.port_name);
            connection.reader.abort();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_open)
    }

    pub async fn port_name(&self) -> Option<String> {
        self.connection.lock().await.as_ref().map(|c| c.port_name.clone())
    }

    pub async fn baud_rate(&self) -> Option<u32> {
        self.connection.lock().await.as_ref().map(|c| c.baud)
    }

    /// Write one command. Trailing whitespace is trimmed and a single `\n`
    /// appended; a command with embedded newlines goes out as several lines.
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        let lines: Vec<&str> = command
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return Ok(());
        }

        let guard = self.connection.lock().await;
        let Some(connection) = guard.as_ref().filter(|c| c.is_open()) else {
            tracing::warn!("Dropping command while disconnected: {}", command.trim());
            self.events.error("Not connected.");
            return Err(LinkError::NotConnected);
        };

        for line in lines {
            let framed = format!("{}\n", line);
            tracing::debug!("Serial TX: {}", line);
            let result = match timeout(WRITE_TIMEOUT, connection.stream.write_all(framed.as_bytes())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LinkError::Write(e)),
                Err(_) => Err(LinkError::WriteTimeout),
            };
            if let Err(err) = result {
                tracing::error!("Failed to send '{}': {}", line, err);
                self.events.error(format!("Command send failed: {}", err));
                return Err(err);
            }
            self.events.echo(line);
        }
        Ok(())
    }

    /// Send each command in order, stopping at the first failure.
    pub async fn send_all<I, S>(&self, commands: I) -> Result<(), LinkError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for command in commands {
            self.send(command.as_ref()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandSink for SerialLink {
    async fn send_line(&self, line: &str) -> Result<(), LinkError> {
        self.send(line).await
    }

    async fn is_connected(&self) -> bool {
        SerialLink::is_connected(self).await
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.running.store(false, Ordering::SeqCst);
            connection.reader.abort();
        }
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_connection_loss(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound
    )
}

/// Drain the device until a stop is requested or the device disappears.
async fn receive_loop(
    stream: Arc<dyn SerialStream>,
    running: Arc<AtomicBool>,
    events: EventBus,
    read_timeout: Duration,
) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut lost = false;

    while running.load(Ordering::SeqCst) {
        match timeout(read_timeout, stream.read(&mut buf)).await {
            // Nothing arrived within the timeout
            Err(_) => continue,
            Ok(Ok(0)) => {
                tracing::info!("Serial connection closed by remote");
                events.error("Connection closed by device.");
                lost = true;
                break;
            }
            Ok(Ok(n)) => {
                tracing::trace!("Read {} bytes from serial", n);
                for line in assembler.push(&buf[..n]) {
                    tracing::debug!("Serial RX: {}", line);
                    events.received(line.as_str());
                    if let Some(sample) = parse_temperature(&line) {
                        events.telemetry(sample);
                    }
                }
            }
            Ok(Err(e)) if is_transient(&e) => continue,
            Ok(Err(e)) => {
                tracing::error!("Serial read error: {}", e);
                events.error(format!("Read error: {}", e));
                if is_connection_loss(&e) {
                    lost = true;
                    break;
                }
                // Line noise and framing errors are not fatal; back off and keep reading
                tokio::time::sleep(read_timeout).await;
            }
        }
    }

    if lost && running.swap(false, Ordering::SeqCst) {
        events.error("Connection lost.");
        events.connection(false);
    }
    tracing::info!("Serial receive loop terminated");
}
