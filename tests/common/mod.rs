// Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use marlin_host::communication::serial::{LinkError, SerialInterface, SerialStream};
use marlin_host::communication::HostEvent;
use marlin_host::print_job::CommandSink;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

/// In-memory printer: tests push inbound bytes and inspect what was written.
pub struct FakeDevice {
    inbound: Mutex<(mpsc::UnboundedReceiver<Vec<u8>>, VecDeque<u8>)>,
    written: StdMutex<Vec<u8>>,
    pub fail_writes: AtomicBool,
    /// Number of upcoming reads that fail with a line-noise error.
    pub read_errors: AtomicU32,
}

#[async_trait]
impl SerialStream for FakeDevice {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.read_errors.load(Ordering::SeqCst);
        if pending > 0 {
            self.read_errors.store(pending - 1, Ordering::SeqCst);
            return Err(io::Error::other("parity error"));
        }
        let mut guard = self.inbound.lock().await;
        let (rx, leftover) = &mut *guard;
        if leftover.is_empty() {
            match rx.recv().await {
                Some(bytes) => leftover.extend(bytes),
                // The test dropped the sender: behave like an unplugged device
                None => return Ok(0),
            }
        }
        let n = buf.len().min(leftover.len());
        for (slot, byte) in buf.iter_mut().zip(leftover.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }
}

pub struct DeviceHandle {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pub device: Arc<FakeDevice>,
}

impl DeviceHandle {
    pub fn reply(&self, text: &str) {
        if let Some(tx) = &self.tx {
            tx.send(text.as_bytes().to_vec()).unwrap();
        }
    }

    /// Close the inbound side; the next read reports end of stream.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    pub fn written(&self) -> String {
        String::from_utf8(self.device.written.lock().unwrap().clone()).unwrap()
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.written().lines().map(str::to_string).collect()
    }
}

pub fn fake_device() -> DeviceHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    DeviceHandle {
        tx: Some(tx),
        device: Arc::new(FakeDevice {
            inbound: Mutex::new((rx, VecDeque::new())),
            written: StdMutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            read_errors: AtomicU32::new(0),
        }),
    }
}

/// Serves one fake device under a fixed port name; every other name is "not found".
pub struct FakeInterface {
    pub port: String,
    pub device: Arc<FakeDevice>,
}

#[async_trait]
impl SerialInterface for FakeInterface {
    async fn open(&self, port: &str, _baud: u32) -> io::Result<Arc<dyn SerialStream>> {
        if port == self.port {
            Ok(self.device.clone())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"))
        }
    }

    fn available_ports(&self) -> Vec<String> {
        vec![self.port.clone()]
    }
}

pub const FAKE_PORT: &str = "/dev/ttyFAKE0";

pub fn fake_interface() -> (Arc<FakeInterface>, DeviceHandle) {
    let handle = fake_device();
    let interface = Arc::new(FakeInterface {
        port: FAKE_PORT.to_string(),
        device: handle.device.clone(),
    });
    (interface, handle)
}

/// Records every line the controller sends and announces it on a channel.
pub struct RecordingSink {
    sent: StdMutex<Vec<String>>,
    notify: mpsc::UnboundedSender<String>,
    pub connected: AtomicBool,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            sent: StdMutex::new(Vec::new()),
            notify,
            connected: AtomicBool::new(true),
            fail: AtomicBool::new(false),
        });
        (sink, rx)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send_line(&self, line: &str) -> Result<(), LinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        self.sent.lock().unwrap().push(line.to_string());
        let _ = self.notify.send(line.to_string());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Wait for the first event matching `pred`, failing the test after two seconds.
pub async fn expect_event<F>(rx: &mut broadcast::Receiver<HostEvent>, mut pred: F) -> HostEvent
where
    F: FnMut(&HostEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything currently queued on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
