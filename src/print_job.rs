// src/print_job.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::communication::event_system::EventBus;
use crate::communication::serial::LinkError;
use crate::config::JobConfig;

/// Lines starting with this are dropped when a job is loaded.
pub const COMMENT_MARKER: char = ';';

#[derive(Debug, Error)]
pub enum PrintJobError {
    #[error("No G-code file loaded")]
    NoJob,
    #[error("Print already in progress")]
    AlreadyPrinting,
    #[error("Printer not connected")]
    NotConnected,
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintState {
    Idle,
    Printing,
    Paused,
    Stopped,
    Completed,
}

/// Where the controller sends job lines. Implemented by `SerialLink`.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_line(&self, line: &str) -> Result<(), LinkError>;
    async fn is_connected(&self) -> bool;
}

/// A loaded G-code program and the index of the next line to send.
#[derive(Debug, Clone)]
pub struct PrintJob {
    id: Uuid,
    name: String,
    lines: Vec<String>,
    cursor: usize,
}

impl PrintJob {
    /// Build a job from raw file lines, keeping only non-blank, non-comment lines.
    pub fn from_lines<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
            .collect();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            lines,
            cursor: 0,
        }
    }

    pub fn empty() -> Self {
        Self::from_lines("", std::iter::empty::<&str>())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.cursor
    }

    /// Whole percent of lines sent, rounded down.
    pub fn progress_percent(&self) -> u8 {
        if self.lines.is_empty() {
            return 0;
        }
        (self.cursor * 100 / self.lines.len()) as u8
    }
}

struct Inner {
    job: PrintJob,
    state: PrintState,
    /// Bumped whenever a pacing task is started or the job replaced; a task
    /// whose generation no longer matches exits without touching the job.
    generation: u64,
    pacer: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    sink: Arc<dyn CommandSink>,
    events: EventBus,
    state_tx: watch::Sender<PrintState>,
    pacing_delay: Duration,
    pause_poll: Duration,
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: PrintState) {
        inner.state = state;
        self.state_tx.send_replace(state);
        self.events.state_changed(state);
        tracing::debug!("Print state -> {:?}", state);
    }

    fn reject(&self, err: PrintJobError) -> PrintJobError {
        tracing::warn!("Rejected print command: {}", err);
        self.events.error(err.to_string());
        err
    }
}

/// Streams one job at a time through a `CommandSink`.
///
/// `Idle -> Printing <-> Paused`, `Printing|Paused -> Stopped`,
/// `Printing -> Completed`. Cheap to clone; clones share the same job.
#[derive(Clone)]
pub struct PrintJobController {
    shared: Arc<Shared>,
}

impl PrintJobController {
    pub fn new(sink: Arc<dyn CommandSink>, events: EventBus, config: &JobConfig) -> Self {
        let (state_tx, _) = watch::channel(PrintState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    job: PrintJob::empty(),
                    state: PrintState::Idle,
                    generation: 0,
                    pacer: None,
                }),
                sink,
                events,
                state_tx,
                pacing_delay: config.pacing_delay(),
                pause_poll: config.pause_poll(),
            }),
        }
    }

    /// Replace the current job. Returns the number of lines kept.
    pub async fn load_job<I, S>(&self, name: &str, lines: I) -> Result<usize, PrintJobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if matches!(inner.state, PrintState::Printing | PrintState::Paused) {
            return Err(shared.reject(PrintJobError::InvalidTransition(
                "stop the current print before loading another file".to_string(),
            )));
        }

        inner.job = PrintJob::from_lines(name, lines);
        inner.generation += 1;
        let count = inner.job.len();
        shared.set_state(&mut inner, PrintState::Idle);
        shared.events.progress(0);
        tracing::info!("Loaded job {} from '{}' with {} lines", inner.job.id(), name, count);
        shared.events.info(format!("G-code file loaded: {} ({} lines)", name, count));
        Ok(count)
    }

    /// Begin streaming from the first line.
    pub async fn start(&self) -> Result<(), PrintJobError> {
        let shared = &self.shared;
        let connected = shared.sink.is_connected().await;
        let mut inner = shared.inner.lock().await;
        match inner.state {
            PrintState::Printing => return Err(shared.reject(PrintJobError::AlreadyPrinting)),
            PrintState::Paused => {
                return Err(shared.reject(PrintJobError::InvalidTransition(
                    "print is paused, resume or stop it".to_string(),
                )));
            }
            PrintState::Idle | PrintState::Stopped | PrintState::Completed => {}
        }
        if inner.job.is_empty() {
            return Err(shared.reject(PrintJobError::NoJob));
        }
        if !connected {
            return Err(shared.reject(PrintJobError::NotConnected));
        }

        inner.job.cursor = 0;
        shared.set_state(&mut inner, PrintState::Printing);
        shared.events.progress(0);
        tracing::info!("Starting print job {} ({} lines)", inner.job.id(), inner.job.len());
        shared.events.info(format!("Print started: {} ({} lines)", inner.job.name(), inner.job.len()));
        self.spawn_pacer(&mut inner);
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), PrintJobError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state != PrintState::Printing {
            return Err(shared.reject(PrintJobError::InvalidTransition(format!(
                "cannot pause while {:?}",
                inner.state
            ))));
        }
        shared.set_state(&mut inner, PrintState::Paused);
        tracing::info!("Print paused at line {}/{}", inner.job.cursor(), inner.job.len());
        shared.events.info("Print paused.");
        Ok(())
    }

    /// Continue a paused print from the line after the last one sent.
    pub async fn resume(&self) -> Result<(), PrintJobError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state != PrintState::Paused || inner.job.remaining() == 0 {
            return Err(shared.reject(PrintJobError::InvalidTransition(format!(
                "cannot resume while {:?}",
                inner.state
            ))));
        }
        shared.set_state(&mut inner, PrintState::Printing);
        tracing::info!("Print resumed at line {}/{}", inner.job.cursor(), inner.job.len());
        shared.events.info("Print resumed.");
        // The pacer waiting in its pause branch wakes on the state change;
        // start a fresh one only if it has already gone away.
        if inner.pacer.as_ref().is_none_or(JoinHandle::is_finished) {
            self.spawn_pacer(&mut inner);
        }
        Ok(())
    }

    /// Abandon the current print. The cursor jumps to the end so the pacer
    /// sends nothing further.
    pub async fn stop(&self) -> Result<(), PrintJobError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        match inner.state {
            PrintState::Printing | PrintState::Paused => {
                inner.job.cursor = inner.job.len();
                shared.set_state(&mut inner, PrintState::Stopped);
                shared.events.progress(0);
                tracing::info!("Print job {} stopped", inner.job.id());
                shared.events.info("Print stopped.");
                Ok(())
            }
            PrintState::Stopped => Ok(()),
            state => Err(shared.reject(PrintJobError::InvalidTransition(format!(
                "cannot stop while {:?}",
                state
            )))),
        }
    }

    pub async fn state(&self) -> PrintState {
        self.shared.inner.lock().await.state
    }

    pub async fn cursor(&self) -> usize {
        self.shared.inner.lock().await.job.cursor()
    }

    pub async fn total_lines(&self) -> usize {
        self.shared.inner.lock().await.job.len()
    }

    pub async fn progress(&self) -> u8 {
        let inner = self.shared.inner.lock().await;
        match inner.state {
            PrintState::Stopped => 0,
            _ => inner.job.progress_percent(),
        }
    }

    pub async fn job_id(&self) -> Uuid {
        self.shared.inner.lock().await.job.id()
    }

    /// Snapshot of the current job, cursor included.
    pub async fn job(&self) -> PrintJob {
        self.shared.inner.lock().await.job.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PrintState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the current print has completed or been stopped.
    pub async fn wait_until_finished(&self) -> PrintState {
        let mut rx = self.subscribe_state();
        let finished = rx
            .wait_for(|state| matches!(state, PrintState::Completed | PrintState::Stopped | PrintState::Idle))
            .await
            .map(|state| *state);
        match finished {
            Ok(state) => state,
            // The sender lives as long as `self`
            Err(_) => self.state().await,
        }
    }

    fn spawn_pacer(&self, inner: &mut Inner) {
        inner.generation += 1;
        let generation = inner.generation;
        let shared = self.shared.clone();
        inner.pacer = Some(tokio::spawn(pacing_loop(shared, generation)));
    }
}

impl std::fmt::Debug for PrintJobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintJobController")
            .field("pacing_delay", &self.shared.pacing_delay)
            .field("pause_poll", &self.shared.pause_poll)
            .finish_non_exhaustive()
    }
}

enum Step {
    Send(String),
    Wait,
    Exit,
}

async fn pacing_loop(shared: Arc<Shared>, generation: u64) {
    let mut state_rx = shared.state_tx.subscribe();
    loop {
        let step = {
            let inner = shared.inner.lock().await;
            if inner.generation != generation {
                Step::Exit
            } else {
                match inner.state {
                    PrintState::Printing => match inner.job.lines.get(inner.job.cursor) {
                        Some(line) => Step::Send(line.clone()),
                        None => Step::Exit,
                    },
                    PrintState::Paused => Step::Wait,
                    _ => Step::Exit,
                }
            }
        };

        let line = match step {
            Step::Send(line) => line,
            Step::Wait => {
                // Woken by the next state change, re-checked at least every poll interval
                let _ = tokio::time::timeout(shared.pause_poll, state_rx.changed()).await;
                continue;
            }
            Step::Exit => break,
        };

        if let Err(e) = shared.sink.send_line(&line).await {
            let mut inner = shared.inner.lock().await;
            if inner.generation == generation && inner.state == PrintState::Printing {
                let at = inner.job.cursor() + 1;
                shared.set_state(&mut inner, PrintState::Paused);
                tracing::error!("Print paused at line {}: {}", at, e);
                shared.events.error(format!("Print paused at line {}: {}", at, e));
            }
            continue;
        }

        {
            let mut inner = shared.inner.lock().await;
            if inner.generation != generation || !matches!(inner.state, PrintState::Printing | PrintState::Paused) {
                break;
            }
            inner.job.cursor += 1;
            shared.events.progress(inner.job.progress_percent());
            if inner.job.remaining() == 0 {
                shared.set_state(&mut inner, PrintState::Completed);
                tracing::info!("Print job {} finished", inner.job.id());
                shared.events.info("Print finished.");
                shared.events.progress(100);
                break;
            }
        }

        tokio::time::sleep(shared.pacing_delay).await;
    }
    tracing::debug!("Pacing loop {} exited", generation);
}
