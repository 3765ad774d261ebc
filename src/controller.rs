//! Run lifecycle for the CPU load simulation.
//!
//! The controller owns the configuration, the run state and the worker set
//! of the current generation. Every transition goes through one async mutex,
//! so start, stop, configuration updates and timeout expiry never interleave.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigUpdate, Configuration, EngineSettings};
use crate::error::EngineError;
use crate::signal::CancellationSignal;
use crate::worker::{self, DutyCycle, WorkerReport};

pub const MSG_STARTED: &str = "Simulation CPU load started.";
pub const MSG_ALREADY_STARTED: &str = "Simulation CPU load already in progress.";
pub const MSG_STOPPED: &str = "Simulation CPU load has been stopped by signal.";
pub const MSG_NOT_STARTED: &str = "Simulation CPU load was not initialized.";
pub const MSG_RUNNING: &str = "Simulation CPU load is running.";
pub const MSG_IDLE: &str = "Simulation CPU load is not running.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Started,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Started => "started",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{message, status}` body returned by the control endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub message: String,
    pub status: String,
}

impl ControlResponse {
    pub fn new(message: impl Into<String>, status: RunState) -> Self {
        Self {
            message: message.into(),
            status: status.to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: "error".to_string(),
        }
    }
}

struct ActiveRun {
    signal: CancellationSignal,
    /// Parameters captured at start; later config updates do not reach them.
    duty: DutyCycle,
    workers: Vec<JoinHandle<WorkerReport>>,
    watcher: Option<tokio::task::JoinHandle<()>>,
}

struct Inner {
    config: Configuration,
    last_generation: u64,
    /// `Some` exactly while a worker set is alive; this is the run state.
    run: Option<ActiveRun>,
}

struct Shared {
    settings: EngineSettings,
    live: Arc<AtomicUsize>,
    inner: Mutex<Inner>,
}

/// Cheaply cloneable handle to the single load engine of the process.
#[derive(Clone)]
pub struct LoadController {
    shared: Arc<Shared>,
}

impl LoadController {
    pub fn new(config: Configuration, settings: EngineSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                live: Arc::new(AtomicUsize::new(0)),
                inner: Mutex::new(Inner {
                    config,
                    last_generation: 0,
                    run: None,
                }),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Worker threads that have not exited yet, across all generations.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> RunState {
        let inner = self.shared.inner.lock().await;
        if inner.run.is_some() {
            RunState::Started
        } else {
            RunState::Stopped
        }
    }

    pub async fn status_response(&self) -> ControlResponse {
        match self.status().await {
            RunState::Started => ControlResponse::new(MSG_RUNNING, RunState::Started),
            RunState::Stopped => ControlResponse::new(MSG_IDLE, RunState::Stopped),
        }
    }

    pub async fn config(&self) -> Configuration {
        self.shared.inner.lock().await.config
    }

    /// Applies the non-zero fields of `update`. A running generation keeps
    /// the parameters it started with.
    pub async fn set_config(&self, update: ConfigUpdate) -> Result<Configuration, EngineError> {
        let mut inner = self.shared.inner.lock().await;
        inner.config.apply(&update)?;
        info!(
            duration_seconds = inner.config.duration_seconds,
            cpu_percentage = inner.config.cpu_percentage,
            start_delay_seconds = inner.config.start_delay_seconds,
            "configuration updated"
        );
        Ok(inner.config)
    }

    /// Starts a new generation unless one is already running.
    pub async fn start(&self) -> Result<ControlResponse, EngineError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.run.is_some() {
            info!("start requested while simulation is already running");
            return Ok(ControlResponse::new(MSG_ALREADY_STARTED, RunState::Started));
        }

        inner.last_generation += 1;
        let generation = inner.last_generation;
        let config = inner.config;
        let settings = &self.shared.settings;
        let signal = CancellationSignal::new(generation);
        let duty = DutyCycle::new(config.cpu_percentage, settings.window);

        let workers = match worker::spawn_workers(settings, duty, &signal, &self.shared.live) {
            Ok(workers) => workers,
            Err(partial) => {
                error!(
                    generation,
                    started = partial.started.len(),
                    error = %partial.error,
                    "failed to start simulation"
                );
                self.drain(ActiveRun {
                    signal,
                    duty,
                    workers: partial.started,
                    watcher: None,
                })
                .await;
                return Err(EngineError::Spawn(partial.error));
            }
        };

        let watcher = self.spawn_watcher(generation, config.duration());
        inner.run = Some(ActiveRun {
            signal,
            duty,
            workers,
            watcher: Some(watcher),
        });

        info!(
            generation,
            workers = settings.workers,
            cpu_percentage = config.cpu_percentage,
            duration_seconds = config.duration_seconds,
            "simulating CPU load has been started"
        );
        Ok(ControlResponse::new(MSG_STARTED, RunState::Started))
    }

    /// Cancels the current generation and waits for its workers to exit.
    pub async fn stop(&self) -> ControlResponse {
        let mut inner = self.shared.inner.lock().await;
        let Some(mut run) = inner.run.take() else {
            info!("stop requested while simulation is not running");
            return ControlResponse::new(MSG_NOT_STARTED, RunState::Stopped);
        };

        if let Some(watcher) = run.watcher.take() {
            watcher.abort();
        }
        let generation = run.signal.generation();
        self.drain(run).await;
        info!(generation, "simulating CPU load has been stopped by signal on all cores");
        ControlResponse::new(MSG_STOPPED, RunState::Stopped)
    }

    /// Starts a run after `delay`, the `START_AFTER` behaviour.
    pub fn schedule_start(&self, delay: Duration) -> tokio::task::JoinHandle<()> {
        info!(
            delay_seconds = delay.as_secs(),
            "CPU load will start automatically after the configured delay"
        );
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match controller.start().await {
                Ok(response) => info!(message = %response.message, "delayed start finished"),
                Err(err) => error!(error = %err, "delayed start failed"),
            }
        })
    }

    fn spawn_watcher(&self, generation: u64, after: Duration) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            controller.expire(generation).await;
        })
    }

    /// Ends `generation` on timeout. A stale generation is left alone.
    async fn expire(&self, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        let mut run = match take_generation(&mut inner, generation) {
            Ok(run) => run,
            Err(err) => {
                debug!(error = %err, "ignoring timeout of finished run");
                return;
            }
        };
        // Called from the watcher itself; aborting it here would cut the drain short.
        drop(run.watcher.take());
        self.drain(run).await;
        info!(generation, "simulating CPU has been ended by timeout");
    }

    /// Fires the run's signal and joins its workers, bounded by the drain timeout.
    async fn drain(&self, run: ActiveRun) {
        let ActiveRun {
            signal,
            duty,
            workers,
            ..
        } = run;
        let generation = signal.generation();
        if let Err(err) = cancel(&signal) {
            debug!(error = %err, "cancellation skipped");
        }

        let timeout = self.shared.settings.drain_timeout;
        let joined = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || worker::join_workers(workers)),
        )
        .await;

        match joined {
            Ok(Ok(report)) => debug!(
                generation,
                cycles = report.cycles,
                busy_ms = report.busy.as_millis() as u64,
                run_ms = duty.run.as_millis() as u64,
                sleep_ms = duty.sleep.as_millis() as u64,
                "workers drained"
            ),
            Ok(Err(err)) => error!(generation, error = %err, "worker join task failed"),
            Err(_) => warn!(
                generation,
                timeout_ms = timeout.as_millis() as u64,
                live = self.live_workers(),
                "workers did not exit within the drain timeout"
            ),
        }
    }
}

fn take_generation(inner: &mut Inner, generation: u64) -> Result<ActiveRun, EngineError> {
    match inner.run.take() {
        Some(run) if run.signal.generation() == generation => Ok(run),
        other => {
            let current = other.as_ref().map(|run| run.signal.generation());
            inner.run = other;
            Err(EngineError::StaleGeneration {
                requested: generation,
                current,
            })
        }
    }
}

fn cancel(signal: &CancellationSignal) -> Result<(), EngineError> {
    if signal.trigger() {
        Ok(())
    } else {
        Err(EngineError::AlreadyTriggered {
            generation: signal.generation(),
        })
    }
}
