use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_TEST_TIME_SECONDS: u64 = 600;
pub const DEFAULT_PERCENTAGE_CPU: u8 = 80;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_WINDOW_MS: u64 = 100;
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: u64 = 5;

/// Runtime-mutable load parameters. A run captures a copy at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Configuration {
    #[serde(rename = "test_time_seconds")]
    pub duration_seconds: u64,
    #[serde(rename = "percentage_cpu")]
    pub cpu_percentage: u8,
    #[serde(rename = "start_after")]
    pub start_delay_seconds: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            duration_seconds: DEFAULT_TEST_TIME_SECONDS,
            cpu_percentage: DEFAULT_PERCENTAGE_CPU,
            start_delay_seconds: 0,
        }
    }
}

impl Configuration {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    /// Applies every non-zero field of `update`. Zero or missing means "keep".
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<(), EngineError> {
        update.validate()?;
        if let Some(secs) = update.duration_seconds.filter(|v| *v != 0) {
            self.duration_seconds = secs;
        }
        if let Some(pct) = update.cpu_percentage.filter(|v| *v != 0) {
            // validate() bounds this to 100
            self.cpu_percentage = pct as u8;
        }
        if let Some(delay) = update.start_delay_seconds.filter(|v| *v != 0) {
            self.start_delay_seconds = delay;
        }
        Ok(())
    }
}

/// Partial configuration accepted by `POST /simulation/config`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    #[serde(
        rename = "test_time_seconds",
        alias = "duration_seconds",
        alias = "durationSeconds"
    )]
    pub duration_seconds: Option<u64>,
    #[serde(
        rename = "percentage_cpu",
        alias = "cpu_percentage",
        alias = "cpuPercentage"
    )]
    pub cpu_percentage: Option<u64>,
    #[serde(
        rename = "start_after",
        alias = "start_delay_seconds",
        alias = "startDelaySeconds"
    )]
    pub start_delay_seconds: Option<u64>,
}

impl ConfigUpdate {
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.cpu_percentage {
            Some(pct) if pct > 100 => Err(EngineError::Validation(format!(
                "percentage_cpu must be between 0 and 100, got {}",
                pct
            ))),
            _ => Ok(()),
        }
    }
}

/// Process-level engine knobs fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Length of one busy/sleep observation window.
    pub window: Duration,
    /// Number of worker threads per run.
    pub workers: usize,
    /// Pin worker `i` to core `i` (best effort, Linux only).
    pub pin_cores: bool,
    /// Upper bound on how long stop waits for workers to exit.
    pub drain_timeout: Duration,
    /// Stack size for worker threads; `None` keeps the platform default.
    pub worker_stack_size: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(DEFAULT_WINDOW_MS),
            workers: num_cpus::get(),
            pin_cores: false,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECONDS),
            worker_stack_size: None,
        }
    }
}

/// Command line and environment configuration.
///
/// Every numeric option falls back to its default when unset or zero.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Synthetic CPU load generator for autoscaling tests", long_about = None)]
pub struct ServiceArgs {
    #[arg(
        long,
        env = "TEST_TIME_SECONDS",
        default_value_t = DEFAULT_TEST_TIME_SECONDS,
        help = "Seconds a run lasts before it stops on its own"
    )]
    pub test_time_seconds: u64,

    #[arg(
        long,
        env = "PERCENTAGE_CPU",
        default_value_t = u64::from(DEFAULT_PERCENTAGE_CPU),
        help = "Share of each window every core spends busy (0-100)"
    )]
    pub percentage_cpu: u64,

    #[arg(
        long,
        env = "START_AFTER",
        default_value_t = 0,
        help = "Start a run automatically after this many seconds (0 disables)"
    )]
    pub start_after: u64,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(
        long,
        env = "WINDOW_MS",
        default_value_t = DEFAULT_WINDOW_MS,
        help = "Duty-cycle window in milliseconds"
    )]
    pub window_ms: u64,

    #[arg(
        long,
        env = "WORKERS",
        default_value_t = 0,
        help = "Worker threads per run (0 = one per logical core)"
    )]
    pub workers: usize,

    #[arg(long, env = "PIN_CORES", help = "Pin each worker thread to its own core")]
    pub pin_cores: bool,

    #[arg(long, env = "DRAIN_TIMEOUT_SECONDS", default_value_t = DEFAULT_DRAIN_TIMEOUT_SECONDS)]
    pub drain_timeout_seconds: u64,

    #[arg(
        long,
        env = "WORKER_STACK_KIB",
        default_value_t = 0,
        help = "Worker thread stack size in KiB (0 = platform default)"
    )]
    pub worker_stack_kib: usize,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

impl ServiceArgs {
    pub fn configuration(&self) -> Result<Configuration, EngineError> {
        let percentage = or_default(self.percentage_cpu, u64::from(DEFAULT_PERCENTAGE_CPU));
        if percentage > 100 {
            return Err(EngineError::Config(format!(
                "PERCENTAGE_CPU must be between 0 and 100, got {}",
                percentage
            )));
        }
        Ok(Configuration {
            duration_seconds: or_default(self.test_time_seconds, DEFAULT_TEST_TIME_SECONDS),
            cpu_percentage: percentage as u8,
            start_delay_seconds: self.start_after,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            window: Duration::from_millis(or_default(self.window_ms, DEFAULT_WINDOW_MS)),
            workers: or_default(self.workers, num_cpus::get()),
            pin_cores: self.pin_cores,
            drain_timeout: Duration::from_secs(or_default(
                self.drain_timeout_seconds,
                DEFAULT_DRAIN_TIMEOUT_SECONDS,
            )),
            worker_stack_size: (self.worker_stack_kib != 0)
                .then(|| self.worker_stack_kib.saturating_mul(1024)),
        }
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), or_default(self.port, DEFAULT_PORT))
    }
}
