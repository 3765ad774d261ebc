use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::EngineSettings;
use crate::signal::CancellationSignal;

/// Longest stretch of spinning between two looks at the cancellation signal.
pub const SPIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Additions folded per spin step, small enough to stay well under the check interval.
const SPIN_BATCH: u64 = 10_000;

/// Busy/idle split of one observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    pub run: Duration,
    pub sleep: Duration,
}

impl DutyCycle {
    pub fn new(percentage: u8, window: Duration) -> Self {
        let run = window * u32::from(percentage.min(100)) / 100;
        Self {
            run,
            sleep: window.saturating_sub(run),
        }
    }
}

/// What a worker did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub cycles: u64,
    pub busy: Duration,
}

impl WorkerReport {
    fn absorb(&mut self, other: WorkerReport) {
        self.cycles += other.cycles;
        self.busy += other.busy;
    }
}

/// Runs duty cycles on the calling thread until `signal` fires.
pub fn run_worker(duty: DutyCycle, signal: &CancellationSignal) -> WorkerReport {
    let mut report = WorkerReport::default();

    while !signal.is_triggered() {
        let begin = Instant::now();
        let cancelled = spin(begin, duty.run, signal);
        report.busy += begin.elapsed();
        report.cycles += 1;

        if cancelled {
            break;
        }
        if !duty.sleep.is_zero() && signal.wait_timeout(duty.sleep) {
            break;
        }
    }

    report
}

/// Burns CPU until `run` has elapsed since `begin`. Returns `true` if the
/// signal was seen fired first.
fn spin(begin: Instant, run: Duration, signal: &CancellationSignal) -> bool {
    let mut last_check = begin;
    let mut acc = 0u64;
    loop {
        let now = Instant::now();
        if now.duration_since(begin) >= run {
            std::hint::black_box(acc);
            return false;
        }
        if now.duration_since(last_check) >= SPIN_CHECK_INTERVAL {
            if signal.is_triggered() {
                return true;
            }
            last_check = now;
        }
        acc = (0..SPIN_BATCH).fold(acc, |acc, x| acc.wrapping_add(x));
        acc = std::hint::black_box(acc);
    }
}

/// Holds one slot of the live-worker count until the worker closure is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A spawn that failed part way. `started` holds the threads that did start;
/// the caller must cancel and join them.
#[derive(Debug)]
pub struct PartialSpawn {
    pub error: io::Error,
    pub started: Vec<JoinHandle<WorkerReport>>,
}

/// Spawns `settings.workers` named worker threads sharing `signal`.
pub fn spawn_workers(
    settings: &EngineSettings,
    duty: DutyCycle,
    signal: &CancellationSignal,
    live: &Arc<AtomicUsize>,
) -> Result<Vec<JoinHandle<WorkerReport>>, PartialSpawn> {
    let generation = signal.generation();
    let pin_cores = settings.pin_cores;
    let mut handles = Vec::with_capacity(settings.workers);

    for index in 0..settings.workers {
        let worker_signal = signal.clone();
        let guard = LiveGuard::enter(live);
        let mut builder = thread::Builder::new().name(format!("cpu-load-{}-{}", generation, index));
        if let Some(stack_size) = settings.worker_stack_size {
            builder = builder.stack_size(stack_size);
        }
        let spawned = builder.spawn(move || {
            let _guard = guard;
            if pin_cores {
                if let Err(err) = pin_to_core(index) {
                    warn!(worker = index, error = %err, "could not pin worker to core");
                }
            }
            run_worker(duty, &worker_signal)
        });

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                return Err(PartialSpawn {
                    error,
                    started: handles,
                })
            }
        }
    }

    debug!(generation, workers = settings.workers, "worker threads spawned");
    Ok(handles)
}

/// Joins every handle and sums their reports. Blocks the calling thread.
pub fn join_workers(handles: Vec<JoinHandle<WorkerReport>>) -> WorkerReport {
    let mut total = WorkerReport::default();
    for handle in handles {
        match handle.join() {
            Ok(report) => total.absorb(report),
            Err(_) => warn!("worker thread panicked"),
        }
    }
    total
}

#[cfg(target_os = "linux")]
fn pin_to_core(index: usize) -> io::Result<()> {
    let core = index % num_cpus::get().max(1);
    // SAFETY: cpu_set_t is plain data and `core` is below the online CPU count.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_index: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(20);

    fn run_for(percentage: u8, wall: Duration) -> WorkerReport {
        let signal = CancellationSignal::new(1);
        let worker = {
            let signal = signal.clone();
            thread::spawn(move || run_worker(DutyCycle::new(percentage, WINDOW), &signal))
        };
        thread::sleep(wall);
        signal.trigger();
        worker.join().unwrap()
    }

    #[test]
    fn duty_cycle_splits_window() {
        let window = Duration::from_millis(100);
        assert_eq!(
            DutyCycle::new(70, window),
            DutyCycle {
                run: Duration::from_millis(70),
                sleep: Duration::from_millis(30),
            }
        );
        assert_eq!(DutyCycle::new(0, window).run, Duration::ZERO);
        assert_eq!(DutyCycle::new(100, window).sleep, Duration::ZERO);
        assert_eq!(DutyCycle::new(250, window).run, window);
    }

    #[test]
    fn idle_worker_barely_spins() {
        let report = run_for(0, Duration::from_millis(200));
        assert!(report.cycles >= 1);
        assert!(report.busy < Duration::from_millis(20), "busy {:?}", report.busy);
    }

    #[test]
    fn full_worker_spins_until_cancelled() {
        let wall = Duration::from_millis(300);
        let report = run_for(100, wall);
        assert!(report.busy >= wall.mul_f64(0.9), "busy {:?}", report.busy);
    }

    #[test]
    fn busy_time_tracks_percentage() {
        let wall = Duration::from_millis(600);
        let report = run_for(50, wall);
        let ratio = report.busy.as_secs_f64() / wall.as_secs_f64();
        assert!((0.25..=0.75).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn cancellation_is_prompt_while_spinning() {
        let signal = CancellationSignal::new(1);
        let worker = {
            let signal = signal.clone();
            thread::spawn(move || {
                run_worker(DutyCycle::new(100, Duration::from_secs(10)), &signal)
            })
        };
        thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        signal.trigger();
        worker.join().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn cancellation_skips_remaining_sleep() {
        let signal = CancellationSignal::new(1);
        let worker = {
            let signal = signal.clone();
            thread::spawn(move || run_worker(DutyCycle::new(0, Duration::from_secs(10)), &signal))
        };
        thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        signal.trigger();
        worker.join().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    }

    fn settings(workers: usize, worker_stack_size: Option<usize>) -> EngineSettings {
        EngineSettings {
            window: WINDOW,
            workers,
            pin_cores: false,
            drain_timeout: Duration::from_secs(2),
            worker_stack_size,
        }
    }

    #[test]
    fn spawned_workers_are_counted_until_joined() {
        let live = Arc::new(AtomicUsize::new(0));
        let signal = CancellationSignal::new(4);
        let handles =
            spawn_workers(&settings(3, None), DutyCycle::new(10, WINDOW), &signal, &live).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 3);

        signal.trigger();
        join_workers(handles);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_spawn_releases_its_slot() {
        let live = Arc::new(AtomicUsize::new(0));
        let signal = CancellationSignal::new(5);
        // no address space can back a stack this large
        let partial = spawn_workers(
            &settings(3, Some(1 << 60)),
            DutyCycle::new(10, WINDOW),
            &signal,
            &live,
        )
        .unwrap_err();

        assert!(partial.started.is_empty());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!signal.is_triggered());
    }
}
