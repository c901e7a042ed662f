//! Bounded worker pool for one benchmark run.
//!
//! ## Protocol
//!
//! 1. One setup source is created and `initialize()`d. If that fails no worker
//!    is spawned.
//! 2. Exactly `concurrency` named threads are spawned, each creating and owning
//!    its own source. Failing to start all of them aborts the run.
//! 3. Every attempt becomes a [`WorkerMsg`] on one bounded channel. The calling
//!    thread is the only consumer and the only writer of the collector.
//! 4. The channel disconnects when the last worker drops its sender, so no
//!    sample can arrive after the collector is handed back.
//!
//! A fatal error from any worker raises the abort flag; workers stop before
//! their next iteration and the run's samples are discarded.

use crate::adapters::OperationSource;
use crate::collector::SampleCollector;
use crate::config::Config;
use crate::{BenchError, BenchResult, Sample};
use crossbeam_channel::{bounded, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Channel slots per worker.
const QUEUE_DEPTH_PER_WORKER: usize = 1024;

/// Identifies the source a factory is asked to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// 1-based run number.
    pub run: usize,
    /// Worker index, or `None` for the setup source.
    pub worker: Option<usize>,
}

impl Slot {
    pub fn setup(run: usize) -> Self {
        Self { run, worker: None }
    }

    pub fn worker(run: usize, worker: usize) -> Self {
        Self {
            run,
            worker: Some(worker),
        }
    }

    /// Independent RNG seed for this slot, derived from the base seed.
    pub fn seed(&self, base: u64) -> u64 {
        let worker = self.worker.map(|w| w as u64).unwrap_or(u64::MAX);
        splitmix64(
            base ^ splitmix64((self.run as u64) << 32 ^ worker.wrapping_add(0x9E37_79B9)),
        )
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

enum WorkerMsg {
    Sample(Sample),
    Fatal { worker: usize, error: BenchError },
}

/// Everything one successful run produced.
#[derive(Debug)]
pub struct RunStats {
    pub collector: SampleCollector,
    /// Wall-clock time from first spawn to last worker exit.
    pub elapsed: Duration,
    pub workers: usize,
}

/// Runs before each worker thread is spawned; an error stops spawning.
type SpawnCheck = fn(usize) -> io::Result<()>;

pub struct WorkerPool<F> {
    config: Arc<Config>,
    factory: F,
    spawn_check: SpawnCheck,
}

impl<S, F> WorkerPool<F>
where
    S: OperationSource,
    F: Fn(Slot) -> BenchResult<S> + Sync,
{
    pub fn new(config: Arc<Config>, factory: F) -> Self {
        Self {
            config,
            factory,
            spawn_check: |_| Ok(()),
        }
    }

    #[cfg(test)]
    fn with_spawn_check(mut self, check: SpawnCheck) -> Self {
        self.spawn_check = check;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute run number `run` to completion.
    pub fn run(&self, run: usize) -> BenchResult<RunStats> {
        let mut setup = (self.factory)(Slot::setup(run)).map_err(BenchError::during_setup)?;
        setup.initialize().map_err(BenchError::during_setup)?;
        drop(setup);

        let concurrency = self.config.concurrency;
        let iterations = self.config.iterations;
        let (tx, rx) = bounded::<WorkerMsg>((concurrency * QUEUE_DEPTH_PER_WORKER).max(1));
        let abort = AtomicBool::new(false);
        let start = Instant::now();

        let (collector, fatal) = thread::scope(|scope| {
            let mut spawn_error = None;
            for worker in 0..concurrency {
                let tx = tx.clone();
                let abort = &abort;
                let factory = &self.factory;
                let spawned = (self.spawn_check)(worker).and_then(|()| {
                    thread::Builder::new()
                        .name(format!("kvbench-worker-{}", worker))
                        .spawn_scoped(scope, move || {
                            worker_loop(factory, Slot::worker(run, worker), iterations, abort, tx)
                        })
                });
                if let Err(e) = spawned {
                    abort.store(true, Ordering::SeqCst);
                    spawn_error = Some(BenchError::Spawn {
                        started: worker,
                        requested: concurrency,
                        source: e,
                    });
                    break;
                }
            }
            drop(tx);

            let mut collector = SampleCollector::new();
            let mut fatal = spawn_error;
            for msg in rx.iter() {
                match msg {
                    WorkerMsg::Sample(sample) => {
                        if fatal.is_none() {
                            collector.record(sample);
                        }
                    }
                    WorkerMsg::Fatal { worker, error } => {
                        if fatal.is_none() {
                            error!(run, worker, %error, "worker failed, aborting run");
                            abort.store(true, Ordering::SeqCst);
                            fatal = Some(error);
                        }
                    }
                }
            }
            (collector, fatal)
        });

        if let Some(e) = fatal {
            return Err(e);
        }

        let elapsed = start.elapsed();
        debug!(
            run,
            workers = concurrency,
            samples = collector.received(),
            elapsed_ms = elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(RunStats {
            collector,
            elapsed,
            workers: concurrency,
        })
    }
}

fn worker_loop<S, F>(
    factory: &F,
    slot: Slot,
    iterations: usize,
    abort: &AtomicBool,
    tx: Sender<WorkerMsg>,
) where
    S: OperationSource,
    F: Fn(Slot) -> BenchResult<S>,
{
    let worker = slot.worker.unwrap_or_default();
    let mut source = match factory(slot) {
        Ok(s) => s,
        Err(error) => {
            let _ = tx.send(WorkerMsg::Fatal {
                worker,
                error: error.during_setup(),
            });
            return;
        }
    };
    debug!(run = slot.run, worker, "worker started");

    for _ in 0..iterations {
        if abort.load(Ordering::Relaxed) {
            debug!(run = slot.run, worker, "worker aborted");
            return;
        }
        let msg = match source.perform_one().into_sample() {
            Ok(sample) => WorkerMsg::Sample(sample),
            Err(error) => WorkerMsg::Fatal { worker, error },
        };
        let fatal = matches!(msg, WorkerMsg::Fatal { .. });
        if tx.send(msg).is_err() || fatal {
            return;
        }
    }
}
