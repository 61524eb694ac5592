//! Sweep scheduler: enumerates the (noise, inflow, cost, seed) grid and runs
//! every paired job on a fixed pool of worker threads.
//!
//! Workers receive jobs over their own command channel and report back on a
//! shared event channel. The dispatcher hands the next pending job to
//! whichever worker reports first, then re-sequences results by job id.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::analysis::survival::SurvivalRecord;
use crate::config::{Config, SimConfig, SnapshotConfig, SweepConfig};
use crate::error::{Result, SimError};
use crate::run::{run_mode, RunOutcome};
use crate::world::{Mode, World};

/// Tolerance when matching snapshot targets against grid values
const PARAM_TOLERANCE: f64 = 1e-9;

/// One grid point: a paired random/informed run for one seed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: usize,
    pub noise: f64,
    pub inflow: f64,
    pub cost: f64,
    pub seed: u64,
}

impl Job {
    /// Engine configuration for this grid point
    pub fn sim_config(&self, base: &SimConfig) -> SimConfig {
        SimConfig {
            seed: self.seed,
            inflow_rate: self.inflow,
            intelligence_cost: self.cost,
            sensing_noise: self.noise,
            ..base.clone()
        }
    }

    /// Ticks requested by snapshot targets matching this job
    pub fn snapshot_ticks(&self, snapshots: &SnapshotConfig) -> Vec<u64> {
        let close = |a: f64, b: f64| (a - b).abs() <= PARAM_TOLERANCE;
        let mut ticks: Vec<u64> = snapshots
            .targets
            .iter()
            .filter(|t| {
                t.seed == self.seed
                    && close(t.cost, self.cost)
                    && close(t.noise, self.noise)
                    && close(t.inflow, self.inflow)
            })
            .map(|t| t.tick)
            .collect();
        ticks.sort_unstable();
        ticks.dedup();
        ticks
    }
}

/// Enumerate jobs with noise outermost, then inflow, cost and seed
pub fn enumerate_jobs(sweep: &SweepConfig) -> Vec<Job> {
    let mut jobs = Vec::with_capacity(sweep.job_count());
    for &noise in &sweep.noises {
        for &inflow in &sweep.inflows {
            for &cost in &sweep.costs {
                for &seed in &sweep.seeds {
                    jobs.push(Job {
                        id: jobs.len(),
                        noise,
                        inflow,
                        cost,
                        seed,
                    });
                }
            }
        }
    }
    jobs
}

/// Both runs of one job, started from the same master state
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: Job,
    pub random: RunOutcome,
    pub informed: RunOutcome,
}

impl JobResult {
    pub fn survival_records(&self) -> Vec<SurvivalRecord> {
        [&self.random, &self.informed]
            .iter()
            .filter_map(|outcome| outcome.summary.survival_record())
            .collect()
    }
}

/// Build the master state for a job and run both modes from copies of it
pub fn run_job(job: &Job, config: &Config) -> Result<JobResult> {
    let sim = job.sim_config(&config.sim);
    let state = World::master_state(&sim)?;
    let ticks = job.snapshot_ticks(&config.snapshots);

    let random = run_mode(&sim, &config.run, state.clone(), Mode::Random, &ticks)?;
    let informed = run_mode(&sim, &config.run, state, Mode::Informed, &ticks)?;

    Ok(JobResult {
        job: *job,
        random,
        informed,
    })
}

/// Commands sent from the dispatcher to a worker
#[derive(Debug)]
pub enum WorkerCommand {
    Run(Job),
    Shutdown,
}

/// Completion messages sent from workers to the dispatcher
#[derive(Debug)]
pub enum WorkerEvent {
    Completed {
        worker: usize,
        result: Box<JobResult>,
    },
    Failed {
        worker: usize,
        job_id: usize,
        message: String,
    },
}

struct Worker {
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(id: usize, config: Arc<Config>, events: Sender<WorkerEvent>) -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("sweep-worker-{}", id))
            .spawn(move || worker_loop(id, config, command_rx, events))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("sweep worker thread panicked outside a job");
            }
        }
    }
}

/// Worker loop: run jobs until told to stop or the dispatcher goes away
fn worker_loop(id: usize, config: Arc<Config>, commands: Receiver<WorkerCommand>, events: Sender<WorkerEvent>) {
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Run(job) => {
                let started = Instant::now();
                let event = match catch_panic(|| run_job(&job, &config)) {
                    Ok(Ok(result)) => {
                        debug!("worker {} finished job {} in {:?}", id, job.id, started.elapsed());
                        WorkerEvent::Completed {
                            worker: id,
                            result: Box::new(result),
                        }
                    }
                    Ok(Err(e)) => WorkerEvent::Failed {
                        worker: id,
                        job_id: job.id,
                        message: e.to_string(),
                    },
                    Err(message) => WorkerEvent::Failed {
                        worker: id,
                        job_id: job.id,
                        message,
                    },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that records location and backtrace for panics raised
/// inside `catch_panic` on the panicking thread
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map_or_else(|| "unknown location".to_string(), |l| l.to_string());
                let trace = format!("at {}\nstack backtrace:\n{}", location, Backtrace::force_capture());
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// Run `f`; a panic becomes a message with payload, location and backtrace
fn catch_panic<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    install_panic_hook();
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());
    CAPTURING.with(|c| c.set(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(false));

    outcome.map_err(|payload| {
        let message = panic_message(payload.as_ref());
        match PANIC_TRACE.with(|slot| slot.borrow_mut().take()) {
            Some(trace) => format!("{}\n{}", message, trace),
            None => message,
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with unknown payload".to_string()
    }
}

/// Runs a full sweep from a validated configuration
pub struct SweepScheduler {
    config: Arc<Config>,
    workers: usize,
}

impl SweepScheduler {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let workers = config.sweep.resolved_workers();
        Ok(Self {
            config: Arc::new(config),
            workers,
        })
    }

    /// Override the worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every job in the grid, returning results in job id order
    pub fn run(&self) -> Result<Vec<JobResult>> {
        let jobs = enumerate_jobs(&self.config.sweep);
        execute(Arc::clone(&self.config), jobs, self.workers)
    }
}

/// Run `jobs` on `workers` threads. Any failure stops dispatch, shuts the
/// pool down once in-flight jobs drain, and is returned with its job id.
pub fn execute(config: Arc<Config>, jobs: Vec<Job>, workers: usize) -> Result<Vec<JobResult>> {
    let total = jobs.len();
    let workers = workers.clamp(1, total.max(1));
    let progress_interval = config.logging.progress_interval;
    let started = Instant::now();
    info!("Running {} jobs on {} workers", total, workers);

    let (event_tx, event_rx) = mpsc::channel();
    let mut pool = Vec::with_capacity(workers);
    for id in 0..workers {
        pool.push(Worker::spawn(id, Arc::clone(&config), event_tx.clone())?);
    }
    drop(event_tx);

    let mut pending = jobs.into_iter();
    let mut in_flight = 0usize;
    let mut failure: Option<(usize, String)> = None;
    let mut results = Vec::with_capacity(total);

    for worker in &pool {
        let Some(job) = pending.next() else { break };
        let job_id = job.id;
        if worker.commands.send(WorkerCommand::Run(job)).is_err() {
            failure.get_or_insert((job_id, "worker exited before dispatch".to_string()));
            break;
        }
        in_flight += 1;
    }

    while in_flight > 0 {
        let Ok(event) = event_rx.recv() else {
            failure.get_or_insert((usize::MAX, "all workers disconnected".to_string()));
            break;
        };
        in_flight -= 1;

        match event {
            WorkerEvent::Completed { worker, result } => {
                results.push(*result);
                let done = results.len();
                if progress_interval > 0 && (done % progress_interval == 0 || done == total) {
                    info!(
                        "Progress: {}/{} jobs ({:.1}%) in {:.1}s",
                        done,
                        total,
                        100.0 * done as f64 / total as f64,
                        started.elapsed().as_secs_f64()
                    );
                }

                if failure.is_none() {
                    if let Some(job) = pending.next() {
                        let job_id = job.id;
                        if pool[worker].commands.send(WorkerCommand::Run(job)).is_err() {
                            failure = Some((job_id, format!("worker {} exited", worker)));
                        } else {
                            in_flight += 1;
                        }
                    }
                }
            }
            WorkerEvent::Failed {
                worker,
                job_id,
                message,
            } => {
                error!("Job {} failed on worker {}: {}", job_id, worker, message);
                failure.get_or_insert((job_id, message));
            }
        }
    }

    for worker in &pool {
        let _ = worker.commands.send(WorkerCommand::Shutdown);
    }
    for worker in &mut pool {
        worker.join();
    }

    if let Some((job_id, message)) = failure {
        return Err(SimError::JobFailed { job_id, message });
    }
    if results.len() != total {
        return Err(SimError::JobFailed {
            job_id: results.len(),
            message: format!("collected {} of {} results", results.len(), total),
        });
    }

    results.sort_by_key(|r| r.job.id);
    info!("Sweep finished in {:.1}s", started.elapsed().as_secs_f64());
    Ok(results)
}
