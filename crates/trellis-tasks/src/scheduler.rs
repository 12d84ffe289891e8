//! Test scheduler: bounded-concurrency test execution using tokio
//!
//! Non-exclusive tests are drained from a shared FIFO by `min(tests, jobs)`
//! workers. Exclusive tests run afterwards, one at a time, once every
//! concurrent worker has finished. A monitor task polls the running jobs and
//! kills any that ran past their timeout; the worker then classifies the
//! result as usual.

use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use trellis_core::TargetKey;

use crate::job::{ScheduledTest, TestRunResult};
use crate::reporter::{TestEvent, TestReporter};
use crate::signals::{exit_code_of, INTERRUPTED, SPAWN_FAILURE};

/// How long to keep reading output after a process exits; children of a
/// killed test may hold the pipe open
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Options for the test scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent tests
    pub jobs: usize,
    /// Timeout monitor period
    pub poll_interval: Duration,
    /// Capture output even with a single worker
    pub quiet: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            poll_interval: Duration::from_secs(1),
            quiet: false,
        }
    }
}

/// Pass/fail maps filled by the workers
#[derive(Debug, Default)]
pub struct SchedulerResults {
    pub passed: HashMap<TargetKey, TestRunResult>,
    pub failed: HashMap<TargetKey, TestRunResult>,
    /// Tests killed by the timeout monitor (also present in `failed`)
    pub timed_out: HashSet<TargetKey>,
    /// The run was interrupted
    pub cancelled: bool,
}

impl SchedulerResults {
    /// Whether a result was recorded for `key`
    pub fn was_run(&self, key: &TargetKey) -> bool {
        self.passed.contains_key(key) || self.failed.contains_key(key)
    }
}

/// What a worker is running, read by the monitor
#[derive(Debug, Default)]
struct WorkerSlot {
    key: Option<TargetKey>,
    started: Option<Instant>,
    timeout: Option<Duration>,
    kill: Option<CancellationToken>,
    timed_out: bool,
}

type Slot = Arc<Mutex<WorkerSlot>>;
type Queue = Arc<Mutex<VecDeque<ScheduledTest>>>;
type Results = Arc<Mutex<SchedulerResults>>;

/// Test scheduler
pub struct TestScheduler {
    options: SchedulerOptions,
    reporter: Arc<dyn TestReporter>,
    cancel: CancellationToken,
}

impl TestScheduler {
    /// Create a new scheduler
    pub fn new(options: SchedulerOptions, reporter: Arc<dyn TestReporter>) -> Self {
        Self {
            options,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the caller (e.g. a Ctrl-C handler)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every test; returns once all workers have stopped
    #[instrument(skip_all, fields(tests = tests.len(), jobs = self.options.jobs))]
    pub async fn run(&self, tests: Vec<ScheduledTest>) -> SchedulerResults {
        let start = Instant::now();
        let (exclusive, concurrent): (VecDeque<_>, VecDeque<_>) =
            tests.into_iter().partition(|t| t.exclusive);

        let workers = concurrent.len().min(self.options.jobs.max(1));
        self.reporter.report(&TestEvent::Scheduled {
            total: concurrent.len() + exclusive.len(),
            workers,
            exclusive: exclusive.len(),
        });

        let results: Results = Arc::new(Mutex::new(SchedulerResults::default()));

        let redirect = workers > 1 || self.options.quiet;
        self.run_phase(concurrent, workers, redirect, &results).await;

        if !exclusive.is_empty() && !self.cancel.is_cancelled() {
            info!(count = exclusive.len(), "running exclusive tests");
            self.reporter.report(&TestEvent::ExclusivePhase {
                count: exclusive.len(),
            });
            self.run_phase(exclusive, 1, self.options.quiet, &results).await;
        }

        let mut results = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        results.cancelled = self.cancel.is_cancelled();

        self.reporter.report(&TestEvent::AllCompleted {
            passed: results.passed.len(),
            failed: results.failed.len(),
            duration: start.elapsed(),
        });
        results
    }

    /// Drain `jobs` with `workers` workers plus a timeout monitor
    async fn run_phase(
        &self,
        jobs: VecDeque<ScheduledTest>,
        workers: usize,
        redirect: bool,
        results: &Results,
    ) {
        if jobs.is_empty() || workers == 0 {
            return;
        }
        debug!(jobs = jobs.len(), workers, redirect, "starting phase");

        let queue: Queue = Arc::new(Mutex::new(jobs));
        let slots: Vec<Slot> = (0..workers).map(|_| Slot::default()).collect();
        let phase_done = CancellationToken::new();

        let monitor = tokio::spawn(monitor(
            slots.clone(),
            self.options.poll_interval,
            phase_done.clone(),
            self.reporter.clone(),
        ));

        let handles: Vec<JoinHandle<()>> = slots
            .iter()
            .map(|slot| {
                let worker = Worker {
                    queue: queue.clone(),
                    slot: slot.clone(),
                    redirect,
                    results: results.clone(),
                    reporter: self.reporter.clone(),
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "test worker panicked");
            }
        }

        phase_done.cancel();
        if let Err(e) = monitor.await {
            error!(error = %e, "timeout monitor panicked");
        }
    }
}

/// Poll running jobs and kill the ones past their deadline
async fn monitor(
    slots: Vec<Slot>,
    poll_interval: Duration,
    done: CancellationToken,
    reporter: Arc<dyn TestReporter>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        for slot in &slots {
            let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
            let (Some(started), Some(timeout)) = (slot.started, slot.timeout) else {
                continue;
            };
            if slot.timed_out || now <= started + timeout {
                continue;
            }
            slot.timed_out = true;
            if let Some(kill) = &slot.kill {
                kill.cancel();
            }
            if let Some(key) = slot.key.clone() {
                info!(target = %key, timeout_secs = timeout.as_secs(), "test timed out");
                reporter.report(&TestEvent::TimedOut { key, timeout });
            }
        }
    }
}

struct Worker {
    queue: Queue,
    slot: Slot,
    redirect: bool,
    results: Results,
    reporter: Arc<dyn TestReporter>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let job = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(job) = job else {
                break;
            };
            self.run_job(job).await;
        }
    }

    async fn run_job(&self, job: ScheduledTest) {
        let start_time = Utc::now();
        let started = Instant::now();
        let kill = self.cancel.child_token();

        self.reporter.report(&TestEvent::Started {
            key: job.key.clone(),
            command: job.command_line(),
        });

        let mut cmd = Command::new(&job.program);
        cmd.args(&job.args)
            .current_dir(&job.run_dir)
            .env_clear()
            .envs(&job.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.redirect {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(target = %job.key, error = %e, "failed to start test process");
                self.reporter.report(&TestEvent::SpawnFailed {
                    key: job.key.clone(),
                    error: e.to_string(),
                });
                self.record(&job.key, SPAWN_FAILURE, start_time, started.elapsed(), false, None);
                return;
            }
        };

        let output: Arc<Mutex<Vec<String>>> = Arc::default();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture(stderr, output.clone()));
        }

        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            *slot = WorkerSlot {
                key: Some(job.key.clone()),
                started: Some(started),
                timeout: job.timeout,
                kill: Some(kill.clone()),
                timed_out: false,
            };
        }

        let mut killed = false;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                killed = true;
                if let Err(e) = child.start_kill() {
                    debug!(target = %job.key, error = %e, "kill failed");
                }
                child.wait().await
            }
        };
        let duration = started.elapsed();

        let timed_out = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            let timed_out = slot.timed_out;
            *slot = WorkerSlot::default();
            timed_out
        };

        for mut reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader).await.is_err() {
                debug!(target = %job.key, "output still open after exit");
                reader.abort();
            }
        }
        let output = self.redirect.then(|| {
            output
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .join("\n")
        });

        if killed && !timed_out {
            // Interrupted by the user: neither passed nor failed
            debug!(target = %job.key, "test cancelled");
            self.reporter.report(&TestEvent::Cancelled {
                key: job.key.clone(),
            });
            return;
        }

        let exit_code = match status {
            Ok(status) => exit_code_of(&status),
            Err(e) => {
                error!(target = %job.key, error = %e, "failed to wait for test process");
                SPAWN_FAILURE
            }
        };
        self.record(&job.key, exit_code, start_time, duration, timed_out, output);
    }

    fn record(
        &self,
        key: &TargetKey,
        exit_code: i32,
        start_time: chrono::DateTime<Utc>,
        duration: Duration,
        timed_out: bool,
        output: Option<String>,
    ) {
        let result = TestRunResult {
            exit_code,
            start_time,
            cost_time: duration.as_secs_f64(),
        };

        {
            let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
            if result.passed() {
                results.passed.insert(key.clone(), result);
            } else if exit_code != INTERRUPTED {
                results.failed.insert(key.clone(), result);
                if timed_out {
                    results.timed_out.insert(key.clone());
                }
            }
        }

        self.reporter.report(&TestEvent::Finished {
            key: key.clone(),
            exit_code,
            duration,
            output,
        });
    }
}

/// Collect lines from a child pipe
fn capture<R>(reader: R, sink: Arc<Mutex<Vec<String>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Raw bytes: a test may print anything, and the pipe must stay open
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    sink.lock().unwrap_or_else(|e| e.into_inner()).push(line);
                }
                Err(e) => {
                    debug!(error = %e, "output capture stopped");
                    break;
                }
            }
        }
    })
}
