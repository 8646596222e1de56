//! Serial dispatch queue with a bounded drain barrier.
//!
//! Every handler invocation in the core runs as a job on a [`DispatchQueue`].
//! Jobs execute one at a time in the order they were enqueued, either on a
//! dedicated worker thread or, in manual mode, on whichever host thread calls
//! [`DispatchQueue::drain`].
//!
//! `drain` is a counting barrier: it snapshots how many jobs have been
//! enqueued when it is called and returns once that many have completed. Jobs
//! enqueued afterwards are not awaited, so a steady stream of events cannot
//! keep a caller blocked.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use conduit_config::{Config, QueueMode};

/// Tracing target for dispatch queue operations.
pub(crate) const PUMP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pump");

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors reported by the dispatch queue.
#[derive(Debug, Error)]
pub enum PumpError {
    /// The drain deadline passed before the snapshot completed.
    #[error("timed out after {timeout:?} with {remaining} queued job(s) outstanding")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
        /// Jobs from the snapshot that had not completed.
        remaining: u64,
    },
    /// `drain` was called from a job running on the same queue.
    #[error("cannot drain queue '{label}' from one of its own jobs")]
    Reentrant {
        /// Queue label.
        label: String,
    },
    /// The queue no longer accepts jobs.
    #[error("queue '{label}' has shut down")]
    ShutDown {
        /// Queue label.
        label: String,
    },
    /// The worker thread could not be started.
    #[error("failed to spawn worker thread for queue '{label}': {source}")]
    Spawn {
        /// Queue label.
        label: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    enqueued: u64,
    completed: u64,
    rejected: u64,
    runner: Option<ThreadId>,
    shut_down: bool,
}

struct QueueShared {
    label: String,
    mode: QueueMode,
    state: Mutex<QueueState>,
    work_ready: Condvar,
    progress: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueShared {
    // Jobs never run under this lock, so a poisoned guard still holds
    // consistent counters.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, job: Job) -> Result<(), Job> {
        let mut state = self.lock();
        if state.shut_down {
            state.rejected = state.rejected.saturating_add(1);
            return Err(job);
        }
        state.jobs.push_back(job);
        state.enqueued = state.enqueued.saturating_add(1);
        drop(state);
        self.work_ready.notify_one();
        Ok(())
    }

    /// Runs `job`; the caller must already have recorded itself as runner.
    fn execute(&self, job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                target: PUMP_TARGET,
                queue = %self.label,
                panic = panic_message(payload.as_ref()),
                "dispatch job panicked"
            );
        }
        let mut state = self.lock();
        state.runner = None;
        state.completed = state.completed.saturating_add(1);
        drop(state);
        self.progress.notify_all();
    }

    fn begin_shutdown(&self) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        drop(state);
        debug!(target: PUMP_TARGET, queue = %self.label, "dispatch queue shutting down");
        self.work_ready.notify_all();
        self.progress.notify_all();
    }
}

/// Signals shutdown once the last user-facing clone of a queue is dropped.
struct QueueLease {
    shared: Arc<QueueShared>,
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
    }
}

/// Serial FIFO of handler invocations.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    shared: Arc<QueueShared>,
    _lease: Arc<QueueLease>,
}

impl DispatchQueue {
    fn with_mode(label: String, mode: QueueMode) -> Self {
        let shared = Arc::new(QueueShared {
            label,
            mode,
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            progress: Condvar::new(),
            worker: Mutex::new(None),
        });
        let lease = Arc::new(QueueLease {
            shared: Arc::clone(&shared),
        });
        Self {
            shared,
            _lease: lease,
        }
    }

    /// Creates a queue served by a dedicated worker thread named `label`.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Spawn` if the thread cannot be started.
    pub fn worker(label: impl Into<String>) -> Result<Self, PumpError> {
        let queue = Self::with_mode(label.into(), QueueMode::Worker);
        let shared = Arc::clone(&queue.shared);
        let handle = thread::Builder::new()
            .name(queue.shared.label.clone())
            .spawn(move || run_worker(&shared))
            .map_err(|source| PumpError::Spawn {
                label: queue.shared.label.clone(),
                source,
            })?;
        *queue
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(queue)
    }

    /// Creates a queue whose jobs run only while a host thread drains it.
    pub fn manual(label: impl Into<String>) -> Self {
        Self::with_mode(label.into(), QueueMode::Manual)
    }

    /// Creates a queue according to the configured mode and label.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Spawn` if a worker thread cannot be started.
    pub fn from_config(config: &Config) -> Result<Self, PumpError> {
        match config.queue_mode() {
            QueueMode::Worker => Self::worker(config.queue_label()),
            QueueMode::Manual => Ok(Self::manual(config.queue_label())),
        }
    }

    /// Queue label, also used as the worker thread name.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Execution mode.
    #[must_use]
    pub fn mode(&self) -> QueueMode {
        self.shared.mode
    }

    /// Appends a job to the queue.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::ShutDown` once the queue has shut down; the job is
    /// dropped without running.
    pub fn enqueue<F>(&self, job: F) -> Result<(), PumpError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .push(Box::new(job))
            .map_err(|_rejected| PumpError::ShutDown {
                label: self.shared.label.clone(),
            })
    }

    /// Appends a job, running it on the calling thread if the queue has shut
    /// down so that it is never lost.
    ///
    /// Callers must not hold core locks.
    pub(crate) fn enqueue_or_run<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(job) = self.shared.push(Box::new(job)) {
            warn!(
                target: PUMP_TARGET,
                queue = %self.shared.label,
                "queue shut down; running job inline"
            );
            job();
        }
    }

    /// Appends a job, handing it to a short-lived thread if the queue has
    /// shut down so that it still runs without the caller's locks held.
    ///
    /// Used from transport callbacks, which may hold transport locks and so
    /// cannot run core work inline.
    pub(crate) fn enqueue_or_detach<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Err(job) = self.shared.push(Box::new(job)) else {
            return;
        };
        let name = format!("{}-detached", self.shared.label);
        warn!(
            target: PUMP_TARGET,
            queue = %self.shared.label,
            thread = %name,
            "queue shut down; running job on a detached thread"
        );
        if let Err(source) = thread::Builder::new().name(name).spawn(job) {
            error!(
                target: PUMP_TARGET,
                queue = %self.shared.label,
                %source,
                "detached job could not be started"
            );
        }
    }

    /// Blocks until every job enqueued before this call has completed.
    ///
    /// In manual mode the calling thread runs those jobs itself.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Reentrant` when called from one of this queue's
    /// own jobs.
    pub fn drain(&self) -> Result<(), PumpError> {
        self.drain_until(None)
    }

    /// Like [`DispatchQueue::drain`] but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::Timeout` when the deadline passes first and
    /// `PumpError::Reentrant` when called from one of this queue's own jobs.
    pub fn drain_timeout(&self, timeout: Duration) -> Result<(), PumpError> {
        self.drain_until(Some((Instant::now() + timeout, timeout)))
    }

    fn drain_until(&self, deadline: Option<(Instant, Duration)>) -> Result<(), PumpError> {
        let shared = &self.shared;
        let current = thread::current().id();
        let mut state = shared.lock();
        if state.runner == Some(current) {
            return Err(PumpError::Reentrant {
                label: shared.label.clone(),
            });
        }
        let target = state.enqueued;

        loop {
            if state.completed >= target {
                return Ok(());
            }
            if let Some((at, timeout)) = deadline
                && Instant::now() >= at
            {
                return Err(PumpError::Timeout {
                    timeout,
                    remaining: target.saturating_sub(state.completed),
                });
            }

            if shared.mode == QueueMode::Manual
                && state.runner.is_none()
                && let Some(job) = state.jobs.pop_front()
            {
                state.runner = Some(current);
                drop(state);
                shared.execute(job);
                state = shared.lock();
                continue;
            }

            state = match deadline {
                None => shared
                    .progress
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((at, _)) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    shared
                        .progress
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Number of jobs that have finished, including ones that panicked.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.shared.lock().completed
    }

    /// Number of jobs refused because the queue had shut down.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.shared.lock().rejected
    }

    /// Whether the queue has stopped accepting jobs.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    /// Stops accepting jobs and, in worker mode, waits for the worker to
    /// finish the jobs already queued.
    pub fn shutdown(&self) {
        self.shared.begin_shutdown();
        let handle = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Called from a job; the worker exits once this job returns.
            return;
        }
        if handle.join().is_err() {
            warn!(
                target: PUMP_TARGET,
                queue = %self.shared.label,
                "dispatch worker terminated abnormally"
            );
        }
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DispatchQueue")
            .field("label", &self.shared.label)
            .field("mode", &self.shared.mode)
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_worker(shared: &QueueShared) {
    debug!(target: PUMP_TARGET, queue = %shared.label, "dispatch worker started");
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.runner = Some(thread::current().id());
                    break job;
                }
                if state.shut_down {
                    debug!(target: PUMP_TARGET, queue = %shared.label, "dispatch worker stopped");
                    return;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        shared.execute(job);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use rstest::rstest;

    fn recording_job(log: &Arc<Mutex<Vec<usize>>>, value: usize) -> impl FnOnce() + Send + 'static {
        let log = Arc::clone(log);
        move || log.lock().expect("log mutex poisoned").push(value)
    }

    #[rstest]
    fn manual_queue_runs_nothing_until_drained() {
        let queue = DispatchQueue::manual("test-manual");
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(recording_job(&log, 1)).expect("enqueue");
        queue.enqueue(recording_job(&log, 2)).expect("enqueue");

        assert!(log.lock().expect("log mutex poisoned").is_empty());
        assert_eq!(queue.pending(), 2);

        queue.drain().expect("drain");
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![1, 2]);
        assert_eq!(queue.completed(), 2);
    }

    #[rstest]
    fn drain_ignores_jobs_enqueued_after_the_snapshot() {
        let queue = DispatchQueue::manual("test-snapshot");
        let log = Arc::new(Mutex::new(Vec::new()));
        let requeue = queue.clone();
        let inner_log = Arc::clone(&log);
        queue
            .enqueue(move || {
                inner_log.lock().expect("log mutex poisoned").push(1);
                requeue
                    .enqueue(recording_job(&inner_log, 2))
                    .expect("enqueue follow-up");
            })
            .expect("enqueue");

        queue.drain().expect("drain");
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![1]);
        assert_eq!(queue.pending(), 1);

        queue.drain().expect("second drain");
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![1, 2]);
    }

    #[rstest]
    fn worker_drain_waits_for_queued_jobs() {
        let queue = DispatchQueue::worker("test-worker").expect("spawn worker");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            queue
                .enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("enqueue");
        }
        queue.drain().expect("drain");
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        queue.shutdown();
    }

    #[rstest]
    fn drain_from_own_job_is_reentrant() {
        let queue = DispatchQueue::manual("test-reentrant");
        let (sender, receiver) = mpsc::channel();
        let inner = queue.clone();
        queue
            .enqueue(move || {
                let outcome = inner.drain();
                sender
                    .send(matches!(outcome, Err(PumpError::Reentrant { .. })))
                    .expect("send outcome");
            })
            .expect("enqueue");
        queue.drain().expect("outer drain");
        assert!(receiver.recv().expect("outcome recorded"));
    }

    #[rstest]
    fn drain_timeout_reports_outstanding_jobs() {
        let queue = DispatchQueue::worker("test-timeout").expect("spawn worker");
        let (release, blocked) = mpsc::channel::<()>();
        queue
            .enqueue(move || {
                blocked.recv().ok();
            })
            .expect("enqueue");

        let outcome = queue.drain_timeout(Duration::from_millis(20));
        assert!(matches!(
            outcome,
            Err(PumpError::Timeout { remaining: 1, .. })
        ));

        release.send(()).expect("release job");
        queue.drain().expect("drain after release");
        queue.shutdown();
    }

    #[rstest]
    fn panicking_job_still_counts_as_completed() {
        let queue = DispatchQueue::manual("test-panic");
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue(|| panic!("handler failure")).expect("enqueue");
        queue.enqueue(recording_job(&log, 7)).expect("enqueue");

        queue.drain().expect("drain");
        assert_eq!(queue.completed(), 2);
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![7]);
    }

    #[rstest]
    fn shut_down_queue_rejects_jobs() {
        let queue = DispatchQueue::worker("test-shutdown").expect("spawn worker");
        queue.shutdown();
        let outcome = queue.enqueue(|| {});
        assert!(matches!(outcome, Err(PumpError::ShutDown { .. })));
        assert_eq!(queue.rejected(), 1);
        assert!(queue.is_shut_down());
    }

    #[rstest]
    fn enqueue_or_run_falls_back_to_inline_execution() {
        let queue = DispatchQueue::manual("test-inline");
        queue.shutdown();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_or_run(recording_job(&log, 3));
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![3]);
    }

    #[rstest]
    fn enqueue_or_detach_runs_off_thread_after_shutdown() {
        let queue = DispatchQueue::manual("test-detached");
        queue.shutdown();
        let (sender, receiver) = mpsc::channel();
        queue.enqueue_or_detach(move || {
            let name = thread::current().name().map(str::to_owned);
            sender.send(name).expect("send thread name");
        });
        let name = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("detached job should run");
        assert_eq!(name.as_deref(), Some("test-detached-detached"));
        assert_eq!(queue.pending(), 0);
    }

    #[rstest]
    fn enqueue_or_detach_prefers_the_queue() {
        let queue = DispatchQueue::manual("test-queued");
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.enqueue_or_detach(recording_job(&log, 5));
        assert_eq!(queue.pending(), 1);
        queue.drain().expect("drain");
        assert_eq!(*log.lock().expect("log mutex poisoned"), vec![5]);
    }

    #[rstest]
    fn from_config_honours_manual_mode() {
        let config = Config {
            queue_mode: QueueMode::Manual,
            queue_label: String::from("configured"),
            ..Config::default()
        };
        let queue = DispatchQueue::from_config(&config).expect("queue from config");
        assert_eq!(queue.mode(), QueueMode::Manual);
        assert_eq!(queue.label(), "configured");
    }
}
