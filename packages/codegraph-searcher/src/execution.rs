//! Search execution pool
//!
//! Fixed set of named worker threads fed from one FIFO queue.
//!
//! # Sizing
//! - `> 0`: exactly that many workers
//! - `0`: no workers, jobs run inline on the submitting thread
//! - `< 0`: `2 + 2 * cpus`
//!
//! # Shutdown
//! - soft ([`ExecutionPool::shutdown`]): reject new jobs, drain the queue, workers exit
//! - hard ([`ExecutionPool::shutdown_now`]): reject new jobs, discard the queue, raise
//!   the cancellation flag; running jobs finish, workers exit right after
//!
//! Workers are detached and never joined, so they do not hold up process exit.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Pool sizing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPoolSize {
    /// No worker threads; work runs on the caller's thread
    Disabled,
    /// Exactly this many workers
    Fixed(usize),
    /// `2 + 2 * available parallelism`
    Auto,
}

impl ThreadPoolSize {
    pub fn from_setting(num_search_threads: i32) -> Self {
        match num_search_threads {
            n if n < 0 => ThreadPoolSize::Auto,
            0 => ThreadPoolSize::Disabled,
            n => ThreadPoolSize::Fixed(n as usize),
        }
    }

    /// Worker count for a machine with `cpus` logical cores
    pub fn resolve(&self, cpus: usize) -> usize {
        match self {
            ThreadPoolSize::Disabled => 0,
            ThreadPoolSize::Fixed(n) => *n,
            ThreadPoolSize::Auto => 2 + 2 * cpus,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.resolve(num_cpus::get())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("search pool is shut down; task rejected")]
    Rejected,

    #[error("task was cancelled by a hard shutdown")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("failed to spawn search thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Draining,
    Stopped,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    state: RunState,
    live_workers: usize,
}

struct Shared {
    queue: Mutex<Queue>,
    work_available: Condvar,
    terminated: Condvar,
    cancelled: Arc<AtomicBool>,
}

/// Bounded worker pool used to run per-index / per-segment search work.
pub struct ExecutionPool {
    shared: Arc<Shared>,
    size: ThreadPoolSize,
    worker_count: usize,
    group: String,
}

impl ExecutionPool {
    /// Start the pool. Threads are named `{group}-thread-N`, N from 1.
    pub fn new(size: ThreadPoolSize, group: &str) -> Result<Self, ExecutionError> {
        let worker_count = size.worker_count();
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    state: RunState::Running,
                    live_workers: 0,
                }),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
                cancelled: Arc::new(AtomicBool::new(false)),
            }),
            size,
            worker_count,
            group: group.to_string(),
        };

        for i in 1..=worker_count {
            pool.shared.queue.lock().live_workers += 1;

            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-thread-{}", group, i))
                .spawn(move || worker_loop(shared));

            if let Err(e) = spawned {
                pool.shared.queue.lock().live_workers -= 1;
                pool.shutdown_now();
                return Err(ExecutionError::Spawn(e.to_string()));
            }
        }

        tracing::info!(
            "search pool '{}' started ({:?}, {} worker(s))",
            group,
            size,
            worker_count
        );
        Ok(pool)
    }

    /// Queue `f`; runs inline when the pool has no workers.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, ExecutionError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(TaskSlot::new());
        let completion = Completion {
            slot: Some(Arc::clone(&slot)),
        };
        let job: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => TaskOutcome::Done(value),
                Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
            };
            completion.finish(outcome);
        });

        if self.worker_count == 0 {
            if self.shared.queue.lock().state != RunState::Running {
                return Err(ExecutionError::Rejected);
            }
            job();
            return Ok(TaskHandle { slot });
        }

        let mut queue = self.shared.queue.lock();
        if queue.state != RunState::Running {
            drop(queue);
            return Err(ExecutionError::Rejected);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.work_available.notify_one();

        Ok(TaskHandle { slot })
    }

    /// Run `f` over every item on the pool and collect the results in input order.
    ///
    /// Must not be called from one of this pool's own workers: a saturated pool
    /// would wait on itself.
    pub fn map_ordered<I, T, F, R>(&self, items: I, f: F) -> Result<Vec<R>, ExecutionError>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let handles = items
            .into_iter()
            .map(|item| {
                let f = Arc::clone(&f);
                self.submit(move || f(item))
            })
            .collect::<Result<Vec<_>, _>>()?;

        handles.into_iter().map(TaskHandle::join).collect()
    }

    /// Soft shutdown. Returns `false` if a shutdown was already under way.
    pub fn shutdown(&self) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.state != RunState::Running {
            return false;
        }
        queue.state = RunState::Draining;
        drop(queue);

        self.shared.work_available.notify_all();
        tracing::debug!("search pool '{}' draining", self.group);
        true
    }

    /// Hard shutdown. Returns how many queued jobs were discarded.
    pub fn shutdown_now(&self) -> usize {
        self.shared.cancelled.store(true, Ordering::Release);

        let discarded = {
            let mut queue = self.shared.queue.lock();
            queue.state = RunState::Stopped;
            std::mem::take(&mut queue.jobs)
        };
        self.shared.work_available.notify_all();

        let count = discarded.len();
        // dropping a job resolves its handle as Cancelled
        drop(discarded);

        tracing::debug!(
            "search pool '{}' stopped, {} queued task(s) discarded",
            self.group,
            count
        );
        count
    }

    /// Wait until every worker has exited; only meaningful after a shutdown.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while queue.live_workers > 0 {
            if self
                .shared
                .terminated
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                break;
            }
        }
        queue.live_workers == 0
    }

    /// Set by [`ExecutionPool::shutdown_now`]; long-running jobs may poll it.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Handle on the cancellation flag that a job can carry and poll.
    pub fn cancellation(&self) -> CancellationToken {
        CancellationToken {
            flag: Arc::clone(&self.shared.cancelled),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().state != RunState::Running
    }

    pub fn is_terminated(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.state != RunState::Running && queue.live_workers == 0
    }

    pub fn size(&self) -> ThreadPoolSize {
        self.size
    }

    /// Configured number of worker threads (0 = inline)
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Worker threads that have not exited yet
    pub fn live_workers(&self) -> usize {
        self.shared.queue.lock().live_workers
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("group", &self.group)
            .field("size", &self.size)
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

/// Read side of a pool's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the pool was hard-stopped.
    pub fn check(&self) -> Result<(), ExecutionError> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        Ok(())
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.state != RunState::Running {
                    break None;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        match job {
            Some(job) => job(),
            None => break,
        }
    }

    let mut queue = shared.queue.lock();
    queue.live_workers -= 1;
    if queue.live_workers == 0 {
        shared.terminated.notify_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Task handles
// ═══════════════════════════════════════════════════════════════════════════

enum TaskOutcome<R> {
    Done(R),
    Panicked(String),
    Cancelled,
}

struct TaskSlot<R> {
    outcome: Mutex<Option<TaskOutcome<R>>>,
    ready: Condvar,
}

impl<R> TaskSlot<R> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: TaskOutcome<R>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

/// Resolves the slot exactly once: with the job's result, or `Cancelled` if the
/// job is dropped without running.
struct Completion<R> {
    slot: Option<Arc<TaskSlot<R>>>,
}

impl<R> Completion<R> {
    fn finish(mut self, outcome: TaskOutcome<R>) {
        if let Some(slot) = self.slot.take() {
            slot.complete(outcome);
        }
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.complete(TaskOutcome::Cancelled);
        }
    }
}

/// Result of a submitted job.
pub struct TaskHandle<R> {
    slot: Arc<TaskSlot<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the job finished (or was discarded).
    pub fn join(self) -> Result<R, ExecutionError> {
        let mut outcome = self.slot.outcome.lock();
        loop {
            match outcome.take() {
                Some(TaskOutcome::Done(value)) => return Ok(value),
                Some(TaskOutcome::Panicked(msg)) => return Err(ExecutionError::Panicked(msg)),
                Some(TaskOutcome::Cancelled) => return Err(ExecutionError::Cancelled),
                None => self.slot.ready.wait(&mut outcome),
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }
}
