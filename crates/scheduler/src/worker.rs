//! Fetch worker pool
//!
//! Worker threads pull batches from a [`JobSource`], run them, and go back
//! for more. Idle workers park on a [`WorkSignal`] and are woken when the
//! source queues work or frees a concurrency slot; the poll interval bounds
//! how long a missed wake-up can delay them.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something workers can pull jobs from
///
/// `next_job` must not block: it returns `None` when nothing is runnable
/// right now (empty queue or concurrency cap reached). `execute` may block
/// for as long as the job takes.
pub trait JobSource: Send + Sync + 'static {
    type Job: Send + 'static;

    fn next_job(&self) -> Option<Self::Job>;

    fn execute(&self, job: Self::Job);
}

/// Wake-up channel between a job source and idle workers
///
/// Each `notify` bumps a generation counter, so a worker that read the
/// generation before finding the queue empty never sleeps through work
/// queued in between.
#[derive(Debug, Default)]
pub struct WorkSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl WorkSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every parked worker
    pub fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Park until the generation moves past `seen` or `timeout` elapses
    ///
    /// Returns `true` if woken by a notification.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> bool {
        let guard = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard != seen
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Longest a parked worker waits before re-checking the source.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Thread name prefix; workers are named `{prefix}-{id}`.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            poll_interval: Duration::from_millis(100),
            thread_name: "lectern-fetch".to_string(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Pool of worker threads draining a [`JobSource`].
///
/// Dropping the pool shuts it down and joins the threads; a job that is
/// running at that point is allowed to finish.
///
/// # Example
///
/// ```
/// use lectern_scheduler::{JobSource, WorkSignal, WorkerPool, WorkerPoolConfig};
/// use std::sync::{Arc, Mutex};
///
/// struct Numbers(Mutex<Vec<u32>>, Mutex<u32>);
///
/// impl JobSource for Numbers {
///     type Job = u32;
///     fn next_job(&self) -> Option<u32> {
///         self.0.lock().unwrap().pop()
///     }
///     fn execute(&self, job: u32) {
///         *self.1.lock().unwrap() += job;
///     }
/// }
///
/// let source = Arc::new(Numbers(Mutex::new(vec![1, 2, 3]), Mutex::new(0)));
/// let signal = Arc::new(WorkSignal::new());
/// let pool = WorkerPool::new(source.clone(), signal, WorkerPoolConfig::new(2)).unwrap();
///
/// while *source.1.lock().unwrap() != 6 {
///     std::thread::yield_now();
/// }
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    signal: Arc<WorkSignal>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads pulling from `source`
    ///
    /// # Errors
    /// Returns the OS error if a thread cannot be spawned; threads spawned
    /// before the failure are shut down again.
    pub fn new<S: JobSource>(
        source: Arc<S>,
        signal: Arc<WorkSignal>,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: shutdown.clone(),
            signal: signal.clone(),
        };

        for id in 0..config.num_workers {
            let worker = Worker::spawn(
                format!("{}-{}", config.thread_name, id),
                source.clone(),
                signal.clone(),
                shutdown.clone(),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        log::info!("started {} fetch workers", pool.workers.len());
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop all workers and wait for them to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        self.signal.notify();

        let count = self.workers.len();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        log::info!("stopped {} fetch workers", count);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<S: JobSource>(
        name: String,
        source: Arc<S>,
        signal: Arc<WorkSignal>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(source, signal, shutdown, poll_interval))?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    fn run<S: JobSource>(
        source: Arc<S>,
        signal: Arc<WorkSignal>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            let seen = signal.generation();
            match source.next_job() {
                Some(job) => source.execute(job),
                None => {
                    signal.wait_for_change(seen, poll_interval);
                }
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("fetch worker {} panicked", self.name);
            }
        }
    }
}

/// Number of logical CPU cores, used as the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
