//! Keyed executor - per-key FIFO serialization over a shared worker pool.
//!
//! Tasks submitted with equal keys run one at a time, in submission order.
//! Tasks with different keys run in parallel on any worker. Unkeyed
//! submissions all share the `None` key and so form one serialization
//! domain of their own.
//!
//! Each key with outstanding work owns a queue. Only the head task of a
//! queue is ever in the worker channel; when it finishes the worker hands
//! the next task for that key back to the channel, or retires the key.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_store::{ExecutorConfig, KeyedExecutor};
//!
//! let executor = KeyedExecutor::new(ExecutorConfig::default())?;
//! let handle = executor.submit("alice".to_string(), || 40 + 2)?;
//! assert_eq!(handle.join()?, 42);
//! executor.shutdown();
//! ```

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, TaskError};

/// Returns `true` when the task ran to completion.
type Job = Box<dyn FnOnce() -> bool + Send + 'static>;

/// Receives the panic message of a fire-and-forget task.
pub type PanicHandler = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads. `0` uses the number of logical CPUs.
    pub threads: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            threads: 0,
            thread_name: "keyed-worker".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_threads(threads: usize) -> Self {
        ExecutorConfig {
            threads,
            ..Self::default()
        }
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

/// Task counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub completed: usize,
    pub panicked: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// TaskHandle
// ============================================================================

/// Result of a task submitted with [`KeyedExecutor::submit`].
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, TaskError>>,
    ready: Mutex<Option<Result<T, TaskError>>>,
}

impl<T> TaskHandle<T> {
    /// Whether the task has finished (or will never run).
    pub fn is_finished(&self) -> bool {
        let mut ready = self.ready.lock();
        if ready.is_none() {
            match self.rx.try_recv() {
                Ok(result) => *ready = Some(result),
                Err(TryRecvError::Disconnected) => *ready = Some(Err(TaskError::Cancelled)),
                Err(TryRecvError::Empty) => {}
            }
        }
        ready.is_some()
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<T, TaskError> {
        if let Some(result) = self.ready.into_inner() {
            return result;
        }
        self.rx.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// The result if the task has finished, otherwise the handle back.
    pub fn try_join(self) -> Result<Result<T, TaskError>, Self> {
        if self.is_finished() {
            Ok(self.join())
        } else {
            Err(self)
        }
    }

    /// Wait at most `timeout`. On `TaskError::Timeout` the task keeps running
    /// but its result is discarded.
    pub fn join_timeout(self, timeout: Duration) -> Result<T, TaskError> {
        if let Some(result) = self.ready.into_inner() {
            return result;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Cancelled),
        }
    }
}

// ============================================================================
// KeyedExecutor
// ============================================================================

enum Message<K> {
    Run(Option<K>, Job),
    Stop,
}

struct Shared<K> {
    /// Keys with a task in flight, mapped to the tasks waiting behind it.
    queues: Mutex<HashMap<Option<K>, VecDeque<Job>>>,
    idle: Condvar,
    shutting_down: AtomicBool,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

impl<K: Eq + Hash> Shared<K> {
    fn record(&self, completed: bool) {
        if completed {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Dispatch the next task for `key`, or retire the key.
    fn finish(&self, key: Option<K>, tx: &Sender<Message<K>>) {
        let mut queues = self.queues.lock();
        match queues.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(next) => {
                if tx.send(Message::Run(key, next)).is_err() {
                    error!("worker channel closed with tasks queued");
                }
            }
            None => {
                queues.remove(&key);
                if queues.is_empty() {
                    self.idle.notify_all();
                }
            }
        }
    }
}

fn worker_loop<K: Eq + Hash>(shared: Arc<Shared<K>>, rx: Receiver<Message<K>>, tx: Sender<Message<K>>) {
    while let Ok(message) = rx.recv() {
        let (key, job) = match message {
            Message::Run(key, job) => (key, job),
            Message::Stop => break,
        };
        let completed = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or(false);
        shared.record(completed);
        shared.finish(key, &tx);
    }
    debug!("keyed worker exiting");
}

/// Runs tasks with at most one task in flight per key.
pub struct KeyedExecutor<K> {
    shared: Arc<Shared<K>>,
    sender: Sender<Message<K>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    panic_handler: PanicHandler,
    name: String,
}

impl<K> KeyedExecutor<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Start the worker pool. Panics in `execute`d tasks are logged.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        Self::with_panic_handler(
            config,
            Arc::new(|message: &str| error!(panic = message, "keyed task panicked")),
        )
    }

    /// Start the worker pool with a handler for panics in `execute`d tasks.
    pub fn with_panic_handler(config: ExecutorConfig, panic_handler: PanicHandler) -> Result<Self, ExecutorError> {
        let shared = Arc::new(Shared {
            queues: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
        });
        let (sender, receiver) = channel::unbounded();

        let count = config.worker_count();
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let shared = shared.clone();
            let rx = receiver.clone();
            let tx = sender.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, i))
                .spawn(move || worker_loop(shared, rx, tx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    for _ in &workers {
                        let _ = sender.send(Message::Stop);
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(ExecutorError::Spawn(e.to_string()));
                }
            }
        }
        let worker_ids = workers.iter().map(|h| h.thread().id()).collect();
        info!(threads = count, name = %config.thread_name, "keyed executor started");

        Ok(KeyedExecutor {
            shared,
            sender,
            workers: Mutex::new(workers),
            worker_ids,
            panic_handler,
            name: config.thread_name,
        })
    }

    /// Run `task` after every earlier task submitted with an equal key.
    pub fn submit<F, T>(&self, key: K, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(Some(key), task)
    }

    /// Submit into the shared unkeyed domain.
    pub fn submit_unkeyed<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with(None, task)
    }

    /// Fire-and-forget variant of [`KeyedExecutor::submit`]. A panic is
    /// passed to the panic handler.
    pub fn execute<F>(&self, key: K, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_with(Some(key), task)
    }

    pub fn execute_unkeyed<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_with(None, task)
    }

    fn submit_with<F, T>(&self, key: Option<K>, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let (result, completed) = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => (Ok(value), true),
                Err(payload) => (Err(TaskError::Panicked(panic_message(&*payload))), false),
            };
            // The caller may have dropped the handle.
            let _ = tx.send(result);
            completed
        });
        self.dispatch(key, job)?;
        Ok(TaskHandle {
            rx,
            ready: Mutex::new(None),
        })
    }

    fn execute_with<F>(&self, key: Option<K>, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handler = self.panic_handler.clone();
        let job: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => true,
            Err(payload) => {
                handler(&panic_message(&*payload));
                false
            }
        });
        self.dispatch(key, job)
    }

    fn dispatch(&self, key: Option<K>, job: Job) -> Result<(), ExecutorError> {
        let mut queues = self.shared.queues.lock();
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(ExecutorError::ShutDown);
        }
        if let Some(waiting) = queues.get_mut(&key) {
            waiting.push_back(job);
            return Ok(());
        }
        queues.insert(key.clone(), VecDeque::new());
        self.sender
            .send(Message::Run(key, job))
            .map_err(|_| ExecutorError::ShutDown)
    }

    /// Tasks submitted for `key` that have not finished, including the one
    /// in flight.
    pub fn pending(&self, key: &K) -> usize {
        self.shared
            .queues
            .lock()
            .get(&Some(key.clone()))
            .map_or(0, |waiting| waiting.len() + 1)
    }
}

impl<K> KeyedExecutor<K> {
    pub fn worker_count(&self) -> usize {
        self.worker_ids.len()
    }

    /// Number of keys (the unkeyed domain included) with work in flight.
    pub fn active_keys(&self) -> usize {
        self.shared.queues.lock().len()
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, run everything already queued, then stop the
    /// workers. Calling it again is a no-op.
    ///
    /// From inside a task this only stops new submissions; the drain happens
    /// when the executor is shut down or dropped from outside the pool.
    pub fn shutdown(&self) {
        let mut queues = self.shared.queues.lock();
        self.shared.shutting_down.store(true, Ordering::Release);
        if self.worker_ids.contains(&thread::current().id()) {
            warn!(name = %self.name, "shutdown requested from a worker thread");
            return;
        }
        while !queues.is_empty() {
            self.shared.idle.wait(&mut queues);
        }
        drop(queues);

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for _ in &workers {
            let _ = self.sender.send(Message::Stop);
        }
        for handle in workers {
            if handle.join().is_err() {
                error!(name = %self.name, "keyed worker panicked");
            }
        }
        let stats = self.stats();
        info!(
            name = %self.name,
            completed = stats.completed,
            panicked = stats.panicked,
            "keyed executor shut down"
        );
    }
}

impl<K> Drop for KeyedExecutor<K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
