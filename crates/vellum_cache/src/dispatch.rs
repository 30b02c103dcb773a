//! Background worker pool and the completion context callbacks run on.
//!
//! All disk I/O, decoding and rendering happen on a [`WorkerPool`]. Every
//! user-facing completion is handed to a single [`CompletionContext`] so
//! callers can touch UI-affine state inside a callback without extra
//! synchronization. Tasks dispatched to a context run in dispatch order.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::error::CacheError;

/// A unit of work handed to a [`CompletionContext`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The execution context user completions are delivered on.
pub trait CompletionContext: Send + Sync + 'static {
    /// Schedules `task` after every previously dispatched task.
    fn dispatch(&self, task: Task);
}

/// Fixed-size pool for store I/O.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Starts a pool with `threads` workers, or the pool default when `None`.
    pub fn new(threads: Option<usize>) -> Result<Self, CacheError> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("vellum-io-{i}"))
            .panic_handler(|_| tracing::error!("cache worker task panicked"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().map_err(|e| CacheError::Executor {
            reason: e.to_string(),
        })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Runs `job` on some worker.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        self.pool.spawn(job);
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// The worker pool and completion context shared by every store.
#[derive(Clone)]
pub struct Executors {
    /// Pool for I/O, decoding and rendering.
    pub pool: WorkerPool,
    /// Context user completions run on.
    pub context: Arc<dyn CompletionContext>,
}

impl Executors {
    /// Bundles a pool and a completion context.
    pub fn new(pool: WorkerPool, context: Arc<dyn CompletionContext>) -> Self {
        Self { pool, context }
    }

    /// Hands `task` to the completion context.
    pub fn complete(&self, task: impl FnOnce() + Send + 'static) {
        self.context.dispatch(Box::new(task));
    }
}

/// A dedicated thread that runs dispatched tasks one at a time.
///
/// Stands in for an application main thread. Dropping the context stops
/// accepting work, drains what was already queued and joins the thread.
pub struct MainContext {
    sender: Option<mpsc::Sender<Task>>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl MainContext {
    /// Starts the context thread.
    pub fn spawn(name: &str) -> Result<Arc<Self>, CacheError> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        tracing::error!("completion callback panicked");
                    }
                }
            })
            .map_err(|e| CacheError::Executor {
                reason: e.to_string(),
            })?;
        let thread_id = handle.thread().id();
        Ok(Arc::new(Self {
            sender: Some(sender),
            handle: Some(handle),
            thread_id,
        }))
    }

    /// Identifier of the thread tasks run on.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns `true` when called from the context thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl CompletionContext for MainContext {
    fn dispatch(&self, task: Task) {
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(task).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::warn!("completion context stopped; dropping callback");
        }
    }
}

impl Drop for MainContext {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // The last reference can be released by a callback on the context
            // thread itself, which cannot join itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// A queue the host drains from its own event loop via [`run_pending`](Self::run_pending).
#[derive(Default)]
pub struct ManualContext {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualContext {
    /// Creates an empty context.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs queued tasks, including ones queued while running, until empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of tasks waiting.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl CompletionContext for ManualContext {
    fn dispatch(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}
