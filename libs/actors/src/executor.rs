//! Executors that run drain tasks
//!
//! The shared [`WorkerPool`] runs every actor queue by default. An actor may
//! instead be pinned to an external [`Executor`] (a UI thread, a dedicated
//! event loop) when it is wrapped; the scheduler then hands that actor's drain
//! tasks to the executor and never to the pool.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tracing::trace;

/// Unit of work handed to an executor
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run scheduler tasks
///
/// Implementations must run every task exactly once and must not run a task
/// concurrently with itself. They may run tasks on any thread, including the
/// submitting one.
pub trait Executor: Send + Sync + 'static {
    /// Run or schedule the task
    fn execute(&self, task: Task);

    /// Name used in logs
    fn name(&self) -> &str {
        "external"
    }
}

/// Shared pool backed by a Tokio runtime's blocking threads
///
/// Actor method bodies are ordinary synchronous code and may block, so drain
/// tasks go to the blocking pool instead of the async workers.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    submitted: std::sync::Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            submitted: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pool bound to the runtime the caller is running in, if any
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Tasks submitted so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        let n = self.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(task = n, "Submitting task to worker pool");
        // Detached; completion is observed through the scheduler, not the JoinHandle
        drop(self.handle.spawn_blocking(task));
    }

    fn name(&self) -> &str {
        "worker-pool"
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("submitted", &self.submitted())
            .finish()
    }
}

/// Runs every task immediately on the submitting thread
///
/// Gives deterministic, single-threaded execution for tests and for embedders
/// that drive actors from their own loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }

    fn name(&self) -> &str {
        "inline"
    }
}
