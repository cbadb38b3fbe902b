//! Worker dispatch.
//!
//! Jobs run on tokio's blocking pool, never on the submitting thread.
//! Submission returns immediately with an abort handle.

use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;

use crate::config::StoreConfig;

/// A unit of blocking work. It receives the dispatcher slot it runs in.
pub type Job = Box<dyn FnOnce(WorkerSlot) + Send + 'static>;

/// Facility that runs jobs off the submitting thread.
pub trait Dispatcher: Send + Sync + 'static {
    /// Schedule `job`. Must not block the caller.
    fn submit(&self, job: Job) -> Dispatched;
}

/// Handle to one submitted job.
#[derive(Debug)]
pub struct Dispatched {
    abort: AbortHandle,
}

impl Dispatched {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Prevent the job from starting if it has not started yet.
    ///
    /// A job that is already running keeps running; it has to observe its
    /// own cancellation flag.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A running job's share of a bounded dispatcher.
///
/// A job that waits on its consumer parks, giving its permit to a queued
/// job until the wait is over. Otherwise a consumer that holds one stream
/// open while awaiting another could starve every permit.
pub struct WorkerSlot {
    bound: Option<(Arc<Semaphore>, Option<OwnedSemaphorePermit>)>,
}

impl WorkerSlot {
    /// Slot of a job that does not count against any limit.
    pub fn unbounded() -> Self {
        Self { bound: None }
    }

    fn bounded(semaphore: Arc<Semaphore>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            bound: Some((semaphore, Some(permit))),
        }
    }

    /// Whether this slot currently holds a dispatcher permit.
    pub fn holds_permit(&self) -> bool {
        matches!(self.bound, Some((_, Some(_))))
    }

    /// Run `wait` without holding a permit, then take one back.
    pub fn park<R>(&mut self, wait: impl FnOnce() -> R) -> R {
        let Some((semaphore, permit)) = &mut self.bound else {
            return wait();
        };
        drop(permit.take());
        let result = wait();
        match futures::executor::block_on(semaphore.clone().acquire_owned()) {
            Ok(resumed) => *permit = Some(resumed),
            Err(_) => tracing::warn!("Dispatcher closed while a job was parked"),
        }
        result
    }
}

impl fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("bounded", &self.bound.is_some())
            .field("holds_permit", &self.holds_permit())
            .finish()
    }
}

/// Dispatcher backed by tokio's blocking thread pool.
///
/// When bounded, at most `max_concurrent` jobs run at once; the rest wait
/// for a permit without occupying a blocking thread. Parked jobs do not
/// count against the bound.
#[derive(Clone)]
pub struct TokioDispatcher {
    runtime: Handle,
    permits: Option<Arc<Semaphore>>,
}

impl TokioDispatcher {
    /// Unbounded dispatcher on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            permits: None,
        }
    }

    /// Unbounded dispatcher on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Dispatcher running at most `max_concurrent` jobs at a time.
    pub fn bounded(runtime: Handle, max_concurrent: usize) -> Self {
        Self {
            runtime,
            permits: Some(Arc::new(Semaphore::new(max_concurrent.max(1)))),
        }
    }

    /// Build from configuration; a worker limit of 0 means unbounded.
    pub fn from_config(runtime: Handle, config: &StoreConfig) -> Self {
        match config.worker_limit {
            0 => Self::new(runtime),
            limit => Self::bounded(runtime, limit),
        }
    }

    /// Permits currently free, or `None` when unbounded.
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }
}

impl Dispatcher for TokioDispatcher {
    fn submit(&self, job: Job) -> Dispatched {
        let permits = self.permits.clone();
        let handle = self.runtime.spawn(async move {
            let slot = match permits {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => WorkerSlot::bounded(semaphore, permit),
                    Err(_) => {
                        tracing::warn!("Dispatcher closed, dropping job");
                        return;
                    }
                },
                None => WorkerSlot::unbounded(),
            };

            // The slot moves into the job so that aborting this wrapper
            // cannot release its permit while the job is still running.
            let result = tokio::task::spawn_blocking(move || job(slot)).await;

            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "Worker job panicked");
                }
            }
        });
        Dispatched::new(handle.abort_handle())
    }
}
