//! Handle onto the single-threaded loop that runs every continuation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Notify;

/// Why a loop handle could not be created.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum LoopError {
    /// No tokio runtime is running on this thread.
    #[error("no event loop is running on this thread")]
    NoRuntime,
    /// The runtime schedules tasks on more than one thread.
    #[error("event loop must be a current-thread runtime, found {0:?}")]
    NotCurrentThread(RuntimeFlavor),
}

/// Outstanding-work bookkeeping shared by a loop handle and its guards.
#[derive(Default)]
struct WorkCounter {
    outstanding: AtomicUsize,
    idle: Notify,
}

/// A cloneable, thread-safe handle onto the event loop.
///
/// The loop is a current-thread tokio runtime, so everything posted through
/// this handle runs on the one thread driving that runtime. Any thread may
/// post; only the loop thread executes.
///
/// Besides posting, the handle tracks outstanding work. A [`WorkGuard`] marks
/// the loop as busy, and [`LoopHandle::until_idle`] resolves once every guard
/// has been dropped, which is how a caller waits for all in-flight operations
/// to settle.
#[derive(Clone)]
pub struct LoopHandle {
    runtime: Handle,
    work: Arc<WorkCounter>,
}

impl LoopHandle {
    /// Creates a loop handle over a runtime handle.
    ///
    /// Fails with [`LoopError::NotCurrentThread`] unless the runtime is a
    /// current-thread one; a multi-thread runtime would run posted jobs on
    /// whichever worker picks them up.
    pub fn new(runtime: Handle) -> Result<Self, LoopError> {
        match runtime.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(Self {
                runtime,
                work: Arc::new(WorkCounter::default()),
            }),
            flavor => Err(LoopError::NotCurrentThread(flavor)),
        }
    }

    /// Creates a loop handle over the runtime the caller is running on.
    pub fn current() -> Result<Self, LoopError> {
        let runtime = Handle::try_current().map_err(|_| LoopError::NoRuntime)?;
        Self::new(runtime)
    }

    /// Schedules `job` to run on the loop thread.
    ///
    /// Never blocks and never runs `job` inline, even when called from the
    /// loop thread itself. If the runtime has shut down, `job` is dropped
    /// without running.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.runtime.spawn(async move { job() }));
    }

    /// Marks the loop as busy until the returned guard is dropped.
    #[must_use]
    pub fn work(&self) -> WorkGuard {
        self.work.outstanding.fetch_add(1, Ordering::SeqCst);
        WorkGuard {
            work: Arc::clone(&self.work),
        }
    }

    /// Returns the number of live work guards.
    #[must_use]
    pub fn outstanding_work(&self) -> usize {
        self.work.outstanding.load(Ordering::SeqCst)
    }

    /// Resolves once no work guard is alive.
    pub async fn until_idle(&self) {
        loop {
            let notified = self.work.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding_work() == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Returns the underlying runtime handle.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("outstanding_work", &self.outstanding_work())
            .finish()
    }
}

/// Keeps its loop busy while alive.
#[must_use = "dropping the guard immediately releases the work"]
pub struct WorkGuard {
    work: Arc<WorkCounter>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.work.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.work.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGuard").finish_non_exhaustive()
    }
}
