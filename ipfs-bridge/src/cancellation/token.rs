//! Cancellation token for a single in-flight operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::engine::{CancelSignalId, Engine, InstanceId};

/// Requests early termination of one operation.
///
/// The token forwards an abort request to the engine; it never resolves the
/// operation itself. The operation still settles through its normal
/// completion, now carrying an aborted outcome, once the engine honours the
/// request. Clones share state, and only the first `cancel` of any clone is
/// forwarded.
///
/// Cancelling after the operation settled is harmless: the engine no longer
/// knows the signal and ignores the request.
#[derive(Clone)]
pub struct CancelToken {
    engine: Arc<dyn Engine>,
    instance: InstanceId,
    signal: Option<CancelSignalId>,
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        instance: InstanceId,
        signal: Option<CancelSignalId>,
    ) -> Self {
        Self {
            engine,
            instance,
            signal,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cancellation.
    ///
    /// This is idempotent - only the first request reaches the engine.
    pub fn cancel(&self) {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        match self.signal {
            Some(signal) => {
                debug!(instance = self.instance, signal, "forwarding cancellation to engine");
                self.engine.cancel(self.instance, signal);
            }
            None => debug!(
                instance = self.instance,
                "operation has no cancellation signal; only node teardown can abort it"
            ),
        }
    }

    /// Returns whether cancellation has been requested through this token.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Returns whether the operation can be cancelled through the engine.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        self.signal.is_some()
    }

    /// Returns the engine-assigned cancellation signal, if any.
    #[must_use]
    pub const fn signal(&self) -> Option<CancelSignalId> {
        self.signal
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("instance", &self.instance)
            .field("signal", &self.signal)
            .field("requested", &self.is_requested())
            .finish()
    }
}
