//! The one-shot completion handed to the engine with every call.

use tracing::warn;

/// How an engine finished a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The engine finished with a raw status code and a payload copy.
    Finished {
        /// Raw engine status code.
        code: i32,
        /// Payload bytes, copied out of the engine's buffer.
        payload: Vec<u8>,
    },
    /// The engine honoured a cancellation request.
    Aborted,
    /// The engine dropped the trampoline without ever calling it.
    Abandoned,
}

type Sink = Box<dyn FnOnce(Completion) + Send>;

/// Fixed-signature completion callback passed into the engine.
///
/// A trampoline is consumed by value, so an engine can fire it at most once.
/// Dropping it unfired reports [`Completion::Abandoned`]; the adapter turns
/// that into an aborted outcome rather than leaving the operation pending.
pub struct Trampoline {
    sink: Option<Sink>,
}

impl Trampoline {
    /// Creates a trampoline that forwards the completion to `sink`.
    pub fn new<F>(sink: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    /// Reports the result of the call.
    ///
    /// `payload` only has to live for the duration of this call; it is copied.
    pub fn complete(mut self, code: i32, payload: &[u8]) {
        if let Some(sink) = self.sink.take() {
            sink(Completion::Finished {
                code,
                payload: payload.to_vec(),
            });
        }
    }

    /// Reports that the call was cancelled before it finished.
    pub fn abort(mut self) {
        if let Some(sink) = self.sink.take() {
            sink(Completion::Aborted);
        }
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!("engine dropped a completion callback without invoking it");
            sink(Completion::Abandoned);
        }
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("armed", &self.sink.is_some())
            .finish()
    }
}
