//! Per-operation state and the completion path back onto the loop.

use std::sync::Arc;
use tracing::{debug, warn};

use super::outcome::{Continuation, Outcome, OperationKind};
use super::registry::Registry;
use crate::engine::{CancelSignalId, Completion, Trampoline};
use crate::errors::EngineCode;
use crate::runtime::WorkGuard;

/// Key of a live handle in its registry.
pub(crate) type HandleKey = u64;

/// Continuation with the payload still in its raw engine form.
type RawContinuation = Box<dyn FnOnce(Outcome<Vec<u8>>) + Send>;

/// Turns the raw payload of a successful call into the operation's value.
pub(crate) type Decoder<T> = fn(Vec<u8>) -> Result<T, EngineCode>;

/// State of an operation that has not been claimed yet.
///
/// Owned by the registry's live collection; whoever removes it from there
/// owns the continuation and is the only one allowed to run it.
pub(crate) struct Pending {
    kind: OperationKind,
    continuation: RawContinuation,
    signal: Option<CancelSignalId>,
    // Keeps the loop busy until the continuation has run.
    work: WorkGuard,
}

impl Pending {
    pub(crate) fn new<T, C>(
        kind: OperationKind,
        signal: Option<CancelSignalId>,
        decode: Decoder<T>,
        continuation: C,
        work: WorkGuard,
    ) -> Self
    where
        T: Send + 'static,
        C: Continuation<T>,
    {
        let continuation: RawContinuation = Box::new(move |raw: Outcome<Vec<u8>>| {
            let outcome = match raw {
                Outcome::Success(payload) => match decode(payload) {
                    Ok(value) => Outcome::Success(value),
                    Err(code) => Outcome::Failure(code),
                },
                Outcome::Failure(code) => Outcome::Failure(code),
                Outcome::Aborted => Outcome::Aborted,
            };
            continuation.resolve(outcome);
        });

        Self {
            kind,
            continuation,
            signal,
            work,
        }
    }

    pub(crate) const fn kind(&self) -> OperationKind {
        self.kind
    }

    pub(crate) const fn signal(&self) -> Option<CancelSignalId> {
        self.signal
    }

    /// Runs the continuation. Must be called on the loop thread.
    pub(crate) fn resolve(self, outcome: Outcome<Vec<u8>>) {
        let Self {
            continuation, work, ..
        } = self;
        continuation(outcome);
        drop(work);
    }
}

/// Reference an engine completion uses to find its handle again.
///
/// Holds the registry alive until the completion has been settled, which may
/// be after the node itself was dropped.
pub(crate) struct HandleRef {
    registry: Arc<Registry>,
    key: HandleKey,
}

impl HandleRef {
    pub(crate) const fn new(registry: Arc<Registry>, key: HandleKey) -> Self {
        Self { registry, key }
    }

    pub(crate) const fn key(&self) -> HandleKey {
        self.key
    }

    /// Builds the trampoline handed to the engine for this handle.
    pub(crate) fn trampoline(self) -> Trampoline {
        Trampoline::new(move |completion| self.marshal(completion))
    }

    /// Engine thread: nothing but a post back onto the loop.
    fn marshal(self, completion: Completion) {
        let loop_handle = self.registry.loop_handle().clone();
        let work = loop_handle.work();
        loop_handle.post(move || {
            self.settle(completion);
            drop(work);
        });
    }

    /// Loop thread: claim the handle and resolve it, unless teardown won.
    fn settle(self, completion: Completion) {
        let Some(pending) = self.registry.claim(self.key) else {
            debug!(key = self.key, "completion arrived after teardown; discarded");
            return;
        };

        let outcome = match completion {
            Completion::Finished { code, payload } => match EngineCode::from_raw(code) {
                EngineCode::Success => Outcome::Success(payload),
                failure => Outcome::Failure(failure),
            },
            Completion::Aborted => Outcome::Aborted,
            Completion::Abandoned => {
                warn!(
                    key = self.key,
                    operation = %pending.kind(),
                    "engine abandoned the call; resolving as aborted"
                );
                Outcome::Aborted
            }
        };

        if let Some(signal) = pending.signal() {
            self.registry.release_signal(signal);
        }
        self.registry.report_resolved(self.key, pending.kind(), &outcome);
        pending.resolve(outcome);
    }
}
