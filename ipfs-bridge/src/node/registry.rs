//! Shared per-node state: the engine instance and the live operations.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::handle::{Decoder, HandleKey, HandleRef, Pending};
use super::outcome::{Continuation, Outcome, OperationKind};
use crate::engine::{CancelSignalId, Engine, InstanceId};
use crate::errors::NodeError;
use crate::events::{payload, EventSink};
use crate::runtime::LoopHandle;

#[derive(Default)]
struct State {
    destroyed: bool,
    live: HashMap<HandleKey, Pending>,
    next_key: HandleKey,
}

/// State shared by a node and all of its in-flight operations.
///
/// The mutex guards exactly two things, the `destroyed` flag and the live
/// collection. Claiming a handle means removing it from the collection under
/// that mutex, so whichever of completion and teardown gets there first owns
/// the continuation.
pub(crate) struct Registry {
    engine: Arc<dyn Engine>,
    loop_handle: LoopHandle,
    events: Arc<dyn EventSink>,
    instance: OnceLock<InstanceId>,
    state: Mutex<State>,
}

impl Registry {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        loop_handle: LoopHandle,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            loop_handle,
            events,
            instance: OnceLock::new(),
            state: Mutex::new(State::default()),
        })
    }

    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn loop_handle(&self) -> &LoopHandle {
        &self.loop_handle
    }

    pub(crate) fn instance(&self) -> Option<InstanceId> {
        self.instance.get().copied()
    }

    /// Takes ownership of an engine instance. Only the first call has effect.
    pub(crate) fn bind(&self, instance: InstanceId) {
        if self.instance.set(instance).is_err() {
            debug!(instance, "registry already bound to an instance");
        }
    }

    /// Adds a handle to the live collection.
    ///
    /// Fails with [`NodeError::Stopped`] once teardown has begun; the
    /// continuation is then dropped without running.
    pub(crate) fn register<T, C>(
        self: &Arc<Self>,
        kind: OperationKind,
        signal: Option<CancelSignalId>,
        decode: Decoder<T>,
        continuation: C,
    ) -> Result<HandleRef, NodeError>
    where
        T: Send + 'static,
        C: Continuation<T>,
    {
        let pending = Pending::new(kind, signal, decode, continuation, self.loop_handle.work());
        self.admit(pending).map_err(|_| NodeError::Stopped)
    }

    /// Like [`Registry::register`], but a rejected continuation still runs,
    /// with an aborted outcome, on the loop.
    pub(crate) fn register_or_abort<T, C>(
        self: &Arc<Self>,
        kind: OperationKind,
        decode: Decoder<T>,
        continuation: C,
    ) -> Option<HandleRef>
    where
        T: Send + 'static,
        C: Continuation<T>,
    {
        let pending = Pending::new(kind, None, decode, continuation, self.loop_handle.work());
        match self.admit(pending) {
            Ok(handle) => Some(handle),
            Err(pending) => {
                warn!(operation = %kind, "registry stopped, aborting operation");
                self.loop_handle.post(move || pending.resolve(Outcome::Aborted));
                None
            }
        }
    }

    fn admit(self: &Arc<Self>, pending: Pending) -> Result<HandleRef, Pending> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(pending);
        }
        let key = state.next_key;
        state.next_key += 1;
        state.live.insert(key, pending);
        drop(state);

        Ok(HandleRef::new(Arc::clone(self), key))
    }

    /// Removes a handle from the live collection; `None` if already claimed.
    pub(crate) fn claim(&self, key: HandleKey) -> Option<Pending> {
        self.state.lock().live.remove(&key)
    }

    /// Marks the registry destroyed and claims every live handle, scheduling
    /// an aborted outcome for each.
    ///
    /// Returns the number of aborted handles, or `None` if teardown already ran.
    fn teardown(&self) -> Option<usize> {
        let claimed: Vec<(HandleKey, Pending)> = {
            let mut state = self.state.lock();
            if state.destroyed {
                return None;
            }
            state.destroyed = true;
            state.live.drain().collect()
        };

        let count = claimed.len();
        for (key, pending) in claimed {
            debug!(key, operation = %pending.kind(), "aborting operation on teardown");
            self.report_resolved(key, pending.kind(), &Outcome::Aborted);
            self.loop_handle.post(move || pending.resolve(Outcome::Aborted));
        }
        Some(count)
    }

    /// Tears down every live operation, then stops the engine instance.
    ///
    /// Idempotent. Aborted continuations run on the loop after this returns.
    /// Stopping the instance also releases its outstanding cancellation signals.
    pub(crate) fn stop(&self) {
        let Some(aborted) = self.teardown() else {
            return;
        };

        if let Some(instance) = self.instance() {
            self.engine.stop(instance);
        }

        info!(instance = ?self.instance(), aborted, "node stopped");
        self.events.try_emit(
            "node.stopped",
            Some(payload(json!({
                "instance": self.instance(),
                "aborted": aborted,
            }))),
        );
    }

    pub(crate) fn release_signal(&self, signal: CancelSignalId) {
        if let Some(instance) = self.instance() {
            self.engine.cancellation_free(instance, signal);
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().live.len()
    }

    pub(crate) fn report_started(&self) {
        self.events.try_emit(
            "node.started",
            Some(payload(json!({ "instance": self.instance() }))),
        );
    }

    pub(crate) fn report_issued(&self, key: HandleKey, kind: OperationKind) {
        self.events.try_emit(
            "operation.issued",
            Some(payload(json!({
                "key": key,
                "operation": kind.as_str(),
            }))),
        );
    }

    pub(crate) fn report_resolved(
        &self,
        key: HandleKey,
        kind: OperationKind,
        outcome: &Outcome<Vec<u8>>,
    ) {
        let (status, code) = match outcome {
            Outcome::Success(_) => ("success", None),
            Outcome::Failure(code) => ("failure", Some(code.as_raw())),
            Outcome::Aborted => ("aborted", None),
        };
        debug!(key, operation = %kind, status, "operation resolved");
        self.events.try_emit(
            "operation.resolved",
            Some(payload(json!({
                "key": key,
                "operation": kind.as_str(),
                "outcome": status,
                "code": code,
            }))),
        );
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Some(&instance) = self.instance.get() {
            debug!(instance, "releasing engine instance");
            self.engine.free(instance);
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("instance", &self.instance())
            .field("destroyed", &self.is_destroyed())
            .field("pending", &self.pending())
            .finish()
    }
}
