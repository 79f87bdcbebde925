//! A scriptable engine that completes calls only when told to.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::engine::{CancelSignalId, Engine, InstanceId, Trampoline, INVALID_ID};
use crate::errors::CODE_SUCCESS;

/// Which engine entry point a recorded call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCall {
    /// `start_async`.
    StartAsync,
    /// `add`.
    Add,
    /// `cat`.
    Cat,
    /// `pin`.
    Pin,
    /// `unpin`.
    Unpin,
    /// `publish`.
    Publish,
    /// `resolve`.
    Resolve,
}

/// A call recorded by [`ManualEngine`], without its trampoline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Entry point.
    pub call: EngineCall,
    /// Instance the call was issued against; `INVALID_ID` for `start_async`.
    pub instance: InstanceId,
    /// Cancellation signal, if the call carries one.
    pub signal: Option<CancelSignalId>,
    /// The CID, name, content or repository path, as bytes.
    pub argument: Vec<u8>,
    /// `compute_only` for `add`, `online` for `start_async`.
    pub flag: bool,
    /// Lifetime passed to `publish`.
    pub ttl_seconds: Option<u64>,
}

struct Call {
    record: RecordedCall,
    done: Option<Trampoline>,
}

struct State {
    next_instance: InstanceId,
    next_signal: CancelSignalId,
    start_code: i32,
    node_id: Option<String>,
    abort_on_cancel: bool,
    signals_exhausted: bool,
    calls: Vec<Call>,
    started: Vec<(InstanceId, PathBuf, bool)>,
    freed: Vec<InstanceId>,
    stopped: Vec<InstanceId>,
    cancelled: Vec<(InstanceId, CancelSignalId)>,
    live_signals: HashSet<(InstanceId, CancelSignalId)>,
}

/// An engine whose calls stay pending until a test completes them.
///
/// Every call is recorded together with its trampoline. Tests then complete,
/// abort or drop the trampoline, from any thread and in any order, which
/// makes the races between completion, cancellation and teardown scriptable.
pub struct ManualEngine {
    state: Mutex<State>,
}

impl Default for ManualEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                next_instance: 0,
                next_signal: 0,
                start_code: CODE_SUCCESS,
                node_id: Some("QmManualEngineNode".to_string()),
                abort_on_cancel: false,
                signals_exhausted: false,
                calls: Vec::new(),
                started: Vec::new(),
                freed: Vec::new(),
                stopped: Vec::new(),
                cancelled: Vec::new(),
                live_signals: HashSet::new(),
            }),
        }
    }
}

impl ManualEngine {
    /// Creates an engine whose starts succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `start` return `code`.
    #[must_use]
    pub fn with_start_code(self, code: i32) -> Self {
        self.state.lock().start_code = code;
        self
    }

    /// Sets the identity reported by `node_id`; `None` reports no identity.
    #[must_use]
    pub fn with_node_id(self, node_id: Option<&str>) -> Self {
        self.state.lock().node_id = node_id.map(str::to_string);
        self
    }

    /// Makes `cancel` abort the pending call bound to the signal right away,
    /// like an engine that honours cancellation promptly.
    #[must_use]
    pub fn with_abort_on_cancel(self) -> Self {
        self.state.lock().abort_on_cancel = true;
        self
    }

    /// Makes `cancellation_allocate` fail, returning `INVALID_ID`.
    #[must_use]
    pub fn without_signals(self) -> Self {
        self.state.lock().signals_exhausted = true;
        self
    }

    /// Returns the number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Returns the number of recorded calls of one kind.
    #[must_use]
    pub fn calls_of(&self, call: EngineCall) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.record.call == call)
            .count()
    }

    /// Returns a recorded call.
    #[must_use]
    pub fn call(&self, index: usize) -> Option<RecordedCall> {
        self.state
            .lock()
            .calls
            .get(index)
            .map(|c| c.record.clone())
    }

    /// Returns the number of calls whose trampoline has not been used yet.
    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.done.is_some())
            .count()
    }

    /// Takes the trampoline of a call, leaving the call answered.
    #[must_use]
    pub fn take(&self, index: usize) -> Option<Trampoline> {
        self.state
            .lock()
            .calls
            .get_mut(index)
            .and_then(|c| c.done.take())
    }

    /// Completes a call. Returns false if it was already answered.
    pub fn complete(&self, index: usize, code: i32, payload: &[u8]) -> bool {
        // Fired outside the lock.
        self.take(index)
            .map(|done| done.complete(code, payload))
            .is_some()
    }

    /// Reports a call as cancelled. Returns false if it was already answered.
    pub fn abort(&self, index: usize) -> bool {
        self.take(index).map(Trampoline::abort).is_some()
    }

    /// Drops the trampoline of a call without firing it.
    pub fn abandon(&self, index: usize) -> bool {
        self.take(index).map(drop).is_some()
    }

    /// Drops every unanswered trampoline.
    pub fn abandon_all(&self) {
        let pending: Vec<Trampoline> = self
            .state
            .lock()
            .calls
            .iter_mut()
            .filter_map(|c| c.done.take())
            .collect();
        drop(pending);
    }

    /// Returns the instances that were started, in order.
    #[must_use]
    pub fn started(&self) -> Vec<(InstanceId, PathBuf, bool)> {
        self.state.lock().started.clone()
    }

    /// Returns the instances passed to `free`, in order.
    #[must_use]
    pub fn freed(&self) -> Vec<InstanceId> {
        self.state.lock().freed.clone()
    }

    /// Returns the instances passed to `stop`, in order.
    #[must_use]
    pub fn stopped(&self) -> Vec<InstanceId> {
        self.state.lock().stopped.clone()
    }

    /// Returns every `cancel` request, in order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<(InstanceId, CancelSignalId)> {
        self.state.lock().cancelled.clone()
    }

    /// Returns the number of allocated, not yet released signals.
    #[must_use]
    pub fn live_signals(&self) -> usize {
        self.state.lock().live_signals.len()
    }

    fn record(&self, record: RecordedCall, done: Trampoline) {
        self.state.lock().calls.push(Call {
            record,
            done: Some(done),
        });
    }

    fn record_cid_call(
        &self,
        call: EngineCall,
        instance: InstanceId,
        signal: CancelSignalId,
        argument: &str,
        done: Trampoline,
    ) {
        self.record(
            RecordedCall {
                call,
                instance,
                signal: Some(signal),
                argument: argument.as_bytes().to_vec(),
                flag: false,
                ttl_seconds: None,
            },
            done,
        );
    }
}

impl Engine for ManualEngine {
    fn allocate(&self) -> InstanceId {
        let mut state = self.state.lock();
        let id = state.next_instance;
        state.next_instance += 1;
        id
    }

    fn free(&self, instance: InstanceId) {
        self.state.lock().freed.push(instance);
    }

    fn start(&self, instance: InstanceId, repo_path: &Path, online: bool) -> i32 {
        let mut state = self.state.lock();
        state.started.push((instance, repo_path.to_path_buf(), online));
        state.start_code
    }

    fn start_async(&self, repo_path: &Path, online: bool, done: Trampoline) {
        self.record(
            RecordedCall {
                call: EngineCall::StartAsync,
                instance: INVALID_ID,
                signal: None,
                argument: repo_path.to_string_lossy().as_bytes().to_vec(),
                flag: online,
                ttl_seconds: None,
            },
            done,
        );
    }

    fn stop(&self, instance: InstanceId) {
        let mut state = self.state.lock();
        state.stopped.push(instance);
        state.live_signals.retain(|(owner, _)| *owner != instance);
    }

    fn node_id(&self, _instance: InstanceId) -> Option<String> {
        self.state.lock().node_id.clone()
    }

    fn add(&self, instance: InstanceId, data: &[u8], compute_only: bool, done: Trampoline) {
        self.record(
            RecordedCall {
                call: EngineCall::Add,
                instance,
                signal: None,
                argument: data.to_vec(),
                flag: compute_only,
                ttl_seconds: None,
            },
            done,
        );
    }

    fn cat(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        self.record_cid_call(EngineCall::Cat, instance, signal, cid, done);
    }

    fn pin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        self.record_cid_call(EngineCall::Pin, instance, signal, cid, done);
    }

    fn unpin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        self.record_cid_call(EngineCall::Unpin, instance, signal, cid, done);
    }

    fn publish(
        &self,
        instance: InstanceId,
        signal: CancelSignalId,
        cid: &str,
        ttl_seconds: u64,
        done: Trampoline,
    ) {
        self.record(
            RecordedCall {
                call: EngineCall::Publish,
                instance,
                signal: Some(signal),
                argument: cid.as_bytes().to_vec(),
                flag: false,
                ttl_seconds: Some(ttl_seconds),
            },
            done,
        );
    }

    fn resolve(&self, instance: InstanceId, signal: CancelSignalId, name: &str, done: Trampoline) {
        self.record_cid_call(EngineCall::Resolve, instance, signal, name, done);
    }

    fn cancel(&self, instance: InstanceId, signal: CancelSignalId) {
        let target = {
            let mut state = self.state.lock();
            state.cancelled.push((instance, signal));
            if state.abort_on_cancel && state.live_signals.contains(&(instance, signal)) {
                state
                    .calls
                    .iter_mut()
                    .find(|c| c.record.instance == instance && c.record.signal == Some(signal))
                    .and_then(|c| c.done.take())
            } else {
                None
            }
        };

        if let Some(done) = target {
            done.abort();
        }
    }

    fn cancellation_allocate(&self, instance: InstanceId) -> CancelSignalId {
        let mut state = self.state.lock();
        if state.signals_exhausted {
            return INVALID_ID;
        }
        let id = state.next_signal;
        state.next_signal += 1;
        state.live_signals.insert((instance, id));
        id
    }

    fn cancellation_free(&self, instance: InstanceId, signal: CancelSignalId) {
        self.state.lock().live_signals.remove(&(instance, signal));
    }
}

impl std::fmt::Debug for ManualEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualEngine")
            .field("calls", &state.calls.len())
            .field("freed", &state.freed)
            .field("stopped", &state.stopped)
            .finish_non_exhaustive()
    }
}
