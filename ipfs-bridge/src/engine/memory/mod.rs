//! An in-process engine.
//!
//! Every node started on the same [`MemoryEngine`] is a peer of the others:
//! content missing from the local repository is looked up in the
//! repositories of the other online instances, and names published by one
//! node can be resolved by the rest. Each call runs on its own engine thread
//! and completes through its [`Trampoline`], the same way a foreign engine
//! would.

mod cid;
mod repo;
mod signal;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CancelSignalId, Engine, InstanceId, Trampoline, INVALID_ID};
use crate::errors::{
    CODE_ADD_FAILED, CODE_CAT_FAILED, CODE_PIN_FAILED, CODE_PUBLISH_FAILED, CODE_READ_FAILED,
    CODE_REPO_CREATION_FAILED, CODE_RESOLVE_FAILED, CODE_SUCCESS, CODE_UNPIN_FAILED,
};
use repo::Repo;
use signal::Signal;

const IPNS_PREFIX: &str = "/ipns/";

/// Configuration for the in-process engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEngineConfig {
    /// How long `cat` and `pin` keep looking for missing content.
    /// `None` waits until the call is cancelled or the node stops.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
    /// How often waiting calls look for content again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl MemoryEngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fetch timeout.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Gets the fetch timeout as a Duration.
    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Gets the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

struct RunningNode {
    repo: Repo,
    online: bool,
    pinned: HashSet<String>,
}

#[derive(Default)]
struct Instance {
    node: Option<RunningNode>,
    next_signal: CancelSignalId,
    signals: HashMap<CancelSignalId, Arc<Signal>>,
}

struct NameRecord {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct EngineState {
    next_instance: InstanceId,
    instances: HashMap<InstanceId, Instance>,
    names: HashMap<String, NameRecord>,
}

enum Fetch {
    Found(Vec<u8>),
    Cancelled,
    TimedOut,
    Unreadable,
    Stopped,
}

struct Inner {
    config: MemoryEngineConfig,
    state: Mutex<EngineState>,
}

/// In-process engine with repositories on the local filesystem.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl MemoryEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(config: MemoryEngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryEngineConfig {
        &self.inner.config
    }

    /// Returns the number of allocated, not yet freed instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    /// Returns the number of cancellation signals an instance still holds.
    #[must_use]
    pub fn live_signals(&self, instance: InstanceId) -> usize {
        self.inner
            .state
            .lock()
            .instances
            .get(&instance)
            .map_or(0, |i| i.signals.len())
    }

    fn spawn<F>(&self, operation: &'static str, job: F)
    where
        F: FnOnce(&Inner) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name(format!("memory-engine-{operation}"))
            .spawn(move || job(&inner));

        // On failure the job, and with it the trampoline, is dropped, which
        // reports the call as abandoned.
        if let Err(err) = spawned {
            warn!(operation, error = %err, "failed to spawn engine thread");
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(MemoryEngineConfig::default())
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.inner.config)
            .field("instances", &self.instance_count())
            .finish()
    }
}

impl Inner {
    fn allocate(&self) -> InstanceId {
        let mut state = self.state.lock();
        let id = state.next_instance;
        state.next_instance += 1;
        state.instances.insert(id, Instance::default());
        id
    }

    fn start(&self, instance: InstanceId, repo_path: &Path, online: bool) -> i32 {
        let repo = match Repo::open_or_create(repo_path) {
            Ok(repo) => repo,
            Err(err) => {
                warn!(path = %repo_path.display(), error = %err, "failed to open repository");
                return CODE_REPO_CREATION_FAILED;
            }
        };

        let mut state = self.state.lock();
        let Some(entry) = state.instances.get_mut(&instance) else {
            warn!(instance, "start requested for an unallocated instance");
            return CODE_REPO_CREATION_FAILED;
        };

        info!(
            instance,
            peer_id = repo.peer_id(),
            repo = %repo.root().display(),
            online,
            "engine node started"
        );
        entry.node = Some(RunningNode {
            repo,
            online,
            pinned: HashSet::new(),
        });
        CODE_SUCCESS
    }

    fn running_repo(&self, instance: InstanceId) -> Option<Repo> {
        self.state
            .lock()
            .instances
            .get(&instance)
            .and_then(|i| i.node.as_ref())
            .map(|node| node.repo.clone())
    }

    fn signal(&self, instance: InstanceId, signal: CancelSignalId) -> Arc<Signal> {
        self.state
            .lock()
            .instances
            .get(&instance)
            .and_then(|i| i.signals.get(&signal))
            .cloned()
            // Calls issued without a registered signal simply cannot be cancelled.
            .unwrap_or_default()
    }

    /// Repositories of the other online peers, empty when `instance` is offline.
    fn swarm(&self, instance: InstanceId) -> Vec<Repo> {
        let state = self.state.lock();
        let online = state
            .instances
            .get(&instance)
            .and_then(|i| i.node.as_ref())
            .is_some_and(|node| node.online);
        if !online {
            return Vec::new();
        }

        state
            .instances
            .iter()
            .filter(|(id, _)| **id != instance)
            .filter_map(|(_, i)| i.node.as_ref())
            .filter(|node| node.online)
            .map(|node| node.repo.clone())
            .collect()
    }

    fn fetch(&self, instance: InstanceId, signal: &Signal, cid: &str) -> Fetch {
        let deadline = self.config.fetch_timeout().map(|t| Instant::now() + t);

        loop {
            // stop() cancels every signal of the instance under the same lock
            // that clears the node, so this check comes first.
            if signal.is_cancelled() {
                return Fetch::Cancelled;
            }
            let Some(local) = self.running_repo(instance) else {
                return Fetch::Stopped;
            };

            match local.get(cid) {
                Ok(Some(data)) => return Fetch::Found(data),
                Ok(None) => {}
                Err(err) => {
                    warn!(cid, error = %err, "failed to read local block");
                    return Fetch::Unreadable;
                }
            }

            for peer in self.swarm(instance) {
                if let Ok(Some(data)) = peer.get(cid) {
                    debug!(cid, peer = peer.peer_id(), "fetched block from peer");
                    if let Err(err) = local.put(cid, &data) {
                        warn!(cid, error = %err, "failed to cache fetched block");
                    }
                    return Fetch::Found(data);
                }
            }

            if signal.wait(self.config.poll_interval()) {
                return Fetch::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Fetch::TimedOut;
            }
        }
    }

    fn add(&self, instance: InstanceId, data: &[u8], compute_only: bool) -> Result<String, i32> {
        let repo = self.running_repo(instance).ok_or(CODE_ADD_FAILED)?;
        let cid = cid::compute(data);

        if !compute_only {
            repo.put(&cid, data).map_err(|err| {
                warn!(cid = %cid, error = %err, "failed to store block");
                CODE_ADD_FAILED
            })?;
        }
        Ok(cid)
    }

    fn pin(&self, instance: InstanceId, signal: &Signal, cid: &str) -> Option<i32> {
        if !cid::is_well_formed(cid) {
            return Some(CODE_PIN_FAILED);
        }

        match self.fetch(instance, signal, cid) {
            Fetch::Found(_) => {}
            Fetch::Cancelled => return None,
            Fetch::TimedOut | Fetch::Unreadable | Fetch::Stopped => return Some(CODE_PIN_FAILED),
        }

        let mut state = self.state.lock();
        match state.instances.get_mut(&instance).and_then(|i| i.node.as_mut()) {
            Some(node) => {
                node.pinned.insert(cid.to_string());
                Some(CODE_SUCCESS)
            }
            None => Some(CODE_PIN_FAILED),
        }
    }

    fn unpin(&self, instance: InstanceId, cid: &str) -> i32 {
        let mut state = self.state.lock();
        let removed = state
            .instances
            .get_mut(&instance)
            .and_then(|i| i.node.as_mut())
            .is_some_and(|node| node.pinned.remove(cid));

        if removed {
            CODE_SUCCESS
        } else {
            CODE_UNPIN_FAILED
        }
    }

    fn publish(&self, instance: InstanceId, cid: &str, ttl: Duration) -> i32 {
        if !cid::is_well_formed(cid) {
            warn!(cid, "refusing to publish a malformed CID");
            return CODE_PUBLISH_FAILED;
        }

        let mut state = self.state.lock();
        let Some(name) = state
            .instances
            .get(&instance)
            .and_then(|i| i.node.as_ref())
            .map(|node| node.repo.peer_id().to_string())
        else {
            return CODE_PUBLISH_FAILED;
        };

        debug!(name = %name, cid, ttl_secs = ttl.as_secs(), "publishing name record");
        state.names.insert(
            name,
            NameRecord {
                value: cid.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        CODE_SUCCESS
    }

    fn resolve(&self, instance: InstanceId, name: &str) -> Result<String, i32> {
        let name = name.strip_prefix(IPNS_PREFIX).unwrap_or(name);
        let state = self.state.lock();

        let node = state
            .instances
            .get(&instance)
            .and_then(|i| i.node.as_ref())
            .ok_or(CODE_RESOLVE_FAILED)?;
        if !node.online && node.repo.peer_id() != name {
            return Err(CODE_RESOLVE_FAILED);
        }

        state
            .names
            .get(name)
            .filter(|record| record.expires_at > Instant::now())
            .map(|record| record.value.clone())
            .ok_or(CODE_RESOLVE_FAILED)
    }
}

impl Engine for MemoryEngine {
    fn allocate(&self) -> InstanceId {
        self.inner.allocate()
    }

    fn free(&self, instance: InstanceId) {
        let removed = self.inner.state.lock().instances.remove(&instance);
        if let Some(entry) = removed {
            for signal in entry.signals.values() {
                signal.cancel();
            }
        }
    }

    fn start(&self, instance: InstanceId, repo_path: &Path, online: bool) -> i32 {
        self.inner.start(instance, repo_path, online)
    }

    fn start_async(&self, repo_path: &Path, online: bool, done: Trampoline) {
        let repo_path: PathBuf = repo_path.to_path_buf();
        self.spawn("start", move |inner| {
            let instance = inner.allocate();
            let code = inner.start(instance, &repo_path, online);
            if code == CODE_SUCCESS {
                done.complete(code, &instance.to_le_bytes());
            } else {
                inner.state.lock().instances.remove(&instance);
                done.complete(code, &[]);
            }
        });
    }

    fn stop(&self, instance: InstanceId) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.instances.get_mut(&instance) {
            if entry.node.take().is_some() {
                info!(instance, "engine node stopped");
            }
            for (_, signal) in entry.signals.drain() {
                signal.cancel();
            }
        }
    }

    fn node_id(&self, instance: InstanceId) -> Option<String> {
        self.inner
            .running_repo(instance)
            .map(|repo| repo.peer_id().to_string())
    }

    fn add(&self, instance: InstanceId, data: &[u8], compute_only: bool, done: Trampoline) {
        let data = data.to_vec();
        self.spawn("add", move |inner| match inner.add(instance, &data, compute_only) {
            Ok(cid) => done.complete(CODE_SUCCESS, cid.as_bytes()),
            Err(code) => done.complete(code, &[]),
        });
    }

    fn cat(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        let cid = cid.to_string();
        let signal = self.inner.signal(instance, signal);
        self.spawn("cat", move |inner| {
            if !cid::is_well_formed(&cid) {
                warn!(cid = %cid, "failed to parse CID");
                done.complete(CODE_CAT_FAILED, &[]);
                return;
            }

            match inner.fetch(instance, &signal, &cid) {
                Fetch::Found(data) => done.complete(CODE_SUCCESS, &data),
                Fetch::Cancelled => done.abort(),
                Fetch::Unreadable => done.complete(CODE_READ_FAILED, &[]),
                Fetch::TimedOut | Fetch::Stopped => done.complete(CODE_CAT_FAILED, &[]),
            }
        });
    }

    fn pin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        let cid = cid.to_string();
        let signal = self.inner.signal(instance, signal);
        self.spawn("pin", move |inner| match inner.pin(instance, &signal, &cid) {
            Some(code) => done.complete(code, &[]),
            None => done.abort(),
        });
    }

    fn unpin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline) {
        let cid = cid.to_string();
        let signal = self.inner.signal(instance, signal);
        self.spawn("unpin", move |inner| {
            if signal.is_cancelled() {
                done.abort();
                return;
            }
            done.complete(inner.unpin(instance, &cid), &[]);
        });
    }

    fn publish(
        &self,
        instance: InstanceId,
        signal: CancelSignalId,
        cid: &str,
        ttl_seconds: u64,
        done: Trampoline,
    ) {
        let cid = cid.to_string();
        let signal = self.inner.signal(instance, signal);
        self.spawn("publish", move |inner| {
            if signal.is_cancelled() {
                done.abort();
                return;
            }
            let code = inner.publish(instance, &cid, Duration::from_secs(ttl_seconds));
            done.complete(code, &[]);
        });
    }

    fn resolve(&self, instance: InstanceId, signal: CancelSignalId, name: &str, done: Trampoline) {
        let name = name.to_string();
        let signal = self.inner.signal(instance, signal);
        self.spawn("resolve", move |inner| {
            if signal.is_cancelled() {
                done.abort();
                return;
            }
            match inner.resolve(instance, &name) {
                Ok(value) => done.complete(CODE_SUCCESS, value.as_bytes()),
                Err(code) => done.complete(code, &[]),
            }
        });
    }

    fn cancel(&self, instance: InstanceId, signal: CancelSignalId) {
        let target = self
            .inner
            .state
            .lock()
            .instances
            .get(&instance)
            .and_then(|i| i.signals.get(&signal))
            .cloned();

        if let Some(target) = target {
            debug!(instance, signal, "cancelling engine call");
            target.cancel();
        }
    }

    fn cancellation_allocate(&self, instance: InstanceId) -> CancelSignalId {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.instances.get_mut(&instance) else {
            return INVALID_ID;
        };

        let id = entry.next_signal;
        entry.next_signal += 1;
        entry.signals.insert(id, Arc::new(Signal::default()));
        id
    }

    fn cancellation_free(&self, instance: InstanceId, signal: CancelSignalId) {
        if let Some(entry) = self.inner.state.lock().instances.get_mut(&instance) {
            entry.signals.remove(&signal);
        }
    }
}
