//! The node facade.
//!
//! A [`Node`] is a started engine instance. Every operation validates its
//! input, registers a handle with the node's registry, hands the engine a
//! trampoline for that handle and returns at once. The outcome is delivered
//! on the loop thread, either through an awaitable [`Operation`] or through a
//! [`Continuation`] passed to the `*_with` variant.
//!
//! ```no_run
//! use ipfs_bridge::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), NodeError> {
//! let loop_handle = LoopHandle::current()?;
//! let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::default());
//! let node = Node::build(engine, &loop_handle, "/tmp/repo", NodeConfig::default())
//!     .await
//!     .into_result()?;
//!
//! let cid = node.add_str("hello")?.await.into_result()?;
//! let content = node.cat(&cid)?.await.into_result()?;
//! assert_eq!(content, b"hello");
//! # Ok(())
//! # }
//! ```

mod config;
mod handle;
mod outcome;
mod registry;

#[cfg(test)]
mod integration_tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use config::{AddOptions, NodeConfig};
pub use outcome::{Continuation, Operation, OperationKind, Outcome};

use crate::cancellation::CancelToken;
use crate::cid;
use crate::engine::{CancelSignalId, Engine, InstanceId, Trampoline, INVALID_ID};
use crate::errors::{EngineCode, NodeError};
use crate::runtime::LoopHandle;
use handle::Decoder;
use registry::Registry;

/// A started node.
///
/// Dropping the node stops it. Operations still in flight at that point
/// resolve as [`Outcome::Aborted`].
#[derive(Debug)]
pub struct Node {
    registry: Arc<Registry>,
}

impl Node {
    /// Starts a node synchronously, blocking the caller while the engine
    /// opens (or creates) the repository.
    pub fn start(
        engine: Arc<dyn Engine>,
        loop_handle: &LoopHandle,
        repo_path: impl AsRef<Path>,
        config: NodeConfig,
    ) -> Result<Self, NodeError> {
        let repo_path = repo_path.as_ref();
        let registry = Registry::new(Arc::clone(&engine), loop_handle.clone(), config.event_sink());

        let instance = engine.allocate();
        registry.bind(instance);

        let code = EngineCode::from_raw(engine.start(instance, repo_path, config.online));
        if !code.is_success() {
            warn!(instance, repo = %repo_path.display(), error = %code, "failed to start node");
            // Dropping the registry releases the instance.
            return Err(NodeError::Engine(code));
        }

        Ok(Self::started(registry))
    }

    /// Starts a node in the background.
    pub fn build(
        engine: Arc<dyn Engine>,
        loop_handle: &LoopHandle,
        repo_path: impl AsRef<Path>,
        config: NodeConfig,
    ) -> Operation<Self> {
        let (continuation, pending) = Operation::channel();
        Self::build_with(engine, loop_handle, repo_path, config, continuation);
        pending.issued(None)
    }

    /// Starts a node in the background, handing it to `continuation` on the
    /// loop thread.
    pub fn build_with<C: Continuation<Self>>(
        engine: Arc<dyn Engine>,
        loop_handle: &LoopHandle,
        repo_path: impl AsRef<Path>,
        config: NodeConfig,
        continuation: C,
    ) {
        let repo_path = repo_path.as_ref();
        let registry = Registry::new(Arc::clone(&engine), loop_handle.clone(), config.event_sink());

        let node_registry = Arc::clone(&registry);
        let on_started = move |outcome: Outcome<InstanceId>| {
            let outcome = outcome.map(|instance| {
                node_registry.bind(instance);
                Self::started(node_registry)
            });
            continuation.resolve(outcome);
        };

        if let Some(handle) = registry.register_or_abort(OperationKind::Start, decode_instance, on_started) {
            debug!(key = handle.key(), repo = %repo_path.display(), "starting node");
            engine.start_async(repo_path, config.online, handle.trampoline());
        }
    }

    fn started(registry: Arc<Registry>) -> Self {
        info!(instance = ?registry.instance(), "node started");
        registry.report_started();
        Self { registry }
    }

    /// Returns the engine's identifier for this node.
    pub fn identity(&self) -> Result<String, NodeError> {
        let instance = self.live_instance()?;
        self.registry
            .engine()
            .node_id(instance)
            .ok_or(NodeError::IdentityUnavailable)
    }

    /// Adds content; resolves with its CID.
    pub fn add(&self, data: impl AsRef<[u8]>) -> Result<Operation<String>, NodeError> {
        self.add_with_options(data, AddOptions::default())
    }

    /// Adds UTF-8 text; resolves with its CID.
    pub fn add_str(&self, text: &str) -> Result<Operation<String>, NodeError> {
        self.add(text.as_bytes())
    }

    /// Adds content with options; resolves with its CID.
    pub fn add_with_options(
        &self,
        data: impl AsRef<[u8]>,
        options: AddOptions,
    ) -> Result<Operation<String>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.add_with(data, options, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Adds content, delivering its CID to `continuation`.
    ///
    /// The engine offers no cancellation for `add`, so the returned token is
    /// inert; only stopping the node aborts an add.
    pub fn add_with<C: Continuation<String>>(
        &self,
        data: impl AsRef<[u8]>,
        options: AddOptions,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        let data = data.as_ref();
        self.issue(
            OperationKind::Add,
            false,
            decode_text,
            continuation,
            |engine, instance, _, done| engine.add(instance, data, options.only_hash, done),
        )
    }

    /// Fetches the content named by `cid`.
    pub fn cat(&self, cid: &str) -> Result<Operation<Vec<u8>>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.cat_with(cid, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Fetches the content named by `cid`, delivering it to `continuation`.
    pub fn cat_with<C: Continuation<Vec<u8>>>(
        &self,
        cid: &str,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        cid::validate(cid)?;
        self.issue(
            OperationKind::Cat,
            true,
            decode_bytes,
            continuation,
            |engine, instance, signal, done| engine.cat(instance, signal, cid, done),
        )
    }

    /// Pins `cid`, fetching it first if needed.
    pub fn pin(&self, cid: &str) -> Result<Operation<()>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.pin_with(cid, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Pins `cid`, reporting to `continuation`.
    pub fn pin_with<C: Continuation<()>>(
        &self,
        cid: &str,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        cid::validate(cid)?;
        self.issue(
            OperationKind::Pin,
            true,
            decode_unit,
            continuation,
            |engine, instance, signal, done| engine.pin(instance, signal, cid, done),
        )
    }

    /// Unpins `cid`.
    pub fn unpin(&self, cid: &str) -> Result<Operation<()>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.unpin_with(cid, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Unpins `cid`, reporting to `continuation`.
    pub fn unpin_with<C: Continuation<()>>(
        &self,
        cid: &str,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        cid::validate(cid)?;
        self.issue(
            OperationKind::Unpin,
            true,
            decode_unit,
            continuation,
            |engine, instance, signal, done| engine.unpin(instance, signal, cid, done),
        )
    }

    /// Publishes `cid` under this node's name for `ttl`.
    pub fn publish(&self, cid: &str, ttl: Duration) -> Result<Operation<()>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.publish_with(cid, ttl, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Publishes `cid` under this node's name for `ttl`, reporting to
    /// `continuation`. The lifetime is passed to the engine in whole seconds.
    pub fn publish_with<C: Continuation<()>>(
        &self,
        cid: &str,
        ttl: Duration,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        cid::validate(cid)?;
        let ttl_seconds = ttl.as_secs();
        self.issue(
            OperationKind::Publish,
            true,
            decode_unit,
            continuation,
            |engine, instance, signal, done| {
                engine.publish(instance, signal, cid, ttl_seconds, done);
            },
        )
    }

    /// Resolves a published name to the value it points at.
    pub fn resolve(&self, name: &str) -> Result<Operation<String>, NodeError> {
        let (continuation, pending) = Operation::channel();
        let cancel = self.resolve_with(name, continuation)?;
        Ok(pending.issued(Some(cancel)))
    }

    /// Resolves a published name, delivering the value to `continuation`.
    pub fn resolve_with<C: Continuation<String>>(
        &self,
        name: &str,
        continuation: C,
    ) -> Result<CancelToken, NodeError> {
        if name.is_empty() {
            return Err(NodeError::EmptyName);
        }
        self.issue(
            OperationKind::Resolve,
            true,
            decode_text,
            continuation,
            |engine, instance, signal, done| engine.resolve(instance, signal, name, done),
        )
    }

    /// Stops the node.
    ///
    /// Every operation still in flight is scheduled to resolve as
    /// [`Outcome::Aborted`]; those continuations run on the loop after this
    /// returns. New operations are rejected with [`NodeError::Stopped`].
    /// Calling `stop` again does nothing.
    pub fn stop(&self) {
        self.registry.stop();
    }

    /// Returns true once [`Node::stop`] ran.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.registry.is_destroyed()
    }

    /// Returns the number of operations that have not been claimed yet.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.registry.pending()
    }

    /// Returns the engine's instance id for this node.
    #[must_use]
    pub fn instance(&self) -> Option<InstanceId> {
        self.registry.instance()
    }

    /// Returns the loop this node delivers outcomes on.
    #[must_use]
    pub fn loop_handle(&self) -> &LoopHandle {
        self.registry.loop_handle()
    }

    fn live_instance(&self) -> Result<InstanceId, NodeError> {
        match self.registry.instance() {
            Some(instance) if !self.registry.is_destroyed() => Ok(instance),
            _ => Err(NodeError::Stopped),
        }
    }

    /// Registers a handle and issues the engine call for it.
    ///
    /// Cancellable operations get a fresh signal before the call; it is
    /// released again when the handle settles.
    fn issue<T, C, F>(
        &self,
        kind: OperationKind,
        cancellable: bool,
        decode: Decoder<T>,
        continuation: C,
        call: F,
    ) -> Result<CancelToken, NodeError>
    where
        T: Send + 'static,
        C: Continuation<T>,
        F: FnOnce(&dyn Engine, InstanceId, CancelSignalId, Trampoline),
    {
        let instance = self.live_instance()?;
        let engine = Arc::clone(self.registry.engine());

        let signal = if cancellable {
            allocate_signal(engine.as_ref(), instance)
        } else {
            None
        };
        let handle = match self.registry.register(kind, signal, decode, continuation) {
            Ok(handle) => handle,
            Err(err) => {
                if let Some(signal) = signal {
                    engine.cancellation_free(instance, signal);
                }
                return Err(err);
            }
        };

        debug!(key = handle.key(), operation = %kind, instance, signal = ?signal, "operation issued");
        self.registry.report_issued(handle.key(), kind);
        call(
            engine.as_ref(),
            instance,
            signal.unwrap_or(INVALID_ID),
            handle.trampoline(),
        );

        Ok(CancelToken::new(engine, instance, signal))
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.registry.stop();
    }
}

/// Asks the engine for a cancellation signal; `None` if it has none to give.
fn allocate_signal(engine: &dyn Engine, instance: InstanceId) -> Option<CancelSignalId> {
    let signal = engine.cancellation_allocate(instance);
    if signal == INVALID_ID {
        warn!(instance, "engine has no cancellation signal, operation is not cancellable");
        return None;
    }
    Some(signal)
}

// A malformed payload carries no usable instance id, so whatever the engine
// allocated for it cannot be freed from here and stays with the engine.
fn decode_instance(payload: Vec<u8>) -> Result<InstanceId, EngineCode> {
    <[u8; 8]>::try_from(payload.as_slice())
        .map(InstanceId::from_le_bytes)
        .map_err(|_| {
            warn!(
                len = payload.len(),
                "engine started a node but reported no instance id, the instance is leaked"
            );
            EngineCode::RepoCreationFailed
        })
}

fn decode_text(payload: Vec<u8>) -> Result<String, EngineCode> {
    String::from_utf8(payload).map_err(|_| EngineCode::ReadFailed)
}

#[allow(clippy::unnecessary_wraps)]
fn decode_bytes(payload: Vec<u8>) -> Result<Vec<u8>, EngineCode> {
    Ok(payload)
}

#[allow(clippy::unnecessary_wraps, clippy::needless_pass_by_value)]
fn decode_unit(_: Vec<u8>) -> Result<(), EngineCode> {
    Ok(())
}
