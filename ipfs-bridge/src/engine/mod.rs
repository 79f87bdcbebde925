//! The boundary to the storage engine.
//!
//! The engine is an external collaborator: it owns content addressing,
//! networking and persistence, runs calls on its own threads, and reports
//! each call exactly once through a [`Trampoline`]. This module only
//! describes that contract; [`MemoryEngine`] is an in-process implementation
//! of it.

pub mod memory;
mod trampoline;

use std::path::Path;

pub use memory::{MemoryEngine, MemoryEngineConfig};
pub use trampoline::{Completion, Trampoline};

/// Engine-assigned identifier of a started node.
pub type InstanceId = u64;

/// Engine-assigned identifier of a per-call cancellation signal.
pub type CancelSignalId = u64;

/// Returned by engines in place of an id they could not allocate.
pub const INVALID_ID: u64 = u64::MAX;

/// A callback-driven storage engine.
///
/// Status codes are raw integers (see [`crate::errors::EngineCode`] for the
/// mapping). Calls taking a [`Trampoline`] return immediately; the engine
/// fires the trampoline later, from any thread. Slices passed in are only
/// borrowed for the duration of the call.
pub trait Engine: Send + Sync + 'static {
    /// Allocates an instance id for a node that is about to be started.
    fn allocate(&self) -> InstanceId;

    /// Releases an instance id. Called once per instance, after [`Engine::stop`].
    fn free(&self, instance: InstanceId);

    /// Opens (or creates) the repository at `repo_path` and starts the node.
    ///
    /// Blocks the caller; may do disk IO.
    fn start(&self, instance: InstanceId, repo_path: &Path, online: bool) -> i32;

    /// Allocates an instance and starts it in the background.
    ///
    /// On success the payload carries the instance id as 8 little-endian bytes.
    fn start_async(&self, repo_path: &Path, online: bool, done: Trampoline);

    /// Stops a started node. Outstanding calls of the instance are cancelled.
    fn stop(&self, instance: InstanceId);

    /// Returns the node's own identifier.
    fn node_id(&self, instance: InstanceId) -> Option<String>;

    /// Stores `data`; payload is the textual CID. With `compute_only` the CID
    /// is computed without storing anything.
    fn add(&self, instance: InstanceId, data: &[u8], compute_only: bool, done: Trampoline);

    /// Fetches the content named by `cid`; payload is the content.
    fn cat(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline);

    /// Pins `cid`; no payload.
    fn pin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline);

    /// Unpins `cid`; no payload.
    fn unpin(&self, instance: InstanceId, signal: CancelSignalId, cid: &str, done: Trampoline);

    /// Publishes `cid` under the node's name for `ttl_seconds`; no payload.
    fn publish(
        &self,
        instance: InstanceId,
        signal: CancelSignalId,
        cid: &str,
        ttl_seconds: u64,
        done: Trampoline,
    );

    /// Resolves a published name; payload is the value it points at.
    fn resolve(&self, instance: InstanceId, signal: CancelSignalId, name: &str, done: Trampoline);

    /// Requests cancellation of the call bound to `signal`.
    ///
    /// Unknown or already released signals must be ignored.
    fn cancel(&self, instance: InstanceId, signal: CancelSignalId);

    /// Allocates a fresh cancellation signal for the next call.
    fn cancellation_allocate(&self, instance: InstanceId) -> CancelSignalId;

    /// Releases a cancellation signal once its call has settled.
    fn cancellation_free(&self, instance: InstanceId, signal: CancelSignalId);
}
