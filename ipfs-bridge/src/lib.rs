//! # ipfs-bridge
//!
//! Bridges a callback-driven, multi-threaded storage engine into a
//! single-threaded async event loop.
//!
//! The engine runs every call on threads of its own and reports back through
//! a one-shot callback. This crate turns each call into an operation that:
//!
//! - **Resolves exactly once**: with a success value, an engine failure, or
//!   a distinct aborted outcome
//! - **Resolves on the loop**: completions cross from engine threads by being
//!   posted onto the loop, never by running there directly
//! - **Can be cancelled**: through a cloneable, idempotent [`CancelToken`]
//! - **Survives teardown**: stopping a node aborts everything still in flight,
//!   and late completions are discarded instead of touching freed state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ipfs_bridge::prelude::*;
//! use std::sync::Arc;
//!
//! let loop_handle = LoopHandle::current()?;
//! let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::default());
//!
//! let node = Node::start(engine, &loop_handle, "./repo", NodeConfig::default())?;
//! let cid = node.add_str("hello")?.await.into_result()?;
//!
//! let fetch = node.cat(&cid)?;
//! let token = fetch.cancel_token();
//! let content = fetch.await;
//! ```
//!
//! [`CancelToken`]: cancellation::CancelToken

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cid;
pub mod engine;
pub mod errors;
pub mod events;
pub mod node;
pub mod runtime;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancelToken;
    pub use crate::cid::CID_SIZE;
    pub use crate::engine::{Engine, MemoryEngine, MemoryEngineConfig};
    pub use crate::errors::{EngineCode, NodeError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::node::{AddOptions, Continuation, Node, NodeConfig, Operation, Outcome};
    pub use crate::runtime::LoopHandle;
}
