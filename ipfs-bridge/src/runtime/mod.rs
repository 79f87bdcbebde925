//! The event loop side of the adapter.
//!
//! Engines deliver completions on their own threads. The only way back onto
//! the loop is [`LoopHandle::post`].

mod loop_handle;

pub use loop_handle::{LoopError, LoopHandle, WorkGuard};
