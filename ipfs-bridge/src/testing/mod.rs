//! Testing utilities for code built on the bridge.
//!
//! This module provides:
//! - [`ManualEngine`], an engine whose calls complete only when a test says so
//! - [`OutcomeRecorder`], a continuation that records what it was given

mod manual_engine;

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;

pub use manual_engine::{EngineCall, ManualEngine, RecordedCall};

use crate::node::Outcome;

/// Records every outcome delivered to its continuations, with the thread
/// each one ran on.
#[derive(Debug)]
pub struct OutcomeRecorder<T> {
    delivered: Arc<Mutex<Vec<(Outcome<T>, ThreadId)>>>,
}

impl<T> Clone for OutcomeRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            delivered: Arc::clone(&self.delivered),
        }
    }
}

impl<T> Default for OutcomeRecorder<T> {
    fn default() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> OutcomeRecorder<T> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a continuation that records into this recorder.
    pub fn continuation(&self) -> impl FnOnce(Outcome<T>) + Send + 'static {
        let delivered = Arc::clone(&self.delivered);
        move |outcome| {
            delivered
                .lock()
                .push((outcome, std::thread::current().id()));
        }
    }

    /// Returns the recorded outcomes in delivery order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<Outcome<T>> {
        self.delivered
            .lock()
            .iter()
            .map(|(outcome, _)| outcome.clone())
            .collect()
    }

    /// Returns the threads the continuations ran on.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadId> {
        self.delivered.lock().iter().map(|(_, thread)| *thread).collect()
    }

    /// Returns the number of recorded outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}
