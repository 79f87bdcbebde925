//! Operation results and the ways to receive them.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::cancellation::CancelToken;
use crate::errors::{EngineCode, NodeError};

/// The single result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The engine completed the call.
    Success(T),
    /// The engine reported a failure.
    Failure(EngineCode),
    /// The operation was cancelled or its node was torn down.
    Aborted,
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for [`Outcome::Aborted`].
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::Failure(code) => Outcome::Failure(code),
            Self::Aborted => Outcome::Aborted,
        }
    }

    /// Converts into a `Result`, keeping aborted distinct from failure.
    pub fn into_result(self) -> Result<T, NodeError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(code) => Err(NodeError::Engine(code)),
            Self::Aborted => Err(NodeError::Aborted),
        }
    }
}

/// Receives the outcome of an operation, exactly once, on the loop thread.
///
/// Implemented for every `FnOnce(Outcome<T>)` closure that can be sent to
/// the loop.
pub trait Continuation<T>: Send + 'static {
    /// Delivers the outcome.
    fn resolve(self, outcome: Outcome<T>);
}

impl<T, F> Continuation<T> for F
where
    F: FnOnce(Outcome<T>) + Send + 'static,
{
    fn resolve(self, outcome: Outcome<T>) {
        self(outcome);
    }
}

/// What an operation was, for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Node start.
    Start,
    /// Adding content.
    Add,
    /// Fetching content.
    Cat,
    /// Pinning content.
    Pin,
    /// Unpinning content.
    Unpin,
    /// Publishing a name record.
    Publish,
    /// Resolving a name.
    Resolve,
}

impl OperationKind {
    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Add => "add",
            Self::Cat => "cat",
            Self::Pin => "pin",
            Self::Unpin => "unpin",
            Self::Publish => "publish",
            Self::Resolve => "resolve",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-flight operation, awaitable for its [`Outcome`].
///
/// Dropping the future does not cancel the operation; use
/// [`Operation::cancel`] or the [`CancelToken`] for that.
#[must_use = "the outcome of an operation should be observed"]
pub struct Operation<T> {
    outcome: oneshot::Receiver<Outcome<T>>,
    cancel: Option<CancelToken>,
}

impl<T: Send + 'static> Operation<T> {
    /// Creates the continuation half and the awaitable half of an operation.
    pub(crate) fn channel() -> (impl Continuation<T>, PendingOperation<T>) {
        let (tx, rx) = oneshot::channel();
        let continuation = move |outcome: Outcome<T>| {
            // A dropped receiver means nobody is waiting any more.
            let _ = tx.send(outcome);
        };
        (continuation, PendingOperation { outcome: rx })
    }
}

impl<T> Operation<T> {
    /// Returns a token that cancels this operation.
    ///
    /// `None` for operations that cannot be cancelled through the engine.
    #[must_use]
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.cancel.clone()
    }

    /// Requests cancellation. The operation then resolves as aborted once the
    /// engine honours the request.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

impl<T> Future for Operation<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The continuation was dropped unresolved, which only happens when
            // the loop shut down underneath the operation.
            Poll::Ready(Err(_)) => Poll::Ready(Outcome::Aborted),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Receiving half of an operation that has not been issued yet.
pub(crate) struct PendingOperation<T> {
    outcome: oneshot::Receiver<Outcome<T>>,
}

impl<T> PendingOperation<T> {
    pub(crate) fn issued(self, cancel: Option<CancelToken>) -> Operation<T> {
        Operation {
            outcome: self.outcome,
            cancel,
        }
    }
}
