//! Cooperative cancellation of in-flight operations.

mod token;

pub use token::CancelToken;
