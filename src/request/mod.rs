//! Retrying, timed-out, optionally cache-backed network calls.

mod client;
mod error;
mod retry;

pub use client::{CacheTarget, RequestClient, RequestOptions};
pub use error::RequestError;
pub use retry::{RetryPolicy, RetryState};
