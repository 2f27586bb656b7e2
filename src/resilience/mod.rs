//! Retry and backoff utilities.
//!
//! The only contended resource in the core is the account row lock; lock
//! conflicts are retried a bounded number of times with jittered
//! exponential backoff before being surfaced to the caller.

pub mod backoff;

pub use backoff::{calculate_backoff, RetryPolicy};
