//! Withdrawal subsystem.
//!
//! # Data Flow
//! ```text
//! NewWithdrawal (typed, validated)
//!     → engine.rs submit: reserve in one locked transaction
//!     → queue.rs: explicit mpsc queue, caller sees `pending`
//!     → engine.rs execute: custody signer → broadcast → settle
//!     → reconciler.rs: timer pass for anything left pending
//! ```
//!
//! Once broadcast, a transfer cannot be cancelled; before broadcast, a
//! stale reservation is rolled back by the reconciler.

pub mod engine;
pub mod queue;
pub mod reconciler;
pub mod types;
pub mod validation;

pub use engine::WithdrawalEngine;
pub use queue::{spawn_worker, ExecutionQueue};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use types::{NewWithdrawal, WithdrawalError};
