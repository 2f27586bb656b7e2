//! Fund consolidation subsystem.
//!
//! Sweeps idle balances from per-user deposit addresses into the
//! treasury address on a timer or on demand, recording each sweep in the
//! append-only consolidation log.

pub mod scheduler;

pub use scheduler::{ConsolidationError, Consolidator, SweepSummary};
