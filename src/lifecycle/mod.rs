//! Process lifecycle coordination.
//!
//! Long-running tasks (withdrawal worker, reconciler, consolidation
//! scheduler) subscribe to a shared shutdown broadcast and exit cleanly
//! when it fires.

pub mod shutdown;

pub use shutdown::Shutdown;
