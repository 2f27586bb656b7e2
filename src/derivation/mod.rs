//! Hierarchical-deterministic address derivation.
//!
//! Stateless and pure: (master seed, index) → (address, private key).
//! The master seed itself lives in the custody store; this module never
//! persists anything.

pub mod deriver;

pub use deriver::{derivation_index, derive, signer_from_hex, DerivationError, DerivedKey};
