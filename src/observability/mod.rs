//! Observability subsystem.
//!
//! Structured logging via `tracing`. Every chain or persistence failure
//! is logged with the correlating withdrawal or sweep identifier so an
//! operator can reconstruct what happened to a given request.

pub mod logging;

pub use logging::init_logging;
