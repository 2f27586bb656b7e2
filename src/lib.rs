//! Custodial hot-wallet core.
//!
//! One master seed serves many users: each gets a deterministically
//! derived deposit address, balances live in a Postgres ledger, and
//! withdrawals run through a reserve → broadcast → settle state machine
//! that stays consistent with irreversible on-chain transfers.
//!
//! # Architecture Overview
//!
//! ```text
//!               ┌─────────────────────────────────────────────────┐
//!               │                 HOT WALLET CORE                  │
//!               │                                                  │
//!  address      │  ┌──────────┐   ┌────────────┐   ┌───────────┐  │
//!  request ─────┼─▶│ custody  │──▶│ derivation │──▶│  ledger   │  │
//!               │  │ (seed)   │   │ (HD path)  │   │ (account) │  │
//!               │  └──────────┘   └────────────┘   └───────────┘  │
//!               │                                                  │
//!  deposit      │  ┌──────────────────┐      ┌────────────────┐   │
//!  callback ────┼─▶│ chain::deposits  │─────▶│ ledger credit  │   │
//!               │  └──────────────────┘      │ (idempotent)   │   │
//!               │                            └────────────────┘   │
//!               │                                                  │
//!  withdrawal   │  ┌────────────────────────────────────────────┐ │
//!  request ─────┼─▶│ withdrawal: validate → reserve → queue →   │ │
//!               │  │ broadcast → settle   (reconciler on timer) │ │
//!               │  └────────────────────────────────────────────┘ │
//!               │                                                  │
//!  timer ───────┼─▶ consolidation: sweep deposit addrs → treasury  │
//!               │                                                  │
//!               │  cross-cutting: config, observability,           │
//!               │  resilience (lock retry), lifecycle (shutdown)   │
//!               └─────────────────────────────────────────────────┘
//! ```
//!
//! HTTP transport, dashboards, and metrics exporters are caller
//! concerns; this crate exposes the typed core API.

// Core subsystems
pub mod custody;
pub mod derivation;
pub mod ledger;
pub mod withdrawal;

// Chain integration
pub mod chain;
pub mod consolidation;

// Cross-cutting concerns
pub mod config;
pub mod context;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::WalletConfig;
pub use context::{AppContext, AppError};
pub use lifecycle::Shutdown;
