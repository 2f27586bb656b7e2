//! Key custody subsystem.
//!
//! # Data Flow
//! ```text
//! master password (env var)
//!     → store.rs (unlock: decrypt master seed record)
//!     → UnlockedHandle (proof of password, zeroized on drop)
//!     → get_secret(kind) → cache.rs (TTL hit) or Argon2id+AES-GCM decrypt
//!     → audit.rs (every access appended, batch-flushed)
//! ```
//!
//! # Security Constraints
//! - Plaintext secrets are never persisted; only ciphertext records are
//! - Decrypted values live in a bounded TTL cache and zeroize on drop
//! - The secrets file is written atomically and chmod 0600
//! - Rotation writes the new ciphertext before replacing the old

pub mod audit;
pub mod cache;
pub mod store;
pub mod types;

pub use audit::AccessLog;
pub use cache::SecretCache;
pub use store::{SecretStore, UnlockedHandle};
pub use types::{CustodyError, CustodyResult, SecretKind};
