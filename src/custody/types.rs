//! Key custody types and error definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kinds of secrets the custody store manages. Each kind is encrypted
/// under its own salt and nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// BIP-39 seed phrase all deposit addresses derive from.
    MasterSeed,
    /// Hex-encoded private key of the treasury (paying) address.
    TreasuryKey,
    /// Credential for the RPC provider's REST surface.
    ApiCredential,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::MasterSeed => "master_seed",
            SecretKind::TreasuryKey => "treasury_key",
            SecretKind::ApiCredential => "api_credential",
        }
    }
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// KDF parameters for Argon2id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// One encrypted secret at rest. The plaintext is never part of this
/// structure; decryption results live only in the in-memory cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Symmetric cipher identifier.
    pub cipher: String,
    /// Key-derivation function identifier.
    pub kdf: String,
    pub kdf_params: KdfParams,
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded nonce.
    pub nonce: String,
    /// Hex-encoded ciphertext.
    pub ciphertext: String,
    /// When the secret was first stored.
    pub created_at: DateTime<Utc>,
    /// When the secret was last re-encrypted, if ever.
    pub rotated_at: Option<DateTime<Utc>>,
    /// Number of successful decryptions since creation.
    pub access_count: u64,
}

/// Actions recorded in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretAction {
    Unlock,
    Get,
    Store,
    Rotate,
    Evict,
}

/// Append-only audit record of a secret access attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub action: SecretAction,
    /// Kind involved; `None` for store-wide actions such as unlock.
    pub kind: Option<SecretKind>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Errors that can occur during custody operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// The master password cannot decrypt the stored master secret.
    #[error("invalid master password")]
    InvalidPassword,

    /// No record of the requested kind exists.
    #[error("secret not found: {0}")]
    SecretNotFound(SecretKind),

    /// Ciphertext failed its integrity check (wrong password or corrupt data).
    #[error("decryption failed for {0}: wrong password or corrupted data")]
    DecryptionFailed(SecretKind),

    /// A secret of this kind already exists and overwrite was not requested.
    #[error("secret already exists: {0}")]
    AlreadyExists(SecretKind),

    /// KDF or cipher failure unrelated to password correctness.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Secrets file could not be read or written.
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secrets file is not valid JSON.
    #[error("secret store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Result type for custody operations.
pub type CustodyResult<T> = Result<T, CustodyError>;
