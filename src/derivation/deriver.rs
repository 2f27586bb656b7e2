//! Deterministic per-user address derivation.
//!
//! One fixed BIP-44 path with the account index as the only varying
//! component: `m/44'/60'/0'/0/{index}`. The same seed and index always
//! produce the same address and key, so any user's deposit address can be
//! re-derived without consulting previously issued ones.

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use thiserror::Error;

/// Fixed derivation path prefix; the per-user index is appended as the
/// final non-hardened component.
const PATH_PREFIX: &str = "m/44'/60'/0'/0";

/// Indices stay below the BIP-32 hardened boundary.
const INDEX_RANGE: u64 = 1 << 31;

/// Errors that can occur during key derivation.
#[derive(Debug, Error)]
pub enum DerivationError {
    /// The seed phrase failed its BIP-39 checksum or validity checks.
    /// Address issuance must abort rather than derive from a corrupt seed.
    #[error("invalid master seed: {0}")]
    InvalidSeed(String),

    /// The derivation path could not be walked.
    #[error("derivation failed: {0}")]
    Derivation(String),

    /// The derived scalar is not a valid signing key.
    #[error("invalid derived key: {0}")]
    Key(String),
}

/// An ephemeral derived keypair. Never persisted; the signer is handed to
/// the chain client for one broadcast and dropped.
pub struct DerivedKey {
    /// The deposit address for this index.
    pub address: Address,
    /// Signer over the derived private key.
    pub signer: PrivateKeySigner,
    /// The index this pair was derived at.
    pub index: u32,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("address", &self.address)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Map a user identifier onto a derivation index.
///
/// Numeric ids that fit below the hardened boundary are used directly;
/// anything else is keccak256-hashed and reduced modulo the safe range.
pub fn derivation_index(user_id: &str) -> u32 {
    if let Ok(n) = user_id.parse::<u64>() {
        if n < INDEX_RANGE {
            return n as u32;
        }
    }

    let digest = keccak256(user_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % INDEX_RANGE) as u32
}

/// Derive the address and private key at `index` from a BIP-39 seed phrase.
pub fn derive(seed_phrase: &str, index: u32) -> Result<DerivedKey, DerivationError> {
    let mnemonic = Mnemonic::parse(seed_phrase.trim())
        .map_err(|e| DerivationError::InvalidSeed(e.to_string()))?;
    let seed = mnemonic.to_seed("");

    let path: DerivationPath = format!("{}/{}", PATH_PREFIX, index)
        .parse()
        .map_err(|e| DerivationError::Derivation(format!("invalid path: {}", e)))?;

    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| DerivationError::Derivation(e.to_string()))?;

    let signer = PrivateKeySigner::from_slice(xprv.private_key().to_bytes().as_slice())
        .map_err(|e| DerivationError::Key(e.to_string()))?;

    Ok(DerivedKey {
        address: signer.address(),
        signer,
        index,
    })
}

/// Build a signer from a hex-encoded private key (with or without the 0x
/// prefix). Used for the treasury key held in custody.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, DerivationError> {
    let key_hex = private_key_hex
        .trim()
        .strip_prefix("0x")
        .unwrap_or_else(|| private_key_hex.trim());

    key_hex
        .parse()
        .map_err(|e| DerivationError::Key(format!("invalid private key format: {}", e)))
}
