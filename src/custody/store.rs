//! Argon2id + AES-256-GCM encrypted secret store.
//!
//! Encrypts each secret under a password-derived key:
//! 1. Argon2id derives a 32-byte encryption key from the password + a
//!    per-record random salt
//! 2. AES-256-GCM encrypts the plaintext with a random nonce
//! 3. All records are stored in one JSON file with the parameters needed
//!    for future decryption
//!
//! Plaintext secrets exist only in the TTL-bounded in-memory cache and in
//! the transient return values handed to callers. Every access attempt is
//! appended to the audit log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::CustodyConfig;
use crate::custody::audit::AccessLog;
use crate::custody::cache::SecretCache;
use crate::custody::types::{
    CustodyError, CustodyResult, KdfParams, SecretAction, SecretKind, SecretRecord,
};

/// Argon2id parameters: 64 MB memory, 3 iterations, 1 lane of parallelism.
const ARGON2_MEMORY_KIB: u32 = 65536;
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LEN: usize = 32;

/// Salt length in bytes.
const SALT_LEN: usize = 32;
/// AES-GCM nonce length in bytes (96 bits).
const NONCE_LEN: usize = 12;

const STORE_VERSION: u32 = 1;

/// On-disk layout of the secrets file.
#[derive(Serialize, Deserialize)]
struct SecretsFile {
    version: u32,
    secrets: HashMap<SecretKind, SecretRecord>,
}

/// Proof that the caller presented the master password. Holds a zeroizing
/// copy used to derive per-record keys; dropping the handle wipes it.
pub struct UnlockedHandle {
    password: Zeroizing<String>,
}

impl UnlockedHandle {
    fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for UnlockedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedHandle").finish_non_exhaustive()
    }
}

/// File-backed store of encrypted secrets with an in-memory TTL cache and
/// an append-only access log.
pub struct SecretStore {
    path: PathBuf,
    records: RwLock<HashMap<SecretKind, SecretRecord>>,
    cache: SecretCache,
    audit: AccessLog,
}

impl SecretStore {
    /// Open (or lazily create) the secrets file at `path`.
    pub fn open(
        path: impl Into<PathBuf>,
        cache_ttl: Duration,
        cache_max_entries: usize,
        audit: AccessLog,
    ) -> CustodyResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file: SecretsFile = serde_json::from_str(&content)?;
            if file.version != STORE_VERSION {
                return Err(CustodyError::Crypto(format!(
                    "unsupported secret store version: {}",
                    file.version
                )));
            }
            file.secrets
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
            cache: SecretCache::new(cache_ttl, cache_max_entries),
            audit,
        })
    }

    /// Open a store wired from the custody section of the service config.
    pub fn from_config(config: &CustodyConfig) -> CustodyResult<Self> {
        let audit = AccessLog::new(&config.audit_log_path, config.audit_batch_size);
        Self::open(
            &config.secrets_path,
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
            audit,
        )
    }

    /// Whether a master seed has been provisioned.
    pub fn is_initialized(&self) -> bool {
        self.read_records().contains_key(&SecretKind::MasterSeed)
    }

    /// Verify the master password by decrypting the master seed record.
    pub fn unlock(&self, master_password: &str) -> CustodyResult<UnlockedHandle> {
        let record = match self.read_records().get(&SecretKind::MasterSeed).cloned() {
            Some(r) => r,
            None => {
                self.audit.record(SecretAction::Unlock, None, false);
                return Err(CustodyError::SecretNotFound(SecretKind::MasterSeed));
            }
        };

        match decrypt_record(&record, master_password, SecretKind::MasterSeed) {
            Ok(_) => {
                self.audit.record(SecretAction::Unlock, None, true);
                Ok(UnlockedHandle {
                    password: Zeroizing::new(master_password.to_string()),
                })
            }
            Err(_) => {
                self.audit.record(SecretAction::Unlock, None, false);
                Err(CustodyError::InvalidPassword)
            }
        }
    }

    /// Fetch and decrypt a secret, consulting the cache first.
    pub fn get_secret(
        &self,
        kind: SecretKind,
        handle: &UnlockedHandle,
    ) -> CustodyResult<Zeroizing<Vec<u8>>> {
        if let Some(plaintext) = self.cache.get(kind) {
            self.audit.record(SecretAction::Get, Some(kind), true);
            return Ok(plaintext);
        }

        let record = match self.read_records().get(&kind).cloned() {
            Some(r) => r,
            None => {
                self.audit.record(SecretAction::Get, Some(kind), false);
                return Err(CustodyError::SecretNotFound(kind));
            }
        };

        match decrypt_record(&record, handle.password(), kind) {
            Ok(plaintext) => {
                if let Some(evicted) = self.cache.insert(kind, plaintext.clone()) {
                    self.audit.record(SecretAction::Evict, Some(evicted), true);
                }
                self.bump_access_count(kind);
                self.audit.record(SecretAction::Get, Some(kind), true);
                Ok(plaintext)
            }
            Err(e) => {
                self.audit.record(SecretAction::Get, Some(kind), false);
                Err(e)
            }
        }
    }

    /// Convenience wrapper for secrets that are UTF-8 strings (seed
    /// phrases, hex keys).
    pub fn get_secret_string(
        &self,
        kind: SecretKind,
        handle: &UnlockedHandle,
    ) -> CustodyResult<Zeroizing<String>> {
        let bytes = self.get_secret(kind, handle)?;
        let s = String::from_utf8(bytes.to_vec())
            .map_err(|_| CustodyError::DecryptionFailed(kind))?;
        Ok(Zeroizing::new(s))
    }

    /// Encrypt and persist a new secret. Fails if one already exists;
    /// rotation is the only path that replaces ciphertext.
    pub fn store_secret(
        &self,
        kind: SecretKind,
        plaintext: &[u8],
        password: &str,
    ) -> CustodyResult<()> {
        if self.read_records().contains_key(&kind) {
            self.audit.record(SecretAction::Store, Some(kind), false);
            return Err(CustodyError::AlreadyExists(kind));
        }

        let record = encrypt_record(plaintext, password)?;
        let mut updated = self.read_records().clone();
        updated.insert(kind, record);

        match self.persist(&updated) {
            Ok(()) => {
                *self.write_records() = updated;
                self.audit.record(SecretAction::Store, Some(kind), true);
                Ok(())
            }
            Err(e) => {
                self.audit.record(SecretAction::Store, Some(kind), false);
                Err(e)
            }
        }
    }

    /// Re-encrypt a secret under a new password.
    ///
    /// The new file is fully written and atomically renamed over the old
    /// one before the in-memory state changes, so a crash at any point
    /// leaves exactly one valid ciphertext on disk.
    pub fn rotate_secret(
        &self,
        kind: SecretKind,
        old_password: &str,
        new_password: &str,
    ) -> CustodyResult<()> {
        let record = match self.read_records().get(&kind).cloned() {
            Some(r) => r,
            None => {
                self.audit.record(SecretAction::Rotate, Some(kind), false);
                return Err(CustodyError::SecretNotFound(kind));
            }
        };

        let plaintext = match decrypt_record(&record, old_password, kind) {
            Ok(p) => p,
            Err(e) => {
                self.audit.record(SecretAction::Rotate, Some(kind), false);
                return Err(e);
            }
        };

        let mut rotated = encrypt_record(&plaintext, new_password)?;
        rotated.created_at = record.created_at;
        rotated.rotated_at = Some(Utc::now());
        rotated.access_count = record.access_count;

        let mut updated = self.read_records().clone();
        updated.insert(kind, rotated);

        match self.persist(&updated) {
            Ok(()) => {
                *self.write_records() = updated;
                self.cache.invalidate(kind);
                self.audit.record(SecretAction::Rotate, Some(kind), true);
                Ok(())
            }
            Err(e) => {
                self.audit.record(SecretAction::Rotate, Some(kind), false);
                Err(e)
            }
        }
    }

    /// Drop expired cache entries, auditing each eviction.
    pub fn purge_cache(&self) {
        for kind in self.cache.purge_expired() {
            self.audit.record(SecretAction::Evict, Some(kind), true);
        }
    }

    /// Flush any buffered audit entries.
    pub fn flush_audit(&self) -> CustodyResult<()> {
        self.audit.flush()
    }

    fn bump_access_count(&self, kind: SecretKind) {
        if let Some(record) = self.write_records().get_mut(&kind) {
            record.access_count += 1;
        }
    }

    /// Write the records map to a temp file and rename it into place.
    fn persist(&self, records: &HashMap<SecretKind, SecretRecord>) -> CustodyResult<()> {
        let file = SecretsFile {
            version: STORE_VERSION,
            secrets: records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SecretKind, SecretRecord>> {
        match self.records.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SecretKind, SecretRecord>> {
        match self.records.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Restrict the secrets file to the owning process (0600).
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Encrypt a plaintext under a password with a fresh salt and nonce.
fn encrypt_record(plaintext: &[u8], password: &str) -> CustodyResult<SecretRecord> {
    let mut rng = rand::thread_rng();

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);

    let derived_key = derive_key(password, &salt)?;

    let cipher = Aes256Gcm::new_from_slice(&derived_key)
        .map_err(|e| CustodyError::Crypto(format!("AES key init failed: {}", e)))?;

    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CustodyError::Crypto(format!("encryption failed: {}", e)))?;

    Ok(SecretRecord {
        cipher: "aes-256-gcm".to_string(),
        kdf: "argon2id".to_string(),
        kdf_params: KdfParams {
            memory: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        },
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
        created_at: Utc::now(),
        rotated_at: None,
        access_count: 0,
    })
}

/// Decrypt a record with the given password. The AES-GCM tag check makes
/// a wrong password and corrupted ciphertext indistinguishable.
fn decrypt_record(
    record: &SecretRecord,
    password: &str,
    kind: SecretKind,
) -> CustodyResult<Zeroizing<Vec<u8>>> {
    let salt = hex::decode(&record.salt)
        .map_err(|e| CustodyError::Crypto(format!("invalid salt hex: {}", e)))?;
    let nonce_bytes = hex::decode(&record.nonce)
        .map_err(|e| CustodyError::Crypto(format!("invalid nonce hex: {}", e)))?;
    let ciphertext = hex::decode(&record.ciphertext)
        .map_err(|e| CustodyError::Crypto(format!("invalid ciphertext hex: {}", e)))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(CustodyError::Crypto(format!(
            "invalid nonce length: expected {}, got {}",
            NONCE_LEN,
            nonce_bytes.len()
        )));
    }

    let derived_key = derive_key(password, &salt)?;

    let cipher = Aes256Gcm::new_from_slice(&derived_key)
        .map_err(|e| CustodyError::Crypto(format!("AES key init failed: {}", e)))?;

    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| CustodyError::DecryptionFailed(kind))?;

    Ok(Zeroizing::new(plaintext))
}

/// Derive a 32-byte key from a password and salt using Argon2id.
fn derive_key(password: &str, salt: &[u8]) -> CustodyResult<[u8; 32]> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| CustodyError::Crypto(format!("Argon2 params error: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .map_err(|e| CustodyError::Crypto(format!("Argon2 hashing failed: {}", e)))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD: &str = "correct horse battery staple";
    const SEED: &[u8] =
        b"test test test test test test test test test test test junk";

    fn test_store(dir: &tempfile::TempDir) -> SecretStore {
        let audit = AccessLog::new(dir.path().join("access.log"), 100);
        SecretStore::open(
            dir.path().join("secrets.json"),
            Duration::from_secs(60),
            8,
            audit,
        )
        .unwrap()
    }

    #[test]
    fn test_store_unlock_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        assert!(!store.is_initialized());

        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();
        assert!(store.is_initialized());

        let handle = store.unlock(PASSWORD).unwrap();
        let seed = store.get_secret(SecretKind::MasterSeed, &handle).unwrap();
        assert_eq!(&*seed, SEED);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        let result = store.unlock("wrong password");
        assert!(matches!(result, Err(CustodyError::InvalidPassword)));
    }

    #[test]
    fn test_missing_secret() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        let handle = store.unlock(PASSWORD).unwrap();
        let result = store.get_secret(SecretKind::TreasuryKey, &handle);
        assert!(matches!(
            result,
            Err(CustodyError::SecretNotFound(SecretKind::TreasuryKey))
        ));
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();
        let result = store.store_secret(SecretKind::MasterSeed, SEED, PASSWORD);
        assert!(matches!(result, Err(CustodyError::AlreadyExists(_))));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = test_store(&dir);
            store
                .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
                .unwrap();
        }

        let store = test_store(&dir);
        let handle = store.unlock(PASSWORD).unwrap();
        let seed = store.get_secret(SecretKind::MasterSeed, &handle).unwrap();
        assert_eq!(&*seed, SEED);
    }

    #[test]
    fn test_rotation_changes_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        store
            .rotate_secret(SecretKind::MasterSeed, PASSWORD, "new password")
            .unwrap();

        assert!(matches!(
            store.unlock(PASSWORD),
            Err(CustodyError::InvalidPassword)
        ));
        let handle = store.unlock("new password").unwrap();
        let seed = store.get_secret(SecretKind::MasterSeed, &handle).unwrap();
        assert_eq!(&*seed, SEED);
    }

    #[test]
    fn test_rotation_with_wrong_password_leaves_store_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        let result = store.rotate_secret(SecretKind::MasterSeed, "wrong", "new");
        assert!(result.is_err());

        // Old ciphertext still valid, on disk and in memory.
        let store = test_store(&dir);
        assert!(store.unlock(PASSWORD).is_ok());
    }

    #[test]
    fn test_rotation_preserves_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::TreasuryKey, b"0xabc", PASSWORD)
            .unwrap();
        store.store_secret(SecretKind::MasterSeed, SEED, PASSWORD).unwrap();

        store
            .rotate_secret(SecretKind::TreasuryKey, PASSWORD, PASSWORD)
            .unwrap();

        let records = store.read_records();
        let record = records.get(&SecretKind::TreasuryKey).unwrap();
        assert!(record.rotated_at.is_some());
    }

    #[test]
    fn test_get_secret_string() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        let handle = store.unlock(PASSWORD).unwrap();
        let phrase = store
            .get_secret_string(SecretKind::MasterSeed, &handle)
            .unwrap();
        assert!(phrase.starts_with("test test"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        store
            .store_secret(SecretKind::MasterSeed, SEED, PASSWORD)
            .unwrap();

        let meta = std::fs::metadata(dir.path().join("secrets.json")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
