//! In-memory cache for decrypted secrets.
//!
//! Entries carry explicit expiry timestamps checked on read; eviction is
//! triggered lazily on access or by an explicit `purge_expired` call, so
//! correctness never depends on a background timer firing. Capacity is
//! bounded with least-recently-created eviction.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use zeroize::Zeroizing;

use crate::custody::types::SecretKind;

struct CachedSecret {
    plaintext: Zeroizing<Vec<u8>>,
    inserted_at: Instant,
    expires_at: Instant,
}

/// A thread-safe TTL cache for decrypted secret material.
///
/// Concurrent reads are lock-free per shard; the plaintext is zeroized
/// when an entry is dropped.
pub struct SecretCache {
    inner: DashMap<SecretKind, CachedSecret>,
    ttl: Duration,
    max_entries: usize,
}

impl SecretCache {
    /// Create a cache with the given TTL and capacity bound.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Look up a secret, removing and missing it if expired.
    pub fn get(&self, kind: SecretKind) -> Option<Zeroizing<Vec<u8>>> {
        let expired = match self.inner.get(&kind) {
            Some(entry) if Instant::now() < entry.expires_at => {
                return Some(entry.plaintext.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.remove(&kind);
        }
        None
    }

    /// Insert a decrypted secret, evicting the least-recently-created
    /// entry if the cache is full. Returns the evicted kind, if any.
    pub fn insert(&self, kind: SecretKind, plaintext: Zeroizing<Vec<u8>>) -> Option<SecretKind> {
        self.purge_expired();

        let mut evicted = None;
        if !self.inner.contains_key(&kind) && self.inner.len() >= self.max_entries {
            if let Some(oldest) = self
                .inner
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| *e.key())
            {
                self.inner.remove(&oldest);
                tracing::debug!(kind = %oldest, "evicted cached secret at capacity");
                evicted = Some(oldest);
            }
        }

        let now = Instant::now();
        self.inner.insert(
            kind,
            CachedSecret {
                plaintext,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
        evicted
    }

    /// Drop a specific entry (e.g., after rotation).
    pub fn invalidate(&self, kind: SecretKind) {
        self.inner.remove(&kind);
    }

    /// Remove every expired entry, returning the kinds dropped.
    pub fn purge_expired(&self) -> Vec<SecretKind> {
        let now = Instant::now();
        let expired: Vec<SecretKind> = self
            .inner
            .iter()
            .filter(|e| now >= e.value().expires_at)
            .map(|e| *e.key())
            .collect();
        for kind in &expired {
            self.inner.remove(kind);
        }
        expired
    }

    /// Number of live entries (including not-yet-purged expired ones).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(bytes: &[u8]) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(bytes.to_vec())
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = SecretCache::new(Duration::from_secs(60), 8);
        assert!(cache.get(SecretKind::MasterSeed).is_none());

        cache.insert(SecretKind::MasterSeed, secret(b"phrase"));
        let hit = cache.get(SecretKind::MasterSeed).unwrap();
        assert_eq!(&*hit, b"phrase");
    }

    #[test]
    fn test_expiry_checked_on_read() {
        let cache = SecretCache::new(Duration::from_millis(10), 8);
        cache.insert(SecretKind::MasterSeed, secret(b"phrase"));

        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get(SecretKind::MasterSeed).is_none());
        // The expired entry was removed on read, not just hidden.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_created() {
        let cache = SecretCache::new(Duration::from_secs(60), 2);
        cache.insert(SecretKind::MasterSeed, secret(b"a"));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(SecretKind::TreasuryKey, secret(b"b"));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(SecretKind::ApiCredential, secret(b"c"));

        // Oldest entry gone, newer two remain.
        assert!(cache.get(SecretKind::MasterSeed).is_none());
        assert!(cache.get(SecretKind::TreasuryKey).is_some());
        assert!(cache.get(SecretKind::ApiCredential).is_some());
    }

    #[test]
    fn test_purge_expired() {
        let cache = SecretCache::new(Duration::from_millis(10), 8);
        cache.insert(SecretKind::MasterSeed, secret(b"a"));
        cache.insert(SecretKind::TreasuryKey, secret(b"b"));

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.purge_expired().len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = SecretCache::new(Duration::from_secs(60), 8);
        cache.insert(SecretKind::TreasuryKey, secret(b"key"));
        cache.invalidate(SecretKind::TreasuryKey);
        assert!(cache.get(SecretKind::TreasuryKey).is_none());
    }
}
