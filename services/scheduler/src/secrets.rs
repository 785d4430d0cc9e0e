//! Secret store interface and a TTL cache in front of it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

/// How long a fetched secret is reused before it is read again.
pub const DEFAULT_SECRET_TTL: Duration = Duration::from_secs(60);

/// Errors from the secret store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    /// The secret has not been created yet.
    #[error("secret does not exist: {name}")]
    NotFound { name: String },

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to named secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<String, SecretError>;
}

/// In-memory secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Number of reads served, hits and misses alike.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn read(&self, name: &str) -> Result<String, SecretError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-wide secret cache.
///
/// Owned by the scheduler loop and shared by every reconciliation pass.
/// The lock is never held across a store read.
#[derive(Debug)]
pub struct SecretCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_TTL)
    }
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `names`, reading through to `store` for missing or expired
    /// entries. Secrets that cannot be read are left out of the result.
    pub async fn resolve(
        &self,
        store: &dyn SecretStore,
        names: &BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();

        for name in names {
            if let Some(value) = self.lookup(name, Instant::now()) {
                resolved.insert(name.clone(), value);
                continue;
            }

            match store.read(name).await {
                Ok(value) => {
                    self.store(name, value.clone(), Instant::now());
                    resolved.insert(name.clone(), value);
                }
                Err(SecretError::NotFound { .. }) => {
                    debug!(secret = %name, "Secret not created yet");
                }
                Err(e) => {
                    warn!(secret = %name, error = %e, "Failed to read secret");
                }
            }
        }

        resolved
    }

    /// Cached value of `name` if it has not expired at `now`.
    pub fn lookup(&self, name: &str, now: Instant) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(name)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    fn store(&self, name: &str, value: String, now: Instant) {
        let entry = CacheEntry {
            value,
            expires_at: now + self.ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct UnavailableStore;

    #[async_trait]
    impl SecretStore for UnavailableStore {
        async fn read(&self, _name: &str) -> Result<String, SecretError> {
            Err(SecretError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_resolve_reads_through_and_caches() {
        let store = MemorySecretStore::new();
        store.set("db_password", "hunter2");
        let cache = SecretCache::default();

        let resolved = cache.resolve(&store, &names(&["db_password"])).await;
        assert_eq!(resolved.get("db_password").map(String::as_str), Some("hunter2"));

        // Served from the cache even after the store drops it.
        store.remove("db_password");
        let resolved = cache.resolve(&store, &names(&["db_password"])).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_is_skipped() {
        let store = MemorySecretStore::new();
        store.set("a", "1");
        let cache = SecretCache::default();

        let resolved = cache.resolve(&store, &names(&["a", "b"])).await;
        assert_eq!(resolved.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_not_fatal() {
        let cache = SecretCache::default();
        let resolved = cache.resolve(&UnavailableStore, &names(&["a"])).await;
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let cache = SecretCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.store("a", "1".into(), now);

        assert_eq!(cache.lookup("a", now + Duration::from_secs(59)), Some("1".into()));
        assert_eq!(cache.lookup("a", now + Duration::from_secs(60)), None);
        assert_eq!(cache.lookup("b", now), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let store = MemorySecretStore::new();
        store.set("a", "1");
        let cache = SecretCache::new(Duration::ZERO);

        cache.resolve(&store, &names(&["a"])).await;
        store.set("a", "2");
        let resolved = cache.resolve(&store, &names(&["a"])).await;

        assert_eq!(resolved.get("a").map(String::as_str), Some("2"));
        assert_eq!(store.read_count(), 2);
    }
}
