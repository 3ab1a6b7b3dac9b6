use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, warn};

use crate::error::{Result, ValidationError};

/// Cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of built artifacts kept in memory
    pub max_capacity: u64,
    /// How long a caller waits on an in-flight build before giving up
    pub build_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1000,
            build_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Counters for one cache instance
#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    builds: AtomicU64,
    failed_builds: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub lookups: u64,
    pub builds: u64,
    pub failed_builds: u64,
}

/// Concurrent cache of expensive artifacts with a single-flight build-on-miss
/// contract.
///
/// For a given key at most one `build` runs at a time; concurrent callers for
/// that key wait for it and all receive the same value. A failed build stores
/// nothing, so the next caller retries. Distinct keys build independently.
/// `moka` provides the coalescing ("thundering herd" protection).
pub struct KeyedBuildCache<K, V> {
    name: &'static str,
    cache: Cache<K, V>,
    build_timeout: Option<Duration>,
    counters: Arc<Counters>,
}

impl<K, V> KeyedBuildCache<K, V>
where
    K: Hash + Eq + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        let cache = Cache::builder().max_capacity(config.max_capacity).build();

        Self {
            name,
            cache,
            build_timeout: config.build_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the artifact for `key`, building it if missing.
    ///
    /// The `build` future is only polled if the key is missing and no other
    /// caller is already building it. Build failures are returned as
    /// [`ValidationError::Build`]; a wait longer than the configured build
    /// timeout returns [`ValidationError::Timeout`].
    ///
    /// The lookup runs on its own task, so a caller that stops waiting leaves
    /// the in-flight build running and later callers join it.
    pub async fn get<F, Fut, E>(&self, key: K, build: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Display + Send + Sync + 'static,
    {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.cache.get(&key).await {
            return Ok(value);
        }

        let counters = Arc::clone(&self.counters);
        let cache_name = self.name;
        let build_key = key.clone();
        let pending = build();
        let init = async move {
            counters.builds.fetch_add(1, Ordering::Relaxed);
            debug!(cache = cache_name, key = %build_key, "building artifact");
            let built = pending.await;
            if let Err(ref e) = built {
                counters.failed_builds.fetch_add(1, Ordering::Relaxed);
                warn!(cache = cache_name, key = %build_key, error = %e, "artifact build failed");
            }
            built
        };

        let cache = self.cache.clone();
        let lookup_key = key.clone();
        let lookup = tokio::spawn(async move {
            cache
                .try_get_with(lookup_key, init)
                .await
                .map_err(|e| e.to_string())
        });

        let joined = match self.build_timeout {
            Some(limit) => match tokio::time::timeout(limit, lookup).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(cache = cache_name, key = %key, "stopped waiting on in-flight build");
                    return Err(ValidationError::Timeout {
                        key: key.to_string(),
                        waited_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => lookup.await,
        };

        joined
            .map_err(|e| ValidationError::internal(format!("cache lookup task failed: {}", e)))?
            .map_err(|details| ValidationError::Build {
                key: key.to_string(),
                details,
            })
    }

    /// Get a cached artifact without building it.
    pub async fn get_if_present(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    pub async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    pub async fn stats(&self) -> CacheStats {
        // Flush pending maintenance so the entry count is exact
        self.cache.run_pending_tasks().await;

        CacheStats {
            entry_count: self.cache.entry_count(),
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
            failed_builds: self.counters.failed_builds.load(Ordering::Relaxed),
        }
    }
}
