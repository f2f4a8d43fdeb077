//! Lazy algorithm loading with a bounded LRU instance cache.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use tracing::{debug, info, warn};

use crate::algorithm::{AlgorithmFactory, AlgorithmInstance};
use crate::error::{AlgorithmError, OrchestratorError, Result};
use crate::types::{AlgorithmMetadata, AlgorithmStats};

/// Default number of live instances kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

struct LoaderState {
    factories: HashMap<String, AlgorithmFactory>,
    metadata: HashMap<String, AlgorithmMetadata>,
    /// Live instances in recency order; never holds unregistered ids.
    cache: LruCache<String, AlgorithmInstance>,
}

/// Registry of algorithm factories plus the cache of loaded instances.
///
/// Every operation runs inside one critical section, so lookup, eviction,
/// instantiation and insert are atomic with respect to other loads.
pub struct AlgorithmLoader {
    state: Mutex<LoaderState>,
    capacity: NonZeroUsize,
}

impl AlgorithmLoader {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(OrchestratorError::InvalidCapacity(capacity))?;
        Ok(Self::with_capacity(capacity))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(LoaderState {
                factories: HashMap::new(),
                metadata: HashMap::new(),
                cache: LruCache::new(capacity),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        // A panicking factory must not take the registry down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register (or re-register) an algorithm. Does not instantiate it.
    pub fn register(&self, id: &str, factory: AlgorithmFactory, metadata: AlgorithmMetadata) {
        let mut state = self.lock();
        state.factories.insert(id.to_string(), factory);
        state.metadata.insert(id.to_string(), metadata);
        if state.cache.pop(id).is_some() {
            debug!(algorithm_id = %id, "dropped cached instance of re-registered algorithm");
        }
        info!(algorithm_id = %id, "registered algorithm");
    }

    /// Return the cached instance for `id`, instantiating it on first use.
    pub fn load(&self, id: &str) -> Result<AlgorithmInstance> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(instance) = state.cache.get(id) {
            let instance = instance.clone();
            if let Some(meta) = state.metadata.get_mut(id) {
                meta.touch();
            }
            return Ok(instance);
        }

        let factory = state
            .factories
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotRegistered(id.to_string()))?;

        if state.cache.len() >= self.capacity.get() {
            if let Some((evicted, _)) = state.cache.pop_lru() {
                info!(algorithm_id = %evicted, "evicted algorithm from cache");
            }
        }

        // A panicking factory is a failed load; the lock stays unpoisoned.
        let built = panic::catch_unwind(AssertUnwindSafe(|| factory()))
            .unwrap_or_else(|payload| Err(AlgorithmError::from_panic(payload)));
        let instance = built.map_err(|source| {
            warn!(algorithm_id = %id, error = %source, "failed to load algorithm");
            OrchestratorError::LoadFailure {
                id: id.to_string(),
                source,
            }
        })?;

        state.cache.put(id.to_string(), instance.clone());
        if let Some(meta) = state.metadata.get_mut(id) {
            meta.touch();
        }
        info!(algorithm_id = %id, "loaded algorithm");
        Ok(instance)
    }

    /// Copy rolling performance stats into the algorithm's metadata.
    pub fn record_performance(&self, id: &str, stats: &AlgorithmStats) {
        if let Some(meta) = self.lock().metadata.get_mut(id) {
            meta.execution_time_avg = stats.average_execution_time.as_secs_f64();
            meta.success_rate = stats.success_rate;
        }
    }

    pub fn metadata(&self, id: &str) -> Option<AlgorithmMetadata> {
        self.lock().metadata.get(id).cloned()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.lock().factories.contains_key(id)
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.lock().cache.contains(id)
    }

    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Cached ids, most recently used first.
    pub fn cached_ids(&self) -> Vec<String> {
        self.lock().cache.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for AlgorithmLoader {
    fn default() -> Self {
        Self::with_capacity(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap())
    }
}
