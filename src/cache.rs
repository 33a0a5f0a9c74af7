//! Per-vertex build memoization keyed by input fingerprint.
//!
//! A [`Fingerprint`] hashes a component type, its version, and the sanitized
//! resolved parameters, so two builds with identical inputs share one cache
//! entry. [`BuildCache::get_or_build`] guarantees at most one concurrent
//! underlying invocation per fingerprint: concurrent requesters all await a
//! single build and receive its output (single-flight).
//!
//! Entries carry an optional TTL. Expired entries are treated as misses and
//! evicted lazily on next lookup. Failed builds are never stored, so a later
//! request with the same fingerprint retries the component.
//!
//! The cache is an explicitly constructed object passed by context, with no
//! process-wide singleton; drop it and its entries go with it.

use crate::component::{BuildOutput, ComponentError, ResolvedParams};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Hash identifying one vertex build request for caching purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Canonical hash over component type, version, and resolved params.
    ///
    /// Parameter keys are hashed in sorted order and nested objects are
    /// walked structurally, so logically equal inputs always agree.
    #[must_use]
    pub fn compute(component_type: &str, version: &str, params: &ResolvedParams) -> Self {
        let mut hasher = FxHasher::default();
        component_type.hash(&mut hasher);
        version.hash(&mut hasher);

        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            key.hash(&mut hasher);
            if let Some(value) = params.get(key) {
                hash_value(value, &mut hasher);
            }
        }
        Self(hasher.finish())
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn hash_value(value: &Value, hasher: &mut FxHasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher);
            }
        }
        // serde_json object iteration is key-sorted, so this is canonical.
        Value::Object(entries) => {
            5u8.hash(hasher);
            entries.len().hash(hasher);
            for (key, item) in entries {
                key.hash(hasher);
                hash_value(item, hasher);
            }
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    output: Arc<BuildOutput>,
    stored_at: Instant,
}

/// One fingerprint's slot. The `OnceCell` is the single-flight gate: the
/// first requester initializes it, concurrent requesters await the same
/// initialization. Failed initializations leave the cell empty.
#[derive(Default)]
struct CacheSlot {
    cell: OnceCell<CachedEntry>,
}

/// Result of a cache lookup: the component output plus whether it was served
/// from a prior build.
#[derive(Clone, Debug)]
pub struct CacheOutcome {
    pub output: Arc<BuildOutput>,
    pub hit: bool,
}

/// Memoizes component build outputs by fingerprint.
pub struct BuildCache {
    ttl: Option<Duration>,
    slots: Mutex<FxHashMap<Fingerprint, Arc<CacheSlot>>>,
}

impl BuildCache {
    /// Cache whose entries never expire.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: None,
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Cache whose entries expire `ttl` after being stored.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    fn expired(&self, entry: &CachedEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }

    /// Fetch the slot for a fingerprint, evicting it first if it holds an
    /// expired entry. Runs under the map lock; never awaits.
    fn acquire_slot(&self, fingerprint: Fingerprint) -> Arc<CacheSlot> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&fingerprint)
            && let Some(entry) = slot.cell.get()
            && self.expired(entry)
        {
            slots.remove(&fingerprint);
        }
        Arc::clone(slots.entry(fingerprint).or_default())
    }

    /// Drop the map entry for `fingerprint` only if it still points at
    /// `slot`, so a concurrently re-created slot survives.
    fn evict_slot(&self, fingerprint: Fingerprint, slot: &Arc<CacheSlot>) {
        let mut slots = self.slots.lock();
        if slots
            .get(&fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&fingerprint);
        }
    }

    /// Return the cached output for `fingerprint`, or invoke `build_fn`
    /// exactly once and store its output.
    ///
    /// Errors from `build_fn` propagate to every waiter of this flight and
    /// leave no entry behind.
    pub async fn get_or_build<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        build_fn: F,
    ) -> Result<CacheOutcome, ComponentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BuildOutput, ComponentError>>,
    {
        let mut build_fn = Some(build_fn);
        loop {
            let slot = self.acquire_slot(fingerprint);
            let result = slot
                .cell
                .get_or_try_init(|| {
                    // Taking here marks this call as the flight's builder.
                    // `None` is impossible: a second invocation would require
                    // a prior one, and a prior one either erred (we returned)
                    // or initialized the cell (no further invocation).
                    let Some(f) = build_fn.take() else {
                        unreachable!("single-flight closure invoked twice");
                    };
                    async move {
                        let output = f().await?;
                        Ok::<_, ComponentError>(CachedEntry {
                            output: Arc::new(output),
                            stored_at: Instant::now(),
                        })
                    }
                })
                .await;

            match result {
                Ok(entry) => {
                    // A stale entry can slip in between acquire and init if
                    // it expired in that window; treat it as a miss. The
                    // retry only applies to waiters: the builder's own entry
                    // may already be expired under a zero TTL, and its fresh
                    // output is still returned to it.
                    if self.expired(entry) && build_fn.is_some() {
                        self.evict_slot(fingerprint, &slot);
                        continue;
                    }
                    return Ok(CacheOutcome {
                        output: Arc::clone(&entry.output),
                        hit: build_fn.is_some(),
                    });
                }
                Err(error) => {
                    self.evict_slot(fingerprint, &slot);
                    return Err(error);
                }
            }
        }
    }

    /// Peek without building. Expired entries read as absent.
    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Arc<BuildOutput>> {
        let slots = self.slots.lock();
        let entry = slots.get(&fingerprint)?.cell.get()?;
        if self.expired(entry) {
            return None;
        }
        Some(Arc::clone(&entry.output))
    }

    /// Number of completed, non-expired entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        slots
            .values()
            .filter_map(|slot| slot.cell.get())
            .filter(|entry| !self.expired(entry))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry immediately.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
