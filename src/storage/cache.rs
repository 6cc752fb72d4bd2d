//! # Pin-Counted Resource Cache
//!
//! A small generic cache with reference-counted pinning, used twice in the
//! engine: the pager caches pages by page number, and the data manager
//! caches DataItem handles by UID (which in turn keeps their owning pages
//! pinned). The version manager layers a third instance over UIDs for MVCC
//! entries.
//!
//! ## Protocol
//!
//! 1. `get(key)` returns the cached value and increments its pin count,
//!    loading it through the [`CacheBacking`] on a miss.
//! 2. Callers must pair every `get` with a `release(key)`.
//! 3. When a pin count reaches zero the value is dropped from the cache and
//!    handed to `CacheBacking::evict` (which flushes dirty pages, releases
//!    nested pins, and so on).
//!
//! There is no background eviction and no recency tracking: a value lives
//! exactly as long as someone holds a pin on it. With a bounded capacity,
//! `get` of an absent key fails with `CacheFull` once the cache is at
//! capacity — the caller must release something and retry.
//!
//! ## Loading
//!
//! Loads happen *outside* the map lock. A key being loaded is marked in an
//! in-flight set; a second getter of the same key sleeps one millisecond and
//! retries, so a page is never read from disk twice concurrently.

use std::thread;
use std::time::Duration;

use eyre::{ensure, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::error::EngineError;

/// The two operations a cache needs from its owner: how to materialize a
/// value and what to do when the last pin goes away.
pub trait CacheBacking<K, V> {
    fn load(&self, key: K) -> Result<V>;
    fn evict(&self, key: K, value: V) -> Result<()>;
}

struct Slot<V> {
    value: V,
    pins: u32,
}

struct Inner<K, V> {
    resident: HashMap<K, Slot<V>>,
    loading: HashSet<K>,
}

pub struct PinCache<K, V, B> {
    inner: Mutex<Inner<K, V>>,
    backing: B,
    /// Maximum resident values; `0` means unbounded.
    capacity: usize,
}

impl<K, V, B> PinCache<K, V, B>
where
    K: Copy + Eq + std::hash::Hash,
    V: Clone,
    B: CacheBacking<K, V>,
{
    pub fn new(capacity: usize, backing: B) -> Self {
        Self {
            inner: Mutex::new(Inner {
                resident: HashMap::new(),
                loading: HashSet::new(),
            }),
            backing,
            capacity,
        }
    }

    /// Returns a pinned value, loading it on a miss.
    pub fn get(&self, key: K) -> Result<V> {
        loop {
            let mut inner = self.inner.lock();

            if inner.loading.contains(&key) {
                drop(inner);
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            if let Some(slot) = inner.resident.get_mut(&key) {
                slot.pins += 1;
                return Ok(slot.value.clone());
            }

            ensure!(
                self.capacity == 0
                    || inner.resident.len() + inner.loading.len() < self.capacity,
                EngineError::CacheFull
            );

            inner.loading.insert(key);
            drop(inner);

            let loaded = self.backing.load(key);

            let mut inner = self.inner.lock();
            inner.loading.remove(&key);
            let value = loaded?;
            inner.resident.insert(
                key,
                Slot {
                    value: value.clone(),
                    pins: 1,
                },
            );
            return Ok(value);
        }
    }

    /// Drops one pin; the last pin evicts the value through the backing.
    pub fn release(&self, key: K) -> Result<()> {
        let evicted = {
            let mut inner = self.inner.lock();
            let slot = inner
                .resident
                .get_mut(&key)
                .ok_or_else(|| eyre::eyre!("release of a key that is not resident"))?;
            debug_assert!(slot.pins > 0);
            slot.pins -= 1;
            if slot.pins == 0 {
                inner.resident.remove(&key).map(|slot| slot.value)
            } else {
                None
            }
        };

        match evicted {
            Some(value) => self.backing.evict(key, value),
            None => Ok(()),
        }
    }

    /// Evicts everything, pinned or not. Used on shutdown, when no caller
    /// may touch the cache again.
    pub fn close(&self) -> Result<()> {
        let drained: Vec<(K, V)> = {
            let mut inner = self.inner.lock();
            inner
                .resident
                .drain()
                .map(|(k, slot)| (k, slot.value))
                .collect()
        };
        for (key, value) in drained {
            self.backing.evict(key, value)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn resident_count(&self) -> usize {
        self.inner.lock().resident.len()
    }
}
