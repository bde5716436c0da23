//! Single-flight result cache.
//!
//! Concurrent callers asking for the same key share one computation: the
//! first becomes the leader and runs it, the rest wait on a watch channel
//! and receive the same outcome. Successful results are stored and evicted
//! least-recently-used once the capacity is exceeded. Errors reach every
//! waiter but are never stored.

use ferry_core::{BridgeResult, CacheKey};
use indexmap::IndexMap;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Outcome<V> = Option<BridgeResult<V>>;

enum Slot<V> {
    Ready(V),
    Pending {
        generation: u64,
        outcome: watch::Receiver<Outcome<V>>,
        // Stored result being recomputed on bypass; restored if that fails.
        previous: Option<V>,
    },
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups answered without computing
    pub hits: u64,
    /// Computations started
    pub misses: u64,
    /// Stored results
    pub entries: usize,
    /// Capacity, 0 for unbounded
    pub capacity: usize,
}

/// Result cache keyed by [`CacheKey`]
pub struct ResultCache<V> {
    slots: Mutex<IndexMap<CacheKey, Slot<V>>>,
    capacity: usize,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache holding at most `capacity` results, 0 for unbounded
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(IndexMap::new()),
            capacity,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<CacheKey, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the stored result for `key` or compute it once
    ///
    /// With `bypass` the lookup is skipped and the fresh result replaces any
    /// stored one. If a leader is abandoned mid-computation, a waiter takes
    /// over with its own `compute`.
    ///
    /// # Errors
    ///
    /// Whatever `compute` (or the leader's computation) returns
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        bypass: bool,
        compute: F,
    ) -> BridgeResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BridgeResult<V>>,
    {
        let (generation, sender) = loop {
            let mut waiting = {
                let mut slots = self.lock();
                match slots.get_full(&key) {
                    Some((index, _, Slot::Ready(value))) if !bypass => {
                        let value = value.clone();
                        let last = slots.len() - 1;
                        slots.move_index(index, last);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Some((_, _, Slot::Pending { outcome, .. }))
                        if !bypass && outcome.has_changed().is_ok() =>
                    {
                        outcome.clone()
                    }
                    _ => {
                        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                        let (sender, outcome) = watch::channel(None);
                        let previous = match slots.shift_remove(&key) {
                            Some(Slot::Ready(value)) => Some(value),
                            Some(Slot::Pending { previous, .. }) => previous,
                            None => None,
                        };
                        slots.insert(
                            key,
                            Slot::Pending {
                                generation,
                                outcome,
                                previous,
                            },
                        );
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        break (generation, sender);
                    }
                }
            };

            let shared = match waiting.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            if let Some(result) = shared {
                if result.is_ok() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                return result;
            }
            tracing::debug!(key = %key, "cache leader abandoned computation, retrying");
        };

        let result = compute().await;

        {
            let mut slots = self.lock();
            let ours = matches!(
                slots.get(&key),
                Some(Slot::Pending { generation: g, .. }) if *g == generation
            );
            if ours {
                match &result {
                    Ok(value) => {
                        slots.insert(key, Slot::Ready(value.clone()));
                        self.evict(&mut slots);
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "not caching failed computation");
                        if let Some(Slot::Pending {
                            previous: Some(value),
                            ..
                        }) = slots.shift_remove(&key)
                        {
                            slots.insert(key, Slot::Ready(value));
                        }
                    }
                }
            }
        }
        sender.send_replace(Some(result.clone()));
        result
    }

    fn evict(&self, slots: &mut IndexMap<CacheKey, Slot<V>>) {
        if self.capacity == 0 {
            return;
        }
        while ready_count(slots) > self.capacity {
            let Some(oldest) = slots.iter().position(|(_, s)| matches!(s, Slot::Ready(_))) else {
                break;
            };
            if let Some((key, _)) = slots.shift_remove_index(oldest) {
                tracing::trace!(key = %key, "evicted cache entry");
            }
        }
    }

    /// Stored result for `key`, without computing
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        match self.lock().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop the stored result for `key`
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(key) {
            Some(Slot::Ready(_)) => {
                slots.shift_remove(key);
                true
            }
            Some(Slot::Pending { previous, .. }) => previous.take().is_some(),
            None => false,
        }
    }

    /// Drop every stored result
    pub fn clear(&self) {
        self.lock().retain(|_, slot| match slot {
            Slot::Ready(_) => false,
            Slot::Pending { previous, .. } => {
                *previous = None;
                true
            }
        });
    }

    /// Number of stored results
    #[must_use]
    pub fn len(&self) -> usize {
        ready_count(&self.lock())
    }

    /// Check if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}

fn ready_count<V>(slots: &IndexMap<CacheKey, Slot<V>>) -> usize {
    slots.values().filter(|s| matches!(s, Slot::Ready(_))).count()
}
