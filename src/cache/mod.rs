//! Bounded associative store with two eviction axes.
//!
//! [`AgedLruCache`] keys entries by [`Signature`] and evicts along two
//! axes: capacity (least-recently-used first) and wall-clock age
//! (entries whose insert is older than the configured idle limit).
//! Every eviction consults the cache's eviction directive to decide what
//! happens to the evictee: dropped, turned into an outbound request, or
//! (for age evictions only) turned into a request *and* re-inserted so
//! readers keep hitting while a refresh is in flight.
//!
//! Age is measured from insert or update, never from lookup. Lookups
//! only refresh recency, so a hot entry still ages out on schedule and
//! its buffered payload reaches the control plane at flush cadence.
//!
//! All mutating operations take a [`RemovedItems`] buffer; callers
//! deliver it to their flush callback after releasing the lock that
//! guards this cache (see [`removed`]).

pub(crate) mod removed;

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::signature::Signature;
use removed::RemovedItems;

/// What to do with an evicted entry.
pub(crate) enum Eviction<V, R> {
    /// Drop the entry.
    Discard,
    /// Turn the entry into an outbound request.
    Emit(R),
    /// Emit a request and put the entry back as most-recently-used with a
    /// fresh age. Honored only for age-based eviction; everywhere else
    /// the entry is dropped and only the request survives.
    Requeue(V, R),
}

/// The eviction directive for a cache: maps an evicted entry to its fate.
pub(crate) type EvictFn<V, R> = Box<dyn FnMut(&Signature, V) -> Eviction<V, R> + Send>;

struct Aged<V> {
    value: V,
    stored_at: Instant,
}

/// LRU cache with age-based eviction and per-entry eviction directives.
pub(crate) struct AgedLruCache<V, R> {
    entries: LruCache<Signature, Aged<V>>,
    max_idle: Option<Duration>,
    on_evict: EvictFn<V, R>,
}

impl<V, R> AgedLruCache<V, R> {
    pub(crate) fn new(capacity: NonZeroUsize, on_evict: EvictFn<V, R>) -> Self {
        Self {
            entries: LruCache::new(capacity),
            max_idle: None,
            on_evict,
        }
    }

    /// Entries older than `max_idle` are evicted by
    /// [`remove_expired_entries`](Self::remove_expired_entries).
    pub(crate) fn set_age_based_eviction(&mut self, max_idle: Duration) {
        self.max_idle = Some(max_idle);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fetch an entry and mark it most-recently-used.
    pub(crate) fn lookup(&mut self, key: &Signature) -> Option<&mut V> {
        self.entries.get_mut(key).map(|aged| &mut aged.value)
    }

    /// Insert an entry with a fresh age.
    ///
    /// A prior entry under the same key is evicted first, then capacity
    /// pressure evicts least-recently-used entries. Both go through the
    /// eviction directive.
    pub(crate) fn insert(&mut self, key: Signature, value: V, removed: &mut RemovedItems<R>) {
        if let Some(previous) = self.entries.pop(&key) {
            self.evict(key, previous.value, removed);
        }

        let aged = Aged {
            value,
            stored_at: Instant::now(),
        };
        if let Some((evicted_key, evicted)) = self.entries.push(key, aged) {
            // Same-key replacement was handled above, so this is always a
            // capacity eviction of the least-recently-used entry.
            self.evict(evicted_key, evicted.value, removed);
        }
    }

    /// Remove an entry through the eviction directive.
    pub(crate) fn remove(&mut self, key: &Signature, removed: &mut RemovedItems<R>) {
        if let Some(aged) = self.entries.pop(key) {
            self.evict(*key, aged.value, removed);
        }
    }

    /// Evict every entry whose age exceeds the idle limit, in
    /// least-recently-used order. `Requeue` directives are honored here:
    /// the entry returns as most-recently-used with a fresh age.
    pub(crate) fn remove_expired_entries(&mut self, removed: &mut RemovedItems<R>) {
        let Some(max_idle) = self.max_idle else {
            return;
        };
        let now = Instant::now();

        // Recency order no longer matches age order once lookups have
        // touched entries, so collect over a full scan. `iter` walks from
        // most to least recently used; reversing yields LRU order.
        let expired: Vec<Signature> = self
            .entries
            .iter()
            .filter(|(_, aged)| now.duration_since(aged.stored_at) >= max_idle)
            .map(|(key, _)| *key)
            .collect();

        for key in expired.into_iter().rev() {
            if let Some(aged) = self.entries.pop(&key) {
                match (self.on_evict)(&key, aged.value) {
                    Eviction::Discard => {}
                    Eviction::Emit(request) => removed.push(request),
                    Eviction::Requeue(value, request) => {
                        removed.push(request);
                        let aged = Aged {
                            value,
                            stored_at: Instant::now(),
                        };
                        // The pop above freed a slot, so this cannot
                        // trigger a capacity eviction.
                        self.entries.push(key, aged);
                    }
                }
            }
        }
    }

    /// Evict everything. `Requeue` degrades to `Emit` so the cache is
    /// guaranteed empty afterwards.
    pub(crate) fn remove_all(&mut self, removed: &mut RemovedItems<R>) {
        while let Some((key, aged)) = self.entries.pop_lru() {
            self.evict(key, aged.value, removed);
        }
    }

    fn evict(&mut self, key: Signature, value: V, removed: &mut RemovedItems<R>) {
        match (self.on_evict)(&key, value) {
            Eviction::Discard => {}
            Eviction::Emit(request) | Eviction::Requeue(_, request) => removed.push(request),
        }
    }
}
