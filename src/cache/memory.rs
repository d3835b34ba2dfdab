//! Generic TTL key/value store with sweep-based eviction.
//!
//! Lookups never check expiry. A periodic call to
//! [`MemoryCache::scan_for_expired_items`] walks every entry once and moves it
//! one step along `None -> Expired -> ScheduledForRemoval -> (dropped)`, so an
//! entry needs at least three sweeps after going idle before its slot is freed.
//! An entry seen again within its timeout drops back to `None`.
//! Readers holding a value they fetched mid-sweep are never invalidated.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::types::{
    CacheEntry, CacheEntryOptions, CacheError, Clock, EntryState, SweepStats, SystemClock,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCacheOptions {
    /// Applied to inserts that carry no timeout of their own. `None` never expires.
    pub default_timeout: Option<Duration>,
    /// Refresh `last_seen` on every successful lookup.
    pub sliding: bool,
    /// Upper bound on the summed entry sizes. When set, every insert must carry a size.
    pub capacity: Option<u64>,
    /// Number of slots allocated up front.
    pub presize: usize,
}

pub struct MemoryCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    options: MemoryCacheOptions,
    size: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(options: MemoryCacheOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: MemoryCacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::with_capacity(options.presize),
            options,
            size: AtomicU64::new(0),
            clock,
        }
    }

    pub fn options(&self) -> &MemoryCacheOptions {
        &self.options
    }

    fn entry_size(&self, opts: &CacheEntryOptions) -> Result<u64, CacheError> {
        match (self.options.capacity, opts.size) {
            (Some(_), None) | (Some(_), Some(0)) => Err(CacheError::SizeRequired),
            (_, size) => Ok(size.unwrap_or(0)),
        }
    }

    /// Swap `old` for `new` in the running total, refusing to cross capacity.
    fn reserve(&self, old: u64, new: u64) -> Result<(), CacheError> {
        let limit = self.options.capacity.unwrap_or(u64::MAX);
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.saturating_sub(old).saturating_add(new);
                (next <= limit).then_some(next)
            })
            .map(|_| ())
            .map_err(|current| CacheError::CapacityExceeded {
                capacity: limit,
                requested: current.saturating_sub(old).saturating_add(new),
            })
    }

    fn release(&self, size: u64) {
        if size == 0 {
            return;
        }
        let _ = self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            });
    }

    fn insert(
        &self,
        key: K,
        value: V,
        opts: CacheEntryOptions,
        overwrite: bool,
    ) -> Result<(), CacheError> {
        let size = self.entry_size(&opts)?;
        let timeout = opts.timeout.or(self.options.default_timeout);
        let now = self.clock.now();

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !overwrite && !current.is_removed() {
                    return Err(CacheError::KeyExists);
                }
                let old = if current.is_removed() { 0 } else { current.size };
                self.reserve(old, size)?;
                occupied.insert(CacheEntry::new(value, timeout, size, now));
            }
            Entry::Vacant(vacant) => {
                self.reserve(0, size)?;
                vacant.insert(CacheEntry::new(value, timeout, size, now));
            }
        }
        Ok(())
    }

    /// Insert or overwrite. The entry starts over at `EntryState::None`.
    pub fn add_or_update(&self, key: K, value: V) -> Result<(), CacheError> {
        self.insert(key, value, CacheEntryOptions::default(), true)
    }

    pub fn add_or_update_with(
        &self,
        key: K,
        value: V,
        opts: CacheEntryOptions,
    ) -> Result<(), CacheError> {
        self.insert(key, value, opts, true)
    }

    /// Insert only if the key is absent (or was removed).
    pub fn add(&self, key: K, value: V, opts: CacheEntryOptions) -> Result<(), CacheError> {
        self.insert(key, value, opts, false)
    }

    /// Bulk insert. Stops at the first failure; earlier items stay inserted.
    pub fn add_or_update_range<I>(&self, items: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (K, V, CacheEntryOptions)>,
    {
        let mut count = 0;
        for (key, value, opts) in items {
            self.insert(key, value, opts, true)?;
            count += 1;
        }
        Ok(count)
    }

    /// Look up a value. Fails when the key is absent or already removed.
    pub fn try_get<Q>(&self, key: &Q) -> Result<V, CacheError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.options.sliding {
            let mut entry = self.entries.get_mut(key).ok_or(CacheError::NotFound)?;
            if entry.is_removed() {
                return Err(CacheError::NotFound);
            }
            entry.touch(self.clock.now());
            Ok(entry.value.clone())
        } else {
            let entry = self.entries.get(key).ok_or(CacheError::NotFound)?;
            if entry.is_removed() {
                return Err(CacheError::NotFound);
            }
            Ok(entry.value.clone())
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .map(|entry| !entry.is_removed())
            .unwrap_or(false)
    }

    /// Current lifecycle state of a key, including removed entries awaiting a sweep.
    pub fn state<Q>(&self, key: &Q) -> Option<EntryState>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.state)
    }

    /// Mark an entry removed. Returns false if it was absent or already removed.
    pub fn try_remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_removed() => {
                entry.advance(EntryState::Removed);
                let size = entry.size;
                drop(entry);
                self.release(size);
                true
            }
            _ => false,
        }
    }

    /// Advance every entry one step through the expiry state machine.
    pub fn scan_for_expired_items(&self) -> SweepStats {
        let now = self.clock.now();
        let mut stats = SweepStats::default();
        let mut freed = 0u64;

        self.entries.retain(|_, entry| match entry.state {
            EntryState::None => {
                if entry.is_idle_past_timeout(now) {
                    entry.advance(EntryState::Expired);
                    stats.expired += 1;
                }
                true
            }
            // used again since the last sweep
            EntryState::Expired | EntryState::ScheduledForRemoval
                if !entry.is_idle_past_timeout(now) =>
            {
                entry.state = EntryState::None;
                true
            }
            EntryState::Expired => {
                entry.advance(EntryState::ScheduledForRemoval);
                stats.scheduled += 1;
                true
            }
            EntryState::ScheduledForRemoval => {
                freed += entry.size;
                stats.removed += 1;
                false
            }
            EntryState::Removed => {
                stats.removed += 1;
                false
            }
        });

        self.release(freed);
        if stats != SweepStats::default() {
            debug!(
                expired = stats.expired,
                scheduled = stats.scheduled,
                removed = stats.removed,
                "cache sweep"
            );
        }
        stats
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.size.store(0, Ordering::Release);
    }

    /// Number of entries that lookups can still see.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_removed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of all entries not yet removed.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }
}
