//! Entry bookkeeping and the clock abstraction shared by the memory cache.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle of a cache entry. Variants are ordered: a sweep only ever moves
/// an entry forward, and only a fresh insert puts it back at `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum EntryState {
    None,
    Expired,
    ScheduledForRemoval,
    Removed,
}

/// Per-insert overrides. `None` fields fall back to the cache defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheEntryOptions {
    pub timeout: Option<Duration>,
    pub size: Option<u64>,
}

impl CacheEntryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            size: None,
        }
    }

    pub fn with_size(size: u64) -> Self {
        Self {
            timeout: None,
            size: Some(size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// `None` never expires.
    pub timeout: Option<Duration>,
    pub created_at: Instant,
    pub last_seen: Instant,
    pub state: EntryState,
    pub size: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, timeout: Option<Duration>, size: u64, now: Instant) -> Self {
        Self {
            value,
            timeout,
            created_at: now,
            last_seen: now,
            state: EntryState::None,
            size,
        }
    }

    /// True once the entry has been idle for strictly longer than its timeout.
    pub fn is_idle_past_timeout(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.last_seen) > timeout,
            None => false,
        }
    }

    /// Move forward to `next`. Never moves backward.
    pub fn advance(&mut self, next: EntryState) {
        if next > self.state {
            self.state = next;
        }
    }

    pub fn is_removed(&self) -> bool {
        self.state == EntryState::Removed
    }

    /// Record a use at `now`. An entry on its way out returns to `None`;
    /// a removed entry stays removed.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
        if matches!(
            self.state,
            EntryState::Expired | EntryState::ScheduledForRemoval
        ) {
            self.state = EntryState::None;
        }
    }
}

/// Errors raised by cache lookups and inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    NotFound,
    KeyExists,
    CapacityExceeded { capacity: u64, requested: u64 },
    SizeRequired,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::NotFound => write!(f, "key not found"),
            CacheError::KeyExists => write!(f, "key already exists"),
            CacheError::CapacityExceeded {
                capacity,
                requested,
            } => write!(
                f,
                "cache capacity exceeded: {} requested, capacity {}",
                requested, capacity
            ),
            CacheError::SizeRequired => {
                write!(f, "entry size is required when a capacity is configured")
            }
        }
    }
}

impl std::error::Error for CacheError {}

/// Counts from one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepStats {
    pub expired: usize,
    pub scheduled: usize,
    pub removed: usize,
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + *offset
    }
}
