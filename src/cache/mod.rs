//! In-memory authorization and topology cache.
//!
//! [`MemoryCache`] is the generic TTL store, [`RoutingCache`] the routing index
//! built on it, and [`CacheUpdateHandler`] the single writer path that applies
//! replicated commands.

mod memory;
mod routing;
pub mod types;
mod update;

pub use memory::{MemoryCache, MemoryCacheOptions};
pub use routing::{RoutingCache, RoutingCacheCounts, RoutingCacheOptions};
pub use types::{
    CacheEntryOptions, CacheError, Clock, EntryState, ManualClock, SweepStats, SystemClock,
};
pub use update::{CacheUpdateHandler, CommandStats, ReloadSummary, UpdateError};
