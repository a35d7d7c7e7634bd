//! Per-image caches of resolved constants.
//!
//! Each registered image gets one [`ResolutionCache`], which memoizes what the
//! image's indices resolve to: strings, types and method types in
//! direct-mapped [`FixedCache`]s, methods and fields in exact-size
//! [`IndexedArrayCache`]s, and call sites in a bind-once [`GcRootArray`].
//! Lookups are passive and lock-free; resolving a miss is the class linker's
//! job.

#[cfg(not(target_has_atomic = "64"))]
compile_error!("resolution caches need 64-bit atomics to update a slot pair in one store");

mod dex_cache;
mod fixed;
mod indexed;
pub mod layout;
pub mod metrics;
mod pair;
mod raw;

pub use dex_cache::{
    DexCacheOffsets, DexLock, DexLockGuard, MethodTypeCache, ResolutionCache, StringCache,
    TypeCache,
};
pub use fixed::FixedCache;
pub use indexed::{AtomicGcRoot, GcRootArray, IndexedArrayCache};
pub use layout::{ArrayCounts, DexCacheArraysLayout};
pub use metrics::{CacheCounters, CacheKind, CacheStat, CacheStats};
pub use pair::{invalid_index_for_slot, CachePair, SlotPair};

/// Slots in a string cache.
pub const STRING_CACHE_SIZE: usize = 1024;
/// Slots in a type cache.
pub const TYPE_CACHE_SIZE: usize = 1024;
/// Slots in a method type cache.
pub const METHOD_TYPE_CACHE_SIZE: usize = 1024;
