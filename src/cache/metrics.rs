use crate::utils::sync::{AtomicU64, Ordering};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// The sub-caches of a [`ResolutionCache`](super::ResolutionCache).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    String,
    Type,
    MethodType,
    Method,
    Field,
    CallSite,
}

impl CacheKind {
    pub const ALL: [CacheKind; 6] = [
        CacheKind::String,
        CacheKind::Type,
        CacheKind::MethodType,
        CacheKind::Method,
        CacheKind::Field,
        CacheKind::CallSite,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CacheKind::String => "Strings",
            CacheKind::Type => "Types",
            CacheKind::MethodType => "Method Types",
            CacheKind::Method => "Methods",
            CacheKind::Field => "Fields",
            CacheKind::CallSite => "Call Sites",
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq)]
pub struct CacheStat {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries currently held.
    pub size: usize,
    /// Allocated slots.
    pub capacity: usize,
}

impl CacheStat {
    pub fn new(hits: u64, misses: u64, size: usize, capacity: usize) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
            size,
            capacity,
        }
    }

    /// Sum of two stats, with the hit rate recomputed.
    pub fn merge(self, other: Self) -> Self {
        Self::new(
            self.hits + other.hits,
            self.misses + other.misses,
            self.size + other.size,
            self.capacity + other.capacity,
        )
    }
}

impl Display for CacheStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {:>8}, misses: {:>8}, hit_rate: {:>6.2}%, size: {:>6}/{:<6}",
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.size,
            self.capacity
        )
    }
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub strings: CacheStat,
    pub types: CacheStat,
    pub method_types: CacheStat,
    pub methods: CacheStat,
    pub fields: CacheStat,
    pub call_sites: CacheStat,
}

impl CacheStats {
    pub fn get(&self, kind: CacheKind) -> CacheStat {
        match kind {
            CacheKind::String => self.strings,
            CacheKind::Type => self.types,
            CacheKind::MethodType => self.method_types,
            CacheKind::Method => self.methods,
            CacheKind::Field => self.fields,
            CacheKind::CallSite => self.call_sites,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            strings: self.strings.merge(other.strings),
            types: self.types.merge(other.types),
            method_types: self.method_types.merge(other.method_types),
            methods: self.methods.merge(other.methods),
            fields: self.fields.merge(other.fields),
            call_sites: self.call_sites.merge(other.call_sites),
        }
    }
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        for kind in CacheKind::ALL {
            let label = format!("{}:", kind.label());
            writeln!(f, "  {label:<15}{}", self.get(kind))?;
        }
        Ok(())
    }
}

/// Hit/miss counters, one pair per [`CacheKind`].
///
/// All counters use `Ordering::Relaxed`: they are independent and never used
/// to synchronize anything.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: [AtomicU64; 6],
    misses: [AtomicU64; 6],
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, kind: CacheKind, hit: bool) {
        let counters = if hit { &self.hits } else { &self.misses };
        counters[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a lookup and pass it through.
    #[inline]
    pub fn observe<R>(&self, kind: CacheKind, result: Option<R>) -> Option<R> {
        self.record(kind, result.is_some());
        result
    }

    pub fn stat(&self, kind: CacheKind, size: usize, capacity: usize) -> CacheStat {
        CacheStat::new(
            self.hits[kind as usize].load(Ordering::Relaxed),
            self.misses[kind as usize].load(Ordering::Relaxed),
            size,
            capacity,
        )
    }
}
