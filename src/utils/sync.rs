//! Basic synchronization primitives.
//!
//! Every cache in this crate is shared between interpreter, compiler and
//! collector threads, so there is no single-threaded fallback here: locks come
//! from `parking_lot` and atomics from `std`. Low-level modules depend on this
//! instead of naming either crate directly.
pub use std::sync::{
    atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering},
    Arc,
};

pub use parking_lot::{Mutex, MutexGuard, RwLock};

thread_local! {
    /// Runtime thread ID assigned by [`register_current_thread`].
    static RUNTIME_THREAD_ID: std::cell::Cell<Option<u64>> = const { std::cell::Cell::new(None) };
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Assign the calling OS thread a runtime thread ID, if it has none yet.
pub fn register_current_thread() -> u64 {
    RUNTIME_THREAD_ID.with(|id| match id.get() {
        Some(existing) => existing,
        None => {
            let fresh = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            id.set(Some(fresh));
            fresh
        }
    })
}

/// Get the current thread's runtime ID, or 0 for threads that never registered.
pub fn get_current_thread_id() -> u64 {
    RUNTIME_THREAD_ID.with(|id| id.get().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_ids_are_distinct() {
        let here = register_current_thread();
        assert_eq!(register_current_thread(), here);
        assert_eq!(get_current_thread_id(), here);

        let there = std::thread::spawn(|| {
            assert_eq!(get_current_thread_id(), 0);
            register_current_thread()
        })
        .join()
        .unwrap();
        assert_ne!(here, there);
    }
}
