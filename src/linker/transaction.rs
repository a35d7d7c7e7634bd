use super::ClassLinker;
use crate::{
    cache::ResolutionCache,
    utils::{sync::Mutex, StringIndex},
};
use std::sync::Arc;
use tracing::debug;

/// Undo log for strings resolved while a transaction is active.
///
/// Committing drops the log. Rolling back clears every cache entry the
/// transaction resolved and un-interns the strings it created.
#[derive(Default)]
pub struct Transaction<'a> {
    resolved_strings: Mutex<Vec<(Arc<ResolutionCache<'a>>, StringIndex)>>,
    interned_strings: Mutex<Vec<Box<str>>>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RollbackStats {
    pub cleared: usize,
    pub uninterned: usize,
}

impl<'a> Transaction<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_resolved_string(&self, cache: &Arc<ResolutionCache<'a>>, index: StringIndex) {
        self.resolved_strings.lock().push((cache.clone(), index));
    }

    pub(crate) fn record_interned_string(&self, value: &str) {
        self.interned_strings.lock().push(value.into());
    }

    pub fn num_resolved_strings(&self) -> usize {
        self.resolved_strings.lock().len()
    }

    pub fn commit(mut self) {
        debug!(
            resolved = self.resolved_strings.get_mut().len(),
            "committed transaction"
        );
    }

    pub fn rollback(mut self, linker: &ClassLinker<'a>) -> RollbackStats {
        let mut stats = RollbackStats::default();
        for (cache, index) in self.resolved_strings.get_mut().drain(..).rev() {
            if cache.clear_string(index) {
                stats.cleared += 1;
            }
        }
        for value in self.interned_strings.get_mut().drain(..) {
            if linker.intern_table().remove(&value) {
                stats.uninterned += 1;
            }
        }
        debug!(
            cleared = stats.cleared,
            uninterned = stats.uninterned,
            "rolled back transaction"
        );
        stats
    }
}
