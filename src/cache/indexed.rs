//! Exact-size caches: one entry per logical index, no aliasing, no eviction.
use super::raw::ZeroedArray;
use crate::{
    heap::{GcRoot, ObjectRef, RootInfo, RootKind, RootVisitor},
    utils::sync::{AtomicPtr, AtomicU32, Ordering},
};
use bytemuck::Zeroable;
use std::{
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    ptr,
};
use tracing::warn;

/// Array of native handles borrowed from the linear allocator for `'a`.
///
/// Entries are published with a single pointer-width store and never
/// evicted. Writers are serialized by the class linker; readers need no lock.
#[repr(C)]
pub struct IndexedArrayCache<'a, T> {
    pub(super) entries: ZeroedArray<AtomicPtr<T>>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> IndexedArrayCache<'a, T> {
    pub fn new(declared_count: u32) -> Self {
        Self {
            entries: ZeroedArray::new(declared_count),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    #[inline]
    fn entry(&self, index: u32) -> &AtomicPtr<T> {
        let entries = self.entries.as_slice();
        assert!(
            (index as usize) < entries.len(),
            "index {index} out of bounds for {} entries",
            entries.len()
        );
        &entries[index as usize]
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&'a T> {
        let raw = self.entry(index).load(Ordering::Acquire);
        // SAFETY: only `&'a T` are ever stored, so a non-null entry is valid for 'a.
        unsafe { raw.cast_const().as_ref() }
    }

    #[inline]
    pub fn set(&self, index: u32, value: &'a T) {
        self.entry(index)
            .store(ptr::from_ref(value).cast_mut(), Ordering::Release);
    }

    /// Store `value` into every empty entry, returning how many were filled.
    pub fn fill_null_with(&self, value: &'a T) -> usize {
        let value = ptr::from_ref(value).cast_mut();
        let mut filled = 0;
        for entry in self.entries.as_slice() {
            if entry.load(Ordering::Relaxed).is_null() {
                entry.store(value, Ordering::Release);
                filled += 1;
            }
        }
        filled
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&'a T>> + '_ {
        (0..self.entries.len() as u32).map(|i| self.get(i))
    }

    /// Number of non-empty entries.
    pub fn occupancy(&self) -> usize {
        self.iter().flatten().count()
    }
}

impl<T> Debug for IndexedArrayCache<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedArrayCache")
            .field("len", &self.len())
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

/// A GC root that can be read, bound and relocated through a shared reference.
#[repr(transparent)]
pub struct AtomicGcRoot<T> {
    bits: AtomicU32,
    _marker: PhantomData<fn() -> T>,
}

// SAFETY: a zeroed `AtomicGcRoot` is a zeroed `AtomicU32`, the null root.
unsafe impl<T> Zeroable for AtomicGcRoot<T> {}

impl<T> AtomicGcRoot<T> {
    pub fn new(root: GcRoot<T>) -> Self {
        Self {
            bits: AtomicU32::new(root.to_bits()),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn load(&self) -> GcRoot<T> {
        GcRoot::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, root: GcRoot<T>) {
        self.bits.store(root.to_bits(), Ordering::Release);
    }

    /// Install `candidate` if the root is still null; returns the root that
    /// ended up stored.
    pub fn bind_once(&self, candidate: GcRoot<T>) -> GcRoot<T> {
        match self.bits.compare_exchange(
            0,
            candidate.to_bits(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => candidate,
            Err(existing) => GcRoot::from_bits(existing),
        }
    }

    /// Visit the root and store back a moved reference unless the root changed
    /// while it was being visited.
    pub fn visit(&self, visitor: &mut dyn RootVisitor, info: RootInfo) {
        let before = self.load();
        let mut after = before;
        after.visit_if_non_null(visitor, info);
        if after == before {
            return;
        }
        if self
            .bits
            .compare_exchange(
                before.to_bits(),
                after.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(?info, "root changed during root visit; keeping the newer value");
        }
    }
}

impl<T> Debug for AtomicGcRoot<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.load(), f)
    }
}

/// Array of GC roots where each entry is bound at most once.
#[repr(C)]
pub struct GcRootArray<T> {
    pub(super) entries: ZeroedArray<AtomicGcRoot<T>>,
}

impl<T> GcRootArray<T> {
    pub fn new(declared_count: u32) -> Self {
        Self {
            entries: ZeroedArray::new(declared_count),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    #[inline]
    fn entry(&self, index: u32) -> &AtomicGcRoot<T> {
        let entries = self.entries.as_slice();
        assert!(
            (index as usize) < entries.len(),
            "index {index} out of bounds for {} entries",
            entries.len()
        );
        &entries[index as usize]
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<GcRoot<T>> {
        Some(self.entry(index).load()).filter(|root| !root.is_null())
    }

    /// Bind entry `index` to `candidate` unless another thread bound it first.
    /// Every caller gets back the same winner.
    pub fn bind_once(&self, index: u32, candidate: GcRoot<T>) -> GcRoot<T> {
        assert!(!candidate.is_null(), "cannot bind a null reference at index {index}");
        self.entry(index).bind_once(candidate)
    }

    pub fn occupancy(&self) -> usize {
        self.entries
            .as_slice()
            .iter()
            .filter(|e| !e.load().is_null())
            .count()
    }

    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor, kind: RootKind) {
        for (index, entry) in self.entries.as_slice().iter().enumerate() {
            entry.visit(visitor, RootInfo::new(kind, index as u32));
        }
    }

    /// Copy every entry into `dest`, relocating non-null references.
    pub fn fixup_into(&self, dest: &Self, mut relocate: impl FnMut(ObjectRef) -> ObjectRef) {
        assert_eq!(
            self.len(),
            dest.len(),
            "fixup destination has a different number of entries"
        );
        for (source, target) in self.entries.as_slice().iter().zip(dest.entries.as_slice()) {
            let root = match source.load().reference() {
                Some(reference) => GcRoot::new(relocate(reference)),
                None => GcRoot::null(),
            };
            target.store(root);
        }
    }
}

impl<T> Debug for GcRootArray<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcRootArray")
            .field("len", &self.len())
            .field("occupancy", &self.occupancy())
            .finish()
    }
}
