//! The (reference, index) pair stored in every direct-mapped cache slot.
//!
//! Both halves share one 64-bit word: the compressed reference in the low 32
//! bits, the logical index in the high 32 bits. Every read and write of a slot
//! is a single atomic operation on that word, so a reader can never observe a
//! reference from one install paired with the index from another.
use crate::{
    heap::GcRoot,
    utils::sync::{AtomicU64, Ordering},
};
use bytemuck::Zeroable;
use std::{
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
};

/// Index stored in an empty slot.
///
/// Zero-filled slots read as `{null, 0}`, which would falsely match logical
/// index 0 in slot 0, so slot 0 alone is initialized to `{null, 1}`. Index 1
/// never maps to slot 0 in a cache with at least two slots.
#[inline]
pub const fn invalid_index_for_slot(slot: usize) -> u32 {
    if slot == 0 {
        1
    } else {
        0
    }
}

/// A decoded snapshot of one slot.
pub struct CachePair<T> {
    pub object: GcRoot<T>,
    pub index: u32,
}

impl<T> CachePair<T> {
    pub const fn new(object: GcRoot<T>, index: u32) -> Self {
        Self { object, index }
    }

    pub const fn empty_for_slot(slot: usize) -> Self {
        Self::new(GcRoot::null(), invalid_index_for_slot(slot))
    }

    #[inline]
    fn to_bits(self) -> u64 {
        u64::from(self.object.to_bits()) | (u64::from(self.index) << 32)
    }

    #[inline]
    fn from_bits(bits: u64) -> Self {
        Self::new(GcRoot::from_bits(bits as u32), (bits >> 32) as u32)
    }

    /// The stored object if this pair belongs to `index`.
    #[inline]
    pub fn object_for_index(&self, index: u32) -> Option<GcRoot<T>> {
        if self.index != index {
            return None;
        }
        debug_assert!(
            !self.object.is_null(),
            "index {index} matched a slot holding a null reference"
        );
        Some(self.object)
    }
}

impl<T> Clone for CachePair<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CachePair<T> {}

impl<T> PartialEq for CachePair<T> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object && self.index == other.index
    }
}

impl<T> Eq for CachePair<T> {}

impl<T> Debug for CachePair<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePair")
            .field("object", &self.object)
            .field("index", &self.index)
            .finish()
    }
}

/// One atomically updated slot of a [`FixedCache`](super::FixedCache).
#[repr(transparent)]
pub struct SlotPair<T> {
    bits: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

// SAFETY: a zeroed `SlotPair` is a zeroed `AtomicU64`.
unsafe impl<T> Zeroable for SlotPair<T> {}

impl<T> SlotPair<T> {
    #[inline]
    pub fn load(&self) -> CachePair<T> {
        CachePair::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn try_get_for_index(&self, index: u32) -> Option<GcRoot<T>> {
        self.load().object_for_index(index)
    }

    /// Overwrite the slot with `{object, index}`; the last writer wins.
    #[inline]
    pub fn install(&self, index: u32, object: GcRoot<T>) {
        assert!(!object.is_null(), "cannot install a null reference for index {index}");
        self.bits
            .store(CachePair::new(object, index).to_bits(), Ordering::Release);
    }

    /// Empty the slot if it currently holds `index`, whatever the object.
    ///
    /// `slot` is this slot's position in its cache, which picks the empty
    /// sentinel to write back. Returns whether the slot was cleared.
    pub fn clear(&self, slot: usize, index: u32) -> bool {
        let cleared = CachePair::<T>::empty_for_slot(slot).to_bits();
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if CachePair::<T>::from_bits(current).index != index {
                return false;
            }
            match self.bits.compare_exchange_weak(
                current,
                cleared,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Write the slot-zero sentinel. Only valid on slot 0 of a fresh cache.
    pub fn initialize_slot_zero(&self) {
        self.bits
            .store(CachePair::<T>::empty_for_slot(0).to_bits(), Ordering::Relaxed);
    }

    /// Unconditional store, for image copies.
    pub(crate) fn store(&self, pair: CachePair<T>) {
        self.bits.store(pair.to_bits(), Ordering::Release);
    }

    /// Replace `current` with `new` unless another thread got there first.
    pub(crate) fn compare_and_set(&self, current: CachePair<T>, new: CachePair<T>) -> bool {
        self.bits
            .compare_exchange(
                current.to_bits(),
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl<T> Debug for SlotPair<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.load(), f)
    }
}
