use super::{
    pair::{CachePair, SlotPair},
    raw::ZeroedArray,
};
use crate::heap::{GcRoot, ObjectRef, RootInfo, RootKind, RootVisitor};
use std::fmt::{self, Debug, Formatter};
use tracing::{trace, warn};

/// A direct-mapped cache of [`SlotPair`]s with `C` slots.
///
/// Logical index `i` lives in slot `i & (C - 1)`; two indices that share a
/// slot evict each other and the last writer wins. The cache allocates
/// `min(C, declared_count)` slots, so small images pay only for what they can
/// index.
#[repr(C)]
pub struct FixedCache<T, const C: usize> {
    pub(super) slots: ZeroedArray<SlotPair<T>>,
}

impl<T, const C: usize> FixedCache<T, C> {
    const MASK: usize = {
        assert!(
            C.is_power_of_two() && C >= 2,
            "cache capacity must be a power of two of at least 2"
        );
        C - 1
    };

    pub const CAPACITY: usize = C;

    /// Allocate a cache for an image declaring `declared_count` entries.
    pub fn new(declared_count: u32) -> Self {
        let len = declared_count.min(Self::MASK as u32 + 1);
        let slots = ZeroedArray::<SlotPair<T>>::new(len);
        if let Some(first) = slots.as_slice().first() {
            first.initialize_slot_zero();
        }
        Self { slots }
    }

    #[inline]
    pub const fn slot_index(index: u32) -> usize {
        index as usize & Self::MASK
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == 0
    }

    #[inline]
    fn slot(&self, index: u32) -> (usize, &SlotPair<T>) {
        let slot = Self::slot_index(index);
        let slots = self.slots.as_slice();
        assert!(
            slot < slots.len(),
            "index {index} maps to slot {slot} of a cache with {} slots",
            slots.len()
        );
        (slot, &slots[slot])
    }

    #[inline]
    pub fn lookup(&self, index: u32) -> Option<GcRoot<T>> {
        self.slot(index).1.try_get_for_index(index)
    }

    #[inline]
    pub fn insert(&self, index: u32, object: GcRoot<T>) {
        self.slot(index).1.install(index, object);
    }

    /// Empty the slot for `index` if it still holds `index`.
    ///
    /// Only the index is compared: if another thread re-resolved the same
    /// index in the meantime, its entry is dropped too.
    pub fn clear_if_matching(&self, index: u32) -> bool {
        let (slot, pair) = self.slot(index);
        let cleared = pair.clear(slot, index);
        if cleared {
            trace!(index, slot, "cleared cache slot");
        }
        cleared
    }

    /// Number of slots currently holding an entry.
    pub fn occupancy(&self) -> usize {
        self.slots
            .as_slice()
            .iter()
            .filter(|slot| !slot.load().object.is_null())
            .count()
    }

    pub fn pairs(&self) -> impl Iterator<Item = CachePair<T>> + '_ {
        self.slots.as_slice().iter().map(SlotPair::load)
    }

    /// Present every non-null reference to `visitor`, storing back any
    /// reference the visitor moved.
    ///
    /// The store is a compare-and-swap against the pair that was read, so an
    /// entry installed concurrently with the visit is kept rather than
    /// overwritten with the relocated old one.
    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor, kind: RootKind) {
        for (slot, pair) in self.slots.as_slice().iter().enumerate() {
            let before = pair.load();
            let mut object = before.object;
            object.visit_if_non_null(visitor, RootInfo::new(kind, slot as u32));
            if object == before.object {
                continue;
            }
            if !pair.compare_and_set(before, CachePair::new(object, before.index)) {
                warn!(
                    ?kind,
                    slot,
                    index = before.index,
                    "slot changed during root visit; keeping the newer entry"
                );
            }
        }
    }

    /// Copy every pair into `dest`, relocating each non-null reference
    /// through `relocate`.
    pub fn fixup_into(&self, dest: &Self, mut relocate: impl FnMut(ObjectRef) -> ObjectRef) {
        assert_eq!(
            self.len(),
            dest.len(),
            "fixup destination has a different number of slots"
        );
        for (source, target) in self.slots.as_slice().iter().zip(dest.slots.as_slice()) {
            let pair = source.load();
            let object = match pair.object.reference() {
                Some(reference) => GcRoot::new(relocate(reference)),
                None => GcRoot::null(),
            };
            target.store(CachePair::new(object, pair.index));
        }
    }
}

impl<T, const C: usize> Debug for FixedCache<T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedCache")
            .field("capacity", &C)
            .field("len", &self.len())
            .field("occupancy", &self.occupancy())
            .finish()
    }
}
