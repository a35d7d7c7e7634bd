//! A small managed heap with compressed references.
//!
//! Objects live in a table indexed by [`ObjectRef`]. The heap supports two
//! collections, both driven entirely by roots (objects have no outgoing
//! references, see [`mirror`]):
//!
//! - [`Heap::collect`]: non-moving mark-sweep.
//! - [`Heap::compact`]: copies every survivor to a fresh location and asks the
//!   root holders to rewrite their references through a second root pass.
//!
//! Both take the table's write lock for their whole duration, which is the
//! stop-the-world boundary for allocation and decoding. Callers must still make
//! sure no mutator holds an `ObjectRef` it read from a root before a
//! compaction and decodes it afterwards.
use crate::utils::sync::{Arc, RwLock};
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    ops::Deref,
};
use tracing::debug;

pub mod mirror;
pub mod root;

pub use mirror::{
    ManagedObject, Mirror, MirrorCallSite, MirrorClass, MirrorMethodType, MirrorString, Object,
};
pub use root::{GcRoot, ObjectRef, RootInfo, RootKind, RootVisitor};

#[derive(Default)]
struct ObjectTable {
    slots: Vec<Option<Arc<Object>>>,
    free: Vec<usize>,
}

impl ObjectTable {
    fn insert(&mut self, object: Arc<Object>) -> ObjectRef {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(object);
                ObjectRef::from_slot(slot)
            }
            None => self.push(object),
        }
    }

    fn push(&mut self, object: Arc<Object>) -> ObjectRef {
        self.slots.push(Some(object));
        ObjectRef::from_slot(self.slots.len() - 1)
    }

    fn get(&self, reference: ObjectRef) -> Option<&Arc<Object>> {
        self.slots.get(reference.slot())?.as_ref()
    }

    fn live(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| ObjectRef::from_slot(i))
    }

    fn free(&mut self, reference: ObjectRef) -> Option<Arc<Object>> {
        let freed = self.slots.get_mut(reference.slot())?.take();
        if freed.is_some() {
            self.free.push(reference.slot());
        }
        freed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub marked: usize,
    pub freed: usize,
    pub freed_bytes: usize,
    pub moved: usize,
}

pub struct Heap {
    table: RwLock<ObjectTable>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Heap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live_objects", &self.live_objects())
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(ObjectTable::default()),
        }
    }

    pub fn alloc(&self, object: impl Into<Object>) -> ObjectRef {
        self.table.write().insert(Arc::new(object.into()))
    }

    pub fn alloc_root<T: Mirror>(&self, object: T) -> GcRoot<T> {
        GcRoot::new(self.alloc(object))
    }

    pub fn get(&self, reference: ObjectRef) -> Option<Arc<Object>> {
        self.table.read().get(reference).cloned()
    }

    /// Resolve `reference` as a `T`, failing if it is dead or of another kind.
    pub fn decode<T: Mirror>(&self, reference: ObjectRef) -> Option<Handle<T>> {
        let object = self.get(reference)?;
        T::from_object(&object)?;
        Some(Handle {
            object,
            reference,
            _marker: PhantomData,
        })
    }

    pub fn live_objects(&self) -> usize {
        self.table.read().live().count()
    }

    /// Non-moving mark-sweep. `roots` is called once with a marking visitor.
    pub fn collect(&self, mut roots: impl FnMut(&mut dyn RootVisitor)) -> CollectionStats {
        let mut table = self.table.write();
        let marked = mark(&mut roots);

        let mut stats = CollectionStats {
            marked: marked.len(),
            ..Default::default()
        };
        let dead: Vec<_> = table.live().filter(|r| !marked.contains(r)).collect();
        for reference in dead {
            if let Some(object) = table.free(reference) {
                stats.freed += 1;
                stats.freed_bytes += object.size_of();
            }
        }
        debug!(
            marked = stats.marked,
            freed = stats.freed,
            "mark-sweep collection finished"
        );
        stats
    }

    /// Moving collection. `roots` is called twice: once to mark, once more so
    /// every root holder can store the forwarded reference.
    pub fn compact(&self, mut roots: impl FnMut(&mut dyn RootVisitor)) -> CollectionStats {
        let mut table = self.table.write();
        let marked = mark(&mut roots);

        let mut stats = CollectionStats {
            marked: marked.len(),
            ..Default::default()
        };
        let mut survivors: Vec<_> = marked.into_iter().collect();
        survivors.sort();

        let mut forwarding = HashMap::with_capacity(survivors.len());
        for old in survivors {
            let Some(object) = table.get(old).cloned() else {
                continue;
            };
            let new = table.push(object);
            forwarding.insert(old, new);
            stats.moved += 1;
        }

        let destinations: HashSet<_> = forwarding.values().copied().collect();
        let stale: Vec<_> = table.live().filter(|r| !destinations.contains(r)).collect();
        for reference in stale {
            if let Some(object) = table.free(reference) {
                if !forwarding.contains_key(&reference) {
                    stats.freed += 1;
                    stats.freed_bytes += object.size_of();
                }
            }
        }

        let mut forward = |root: &mut ObjectRef, _: RootInfo| {
            if let Some(&new) = forwarding.get(root) {
                *root = new;
            }
        };
        roots(&mut forward);

        debug!(
            moved = stats.moved,
            freed = stats.freed,
            "compacting collection finished"
        );
        stats
    }
}

fn mark(roots: &mut impl FnMut(&mut dyn RootVisitor)) -> HashSet<ObjectRef> {
    let mut marked = HashSet::new();
    let mut marker = |root: &mut ObjectRef, _: RootInfo| {
        marked.insert(*root);
    };
    roots(&mut marker);
    marked
}

/// A decoded, typed reference to a live object.
///
/// Holding a handle keeps the object's storage alive but not its
/// [`ObjectRef`]: after a compaction the handle still derefs to the same
/// object, while [`Handle::reference`] names the old location.
pub struct Handle<T: Mirror> {
    object: Arc<Object>,
    reference: ObjectRef,
    _marker: PhantomData<T>,
}

impl<T: Mirror> Handle<T> {
    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    pub fn root(&self) -> GcRoot<T> {
        GcRoot::new(self.reference)
    }

    /// Identity comparison; two handles to equal but distinct objects differ.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl<T: Mirror> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        T::from_object(&self.object)
            .unwrap_or_else(|| unreachable!("handle kind is checked when it is decoded"))
    }
}

impl<T: Mirror> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            reference: self.reference,
            _marker: PhantomData,
        }
    }
}

impl<T: Mirror + Debug> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle")
            .field(&self.reference)
            .field(&**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_decode() {
        let heap = Heap::new();
        let root = heap.alloc_root(MirrorString::new("abc"));
        let handle = root.read(&heap).unwrap();
        assert_eq!(handle.as_str(), "abc");
        assert_eq!(handle.root(), root);
        assert!(heap.decode::<MirrorClass>(handle.reference()).is_none());
    }

    #[test]
    fn test_collect_frees_unrooted_objects() {
        let heap = Heap::new();
        let kept = heap.alloc(MirrorString::new("kept"));
        let dropped = heap.alloc(MirrorString::new("dropped"));

        let stats = heap.collect(|visitor| {
            let mut root = kept;
            visitor.visit_root(&mut root, RootInfo::new(RootKind::String, 0));
        });

        assert_eq!(stats.marked, 1);
        assert_eq!(stats.freed, 1);
        assert!(heap.get(kept).is_some());
        assert!(heap.get(dropped).is_none());
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let heap = Heap::new();
        let first = heap.alloc(MirrorString::new("a"));
        heap.collect(|_| {});
        let second = heap.alloc(MirrorString::new("b"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_compact_moves_and_forwards_roots() {
        let heap = Heap::new();
        heap.alloc(MirrorString::new("garbage"));
        let mut root = heap.alloc(MirrorString::new("survivor"));
        let before = root;

        let stats = heap.compact(|visitor| {
            visitor.visit_root(&mut root, RootInfo::new(RootKind::String, 0));
        });

        assert_eq!(stats.moved, 1);
        assert_eq!(stats.freed, 1);
        assert_ne!(root, before);
        assert!(heap.get(before).is_none());
        let handle = heap.decode::<MirrorString>(root).unwrap();
        assert_eq!(handle.as_str(), "survivor");
        assert_eq!(heap.live_objects(), 1);
    }
}
