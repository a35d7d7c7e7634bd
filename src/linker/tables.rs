use crate::heap::{GcRoot, Heap, MirrorClass, MirrorString, ObjectRef, RootInfo, RootKind, RootVisitor};
use dashmap::DashMap;
use std::fmt::{self, Debug, Formatter};

/// Descriptor-to-class map; the first class inserted under a descriptor is
/// canonical.
#[derive(Default)]
pub struct ClassTable {
    classes: DashMap<Box<str>, ObjectRef>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, descriptor: &str) -> Option<GcRoot<MirrorClass>> {
        self.classes.get(descriptor).map(|c| GcRoot::new(*c))
    }

    /// Insert `class` unless the descriptor is taken, and return the class
    /// the table holds afterwards.
    pub fn insert_or_get(&self, descriptor: &str, class: GcRoot<MirrorClass>) -> GcRoot<MirrorClass> {
        let Some(reference) = class.reference() else {
            panic!("cannot insert a null class for {descriptor}");
        };
        GcRoot::new(*self.classes.entry(descriptor.into()).or_insert(reference))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor) {
        for (i, mut entry) in self.classes.iter_mut().enumerate() {
            visitor.visit_root(entry.value_mut(), RootInfo::new(RootKind::ClassTable, i as u32));
        }
    }
}

impl Debug for ClassTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassTable")
            .field("classes", &self.classes.len())
            .finish()
    }
}

/// Canonical string instances.
#[derive(Default)]
pub struct InternTable {
    strings: DashMap<Box<str>, ObjectRef>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, value: &str) -> Option<GcRoot<MirrorString>> {
        self.strings.get(value).map(|s| GcRoot::new(*s))
    }

    /// The canonical string for `value`, allocating it on first use. The flag
    /// is true when this call's allocation became canonical.
    pub fn intern(&self, heap: &Heap, value: &str) -> (GcRoot<MirrorString>, bool) {
        if let Some(existing) = self.lookup(value) {
            return (existing, false);
        }
        // never hold a shard lock while taking the heap lock
        let fresh = heap.alloc(MirrorString::new(value));
        let canonical = *self.strings.entry(value.into()).or_insert(fresh);
        (GcRoot::new(canonical), canonical == fresh)
    }

    pub fn remove(&self, value: &str) -> bool {
        self.strings.remove(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor) {
        for (i, mut entry) in self.strings.iter_mut().enumerate() {
            visitor.visit_root(entry.value_mut(), RootInfo::new(RootKind::InternTable, i as u32));
        }
    }
}

impl Debug for InternTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternTable")
            .field("strings", &self.strings.len())
            .finish()
    }
}
