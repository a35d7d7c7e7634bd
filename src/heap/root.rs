//! Compressed references and the root-visiting protocol.
use super::{Handle, Heap, Mirror};
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    marker::PhantomData,
    num::NonZeroU32,
};

/// A compressed, untyped reference to an object in the managed [`Heap`].
///
/// The collector is free to move objects; after a moving collection the same
/// object is reachable through a different `ObjectRef`, which is why roots are
/// handed to collectors as `&mut ObjectRef`.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    pub(crate) fn from_slot(slot: usize) -> Self {
        let raw = u32::try_from(slot)
            .ok()
            .and_then(|slot| NonZeroU32::MIN.checked_add(slot))
            .expect("managed heap exceeded the compressed reference range");
        ObjectRef(raw)
    }

    pub(crate) fn slot(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn to_raw(self) -> u32 {
        self.0.get()
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(ObjectRef)
    }
}

impl Debug for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.0)
    }
}

/// A typed, nullable GC root.
///
/// This is the only way the caches hold managed objects. It never exposes an
/// address: reads go through [`GcRoot::read`], which resolves the reference
/// against the heap at the time of the read, so a root stays valid across a
/// moving collection as long as it was presented to the collector.
#[repr(transparent)]
pub struct GcRoot<T> {
    reference: Option<ObjectRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> GcRoot<T> {
    pub const fn null() -> Self {
        Self {
            reference: None,
            _marker: PhantomData,
        }
    }

    pub const fn new(reference: ObjectRef) -> Self {
        Self {
            reference: Some(reference),
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.reference.is_none()
    }

    pub fn reference(&self) -> Option<ObjectRef> {
        self.reference
    }

    /// The 32-bit encoding stored in cache slots; null is zero.
    pub(crate) fn to_bits(self) -> u32 {
        self.reference.map_or(0, ObjectRef::to_raw)
    }

    pub(crate) fn from_bits(bits: u32) -> Self {
        Self {
            reference: ObjectRef::from_raw(bits),
            _marker: PhantomData,
        }
    }

    /// Present this root to `visitor` unless it is null.
    pub fn visit_if_non_null(&mut self, visitor: &mut dyn RootVisitor, info: RootInfo) {
        if let Some(reference) = self.reference.as_mut() {
            visitor.visit_root(reference, info);
        }
    }
}

impl<T: Mirror> GcRoot<T> {
    /// Resolve this root against the heap.
    ///
    /// Returns `None` for a null root. A non-null root that no longer names a
    /// live object of type `T` also reads as `None`; that only happens when a
    /// root was hidden from the collector.
    pub fn read(&self, heap: &Heap) -> Option<Handle<T>> {
        heap.decode(self.reference?)
    }
}

impl<T> Clone for GcRoot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcRoot<T> {}

impl<T> PartialEq for GcRoot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl<T> Eq for GcRoot<T> {}

impl<T> Hash for GcRoot<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

impl<T> Default for GcRoot<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Debug for GcRoot<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.reference {
            Some(r) => write!(f, "GcRoot({:#x})", r.to_raw()),
            None => write!(f, "GcRoot(null)"),
        }
    }
}

/// Where a root lives, for collectors that care (debug dumps, heap verifiers).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootKind {
    DexCacheLocation,
    String,
    Type,
    MethodType,
    CallSite,
    ClassTable,
    InternTable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RootInfo {
    pub kind: RootKind,
    /// Slot or table position of the root; zero where there is none.
    pub index: u32,
}

impl RootInfo {
    pub const fn new(kind: RootKind, index: u32) -> Self {
        Self { kind, index }
    }
}

/// Callback interface through which a collector sees roots.
///
/// The visitor may overwrite `root` with the object's new location; holders of
/// roots are responsible for publishing the updated value.
pub trait RootVisitor {
    fn visit_root(&mut self, root: &mut ObjectRef, info: RootInfo);
}

impl<F> RootVisitor for F
where
    F: FnMut(&mut ObjectRef, RootInfo),
{
    fn visit_root(&mut self, root: &mut ObjectRef, info: RootInfo) {
        self(root, info)
    }
}
