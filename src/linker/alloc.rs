use crate::{
    members::{FieldDescription, MethodDescription},
    utils::sync::Mutex,
};
use std::{
    fmt::{self, Debug, Formatter},
    ptr::NonNull,
};

/// Append-only arena whose allocations live as long as the arena.
struct Arena<T> {
    items: Mutex<Vec<NonNull<T>>>,
}

// SAFETY: the arena owns its items and only hands out shared references.
unsafe impl<T: Send + Sync> Send for Arena<T> {}
unsafe impl<T: Send + Sync> Sync for Arena<T> {}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn alloc(&self, value: T) -> &T {
        let item = NonNull::from(Box::leak(Box::new(value)));
        self.items.lock().push(item);
        // SAFETY: the box is freed only when the arena is dropped, which the
        // returned borrow of `self` outlives.
        unsafe { item.as_ref() }
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        for item in self.items.get_mut().drain(..) {
            // SAFETY: every item came from `Box::leak` in `alloc` and is freed once.
            drop(unsafe { Box::from_raw(item.as_ptr()) });
        }
    }
}

/// Allocator for native method and field records.
///
/// Everything allocated here stays put until the allocator is dropped, so the
/// caches can hold plain `&'a` references into it.
pub struct LinearAlloc {
    methods: Arena<MethodDescription>,
    fields: Arena<FieldDescription>,
}

impl Default for LinearAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for LinearAlloc {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearAlloc")
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl LinearAlloc {
    pub fn new() -> Self {
        Self {
            methods: Arena::new(),
            fields: Arena::new(),
        }
    }

    pub fn alloc_method(&self, method: MethodDescription) -> &MethodDescription {
        self.methods.alloc(method)
    }

    pub fn alloc_field(&self, field: FieldDescription) -> &FieldDescription {
        self.fields.alloc(field)
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }
}
