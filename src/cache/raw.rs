use bytemuck::{allocation::zeroed_slice_box, Zeroable};
use std::{
    ptr::{self, NonNull},
    slice,
};

/// A fixed-length, zero-filled heap array laid out as a thin pointer followed
/// by a 32-bit length, so generated code can find both at stable offsets.
#[repr(C)]
pub(crate) struct ZeroedArray<A: Zeroable> {
    pub(super) ptr: NonNull<A>,
    pub(super) len: u32,
}

// SAFETY: the array owns its allocation and only hands out shared references
// to `A`, so it is as thread-safe as `A` itself.
unsafe impl<A: Zeroable + Send> Send for ZeroedArray<A> {}
unsafe impl<A: Zeroable + Sync> Sync for ZeroedArray<A> {}

impl<A: Zeroable> ZeroedArray<A> {
    pub fn new(len: u32) -> Self {
        let boxed: Box<[A]> = zeroed_slice_box(len as usize);
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(boxed).cast::<A>()) };
        Self { ptr, len }
    }

    #[inline]
    pub fn as_slice(&self) -> &[A] {
        // SAFETY: ptr came from a boxed slice of `len` zeroed `A`s.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len as usize) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }
}

impl<A: Zeroable> Drop for ZeroedArray<A> {
    fn drop(&mut self) {
        let raw = ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len as usize);
        // SAFETY: rebuilds the box leaked in `new`, with the same length.
        drop(unsafe { Box::from_raw(raw) });
    }
}
