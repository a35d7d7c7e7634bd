//! Entry points managed code calls into for its own cache.
//!
//! Indices arrive as signed 32-bit integers from managed code, so every entry
//! point checks them against the image's declared counts first. A bad index
//! is a runtime bug, not a managed exception, and aborts.
use crate::{
    cache::{DexLockGuard, ResolutionCache},
    heap::{GcRoot, MirrorClass, MirrorString},
    linker::ClassLinker,
    utils::{sync::get_current_thread_id, StringIndex, TypeIndex},
};
use tracing::trace;

fn check_index(what: &str, index: i32, count: u32) -> u32 {
    match u32::try_from(index) {
        Ok(index) if index < count => index,
        _ => panic!("{what} index {index} out of bounds ({count} declared)"),
    }
}

/// The raw bytes of the cache's image. Callers hold the dex lock so the image
/// cannot be unregistered underneath them.
pub fn get_dex_native<'a>(cache: &ResolutionCache<'a>, lock: &DexLockGuard<'_>) -> &'a [u8] {
    debug_assert_eq!(lock.owner(), get_current_thread_id());
    cache.dex_file().begin()
}

pub fn get_resolved_type(cache: &ResolutionCache<'_>, type_index: i32) -> Option<GcRoot<MirrorClass>> {
    let index = check_index("type", type_index, cache.dex_file().num_type_ids());
    cache.get_resolved_type(TypeIndex(index))
}

pub fn get_resolved_string(
    cache: &ResolutionCache<'_>,
    string_index: i32,
) -> Option<GcRoot<MirrorString>> {
    let index = check_index("string", string_index, cache.dex_file().num_string_ids());
    cache.get_resolved_string(StringIndex(index))
}

/// Cache `class` for `type_index` if it really is the class that index names.
///
/// The class must carry the type id's descriptor and be the one the class
/// table holds for it; anything else is silently ignored, as is a null or
/// dead class. Returns whether the cache was updated.
pub fn set_resolved_type<'a>(
    linker: &ClassLinker<'a>,
    cache: &ResolutionCache<'a>,
    type_index: i32,
    class: GcRoot<MirrorClass>,
) -> bool {
    let index = TypeIndex(check_index("type", type_index, cache.dex_file().num_type_ids()));
    let Some(handle) = class.read(linker.heap()) else {
        return false;
    };
    let descriptor = cache.dex_file().string_by_type_idx(index);
    if !handle.descriptor_equals(descriptor) {
        trace!(%index, descriptor, actual = handle.descriptor(), "descriptor mismatch");
        return false;
    }
    if linker.class_table().insert_or_get(descriptor, class) != class {
        trace!(%index, descriptor, "class is not canonical");
        return false;
    }
    cache.set_resolved_type(index, class);
    true
}

/// Cache `string` for `string_index`; a null string is ignored.
pub fn set_resolved_string(cache: &ResolutionCache<'_>, string_index: i32, string: GcRoot<MirrorString>) {
    let index = check_index("string", string_index, cache.dex_file().num_string_ids());
    if !string.is_null() {
        cache.set_resolved_string(StringIndex(index), string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dex::{DexFile, DexFileBuilder},
        heap::Heap,
        linker::LinearAlloc,
        utils::PointerSize,
    };

    fn image() -> DexFile {
        let mut b = DexFileBuilder::new();
        b.class_def("LA;");
        b.type_id("LB;");
        b.string("text");
        b.build("native.json").unwrap()
    }

    #[test]
    fn test_get_dex_native_returns_image_bytes() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();
        let lock = linker.dex_lock().lock();
        assert_eq!(get_dex_native(&cache, &lock), file.begin());
        assert!(linker.dex_lock().is_locked());
    }

    #[test]
    fn test_set_resolved_type_requires_matching_canonical_class() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        let wrong = heap.alloc_root(MirrorClass::new("LB;", None));
        assert!(!set_resolved_type(&linker, &cache, 0, wrong));
        assert_eq!(get_resolved_type(&cache, 0), None);

        let canonical = linker.find_class("LA;").unwrap();
        let impostor = heap.alloc_root(MirrorClass::new("LA;", None));
        assert!(!set_resolved_type(&linker, &cache, 0, impostor));
        assert!(set_resolved_type(&linker, &cache, 0, canonical));
        assert_eq!(get_resolved_type(&cache, 0), Some(canonical));

        assert!(!set_resolved_type(&linker, &cache, 1, GcRoot::null()));
    }

    #[test]
    fn test_set_resolved_string_ignores_null() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        set_resolved_string(&cache, 2, GcRoot::null());
        assert_eq!(get_resolved_string(&cache, 2), None);
        let text = heap.alloc_root(MirrorString::new("text"));
        set_resolved_string(&cache, 2, text);
        assert_eq!(get_resolved_string(&cache, 2), Some(text));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_negative_index_is_fatal() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();
        get_resolved_type(&cache, -1);
    }
}
