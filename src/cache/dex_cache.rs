use super::{
    indexed::{AtomicGcRoot, GcRootArray, IndexedArrayCache},
    layout::{ArrayCounts, DexCacheArraysLayout},
    metrics::{CacheCounters, CacheKind, CacheStat, CacheStats},
    raw::ZeroedArray,
    FixedCache, METHOD_TYPE_CACHE_SIZE, STRING_CACHE_SIZE, TYPE_CACHE_SIZE,
};
use crate::{
    dex::DexFile,
    heap::{
        GcRoot, MirrorCallSite, MirrorClass, MirrorMethodType, MirrorString, ObjectRef, RootInfo,
        RootKind, RootVisitor,
    },
    members::{FieldDescription, MethodDescription},
    utils::{
        sync::{get_current_thread_id, register_current_thread, Mutex, MutexGuard},
        CallSiteIndex, FieldIndex, MethodIndex, PointerSize, ProtoIndex, StringIndex, TypeIndex,
    },
};
use memoffset::offset_of;
use serde::Serialize;
use std::fmt::{self, Debug, Formatter};
use tracing::{debug, trace};

pub type StringCache = FixedCache<MirrorString, STRING_CACHE_SIZE>;
pub type TypeCache = FixedCache<MirrorClass, TYPE_CACHE_SIZE>;
pub type MethodTypeCache = FixedCache<MirrorMethodType, METHOD_TYPE_CACHE_SIZE>;
type MethodArray = IndexedArrayCache<'static, MethodDescription>;
type FieldArray = IndexedArrayCache<'static, FieldDescription>;
type CallSiteArray = GcRootArray<MirrorCallSite>;
type RawArray = ZeroedArray<crate::utils::sync::AtomicU32>;
type StaticCache = ResolutionCache<'static>;

/// The runtime-wide lock under which caches are created and registered.
#[derive(Default)]
pub struct DexLock {
    lock: Mutex<()>,
}

/// Proof that the calling thread holds the [`DexLock`].
pub struct DexLockGuard<'l> {
    _guard: MutexGuard<'l, ()>,
    owner: u64,
}

impl DexLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> DexLockGuard<'_> {
        let owner = register_current_thread();
        DexLockGuard {
            _guard: self.lock.lock(),
            owner,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl DexLockGuard<'_> {
    /// Runtime thread ID of the holder.
    pub fn owner(&self) -> u64 {
        self.owner
    }
}

/// Byte offsets of a [`ResolutionCache`]'s array pointers and lengths, for
/// code that reads the cache without going through its methods.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DexCacheOffsets {
    pub location: usize,
    pub strings: usize,
    pub num_strings: usize,
    pub resolved_types: usize,
    pub num_resolved_types: usize,
    pub resolved_method_types: usize,
    pub num_resolved_method_types: usize,
    pub resolved_methods: usize,
    pub num_resolved_methods: usize,
    pub resolved_fields: usize,
    pub num_resolved_fields: usize,
    pub resolved_call_sites: usize,
    pub num_resolved_call_sites: usize,
    pub dex_file: usize,
}

/// The resolved-constant cache of one image.
///
/// Created once per registered image by [`ResolutionCache::initialize`] and
/// shared from then on; every operation takes `&self`.
#[repr(C)]
pub struct ResolutionCache<'a> {
    location: AtomicGcRoot<MirrorString>,
    strings: StringCache,
    resolved_types: TypeCache,
    resolved_method_types: MethodTypeCache,
    resolved_methods: IndexedArrayCache<'a, MethodDescription>,
    resolved_fields: IndexedArrayCache<'a, FieldDescription>,
    resolved_call_sites: GcRootArray<MirrorCallSite>,
    dex_file: &'a DexFile,
    pointer_size: PointerSize,
    counters: CacheCounters,
}

impl<'a> ResolutionCache<'a> {
    /// Size every array from `dex_file`'s declared counts and zero-fill it.
    ///
    /// `pointer_size` is the pointer width of the image the cache belongs to.
    pub fn initialize(
        location: GcRoot<MirrorString>,
        dex_file: &'a DexFile,
        pointer_size: PointerSize,
        lock: &DexLockGuard<'_>,
    ) -> Self {
        debug_assert_eq!(lock.owner(), get_current_thread_id());
        let counts = ArrayCounts::of(dex_file);
        let layout = DexCacheArraysLayout::from_counts(pointer_size, counts);
        debug!(
            location = dex_file.location(),
            strings = counts.strings,
            types = counts.types,
            methods = counts.methods,
            fields = counts.fields,
            method_types = counts.method_types,
            call_sites = counts.call_sites,
            image_bytes = layout.size(),
            %pointer_size,
            "initializing resolution cache"
        );

        Self {
            location: AtomicGcRoot::new(location),
            strings: StringCache::new(counts.strings),
            resolved_types: TypeCache::new(counts.types),
            resolved_method_types: MethodTypeCache::new(counts.method_types),
            resolved_methods: IndexedArrayCache::new(counts.methods),
            resolved_fields: IndexedArrayCache::new(counts.fields),
            resolved_call_sites: GcRootArray::new(counts.call_sites),
            dex_file,
            pointer_size,
            counters: CacheCounters::new(),
        }
    }

    #[inline]
    fn check_bound(&self, what: &str, index: u32, count: u32) {
        assert!(
            index < count,
            "{what} index {index} out of bounds for {} ({count} declared)",
            self.dex_file.location()
        );
    }

    pub fn location(&self) -> GcRoot<MirrorString> {
        self.location.load()
    }

    /// Display name of the cache: the location of its image.
    pub fn name(&self) -> &'a str {
        self.dex_file.location()
    }

    pub fn dex_file(&self) -> &'a DexFile {
        self.dex_file
    }

    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    pub fn strings(&self) -> &StringCache {
        &self.strings
    }

    pub fn resolved_types(&self) -> &TypeCache {
        &self.resolved_types
    }

    pub fn resolved_method_types(&self) -> &MethodTypeCache {
        &self.resolved_method_types
    }

    pub fn resolved_methods(&self) -> &IndexedArrayCache<'a, MethodDescription> {
        &self.resolved_methods
    }

    pub fn resolved_fields(&self) -> &IndexedArrayCache<'a, FieldDescription> {
        &self.resolved_fields
    }

    pub fn resolved_call_sites(&self) -> &GcRootArray<MirrorCallSite> {
        &self.resolved_call_sites
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn num_resolved_types(&self) -> usize {
        self.resolved_types.len()
    }

    pub fn num_resolved_method_types(&self) -> usize {
        self.resolved_method_types.len()
    }

    pub fn num_resolved_methods(&self) -> usize {
        self.resolved_methods.len()
    }

    pub fn num_resolved_fields(&self) -> usize {
        self.resolved_fields.len()
    }

    pub fn num_resolved_call_sites(&self) -> usize {
        self.resolved_call_sites.len()
    }

    pub fn get_resolved_string(&self, index: StringIndex) -> Option<GcRoot<MirrorString>> {
        self.check_bound("string", index.0, self.dex_file.num_string_ids());
        self.counters
            .observe(CacheKind::String, self.strings.lookup(index.0))
    }

    pub fn set_resolved_string(&self, index: StringIndex, string: GcRoot<MirrorString>) {
        self.check_bound("string", index.0, self.dex_file.num_string_ids());
        trace!(cache = self.name(), %index, ?string, "caching string");
        self.strings.insert(index.0, string);
    }

    /// Roll back a string resolved inside an aborted transaction.
    pub fn clear_string(&self, index: StringIndex) -> bool {
        self.check_bound("string", index.0, self.dex_file.num_string_ids());
        self.strings.clear_if_matching(index.0)
    }

    pub fn get_resolved_type(&self, index: TypeIndex) -> Option<GcRoot<MirrorClass>> {
        self.check_bound("type", index.0, self.dex_file.num_type_ids());
        self.counters
            .observe(CacheKind::Type, self.resolved_types.lookup(index.0))
    }

    /// Cache `class` for `index`.
    ///
    /// The caller guarantees that `class` has the descriptor of type id
    /// `index` and is the class the class table holds for it.
    pub fn set_resolved_type(&self, index: TypeIndex, class: GcRoot<MirrorClass>) {
        self.check_bound("type", index.0, self.dex_file.num_type_ids());
        trace!(cache = self.name(), %index, ?class, "caching type");
        self.resolved_types.insert(index.0, class);
    }

    pub fn clear_resolved_type(&self, index: TypeIndex) -> bool {
        self.check_bound("type", index.0, self.dex_file.num_type_ids());
        self.resolved_types.clear_if_matching(index.0)
    }

    pub fn get_resolved_method_type(&self, index: ProtoIndex) -> Option<GcRoot<MirrorMethodType>> {
        self.check_bound("proto", index.0, self.dex_file.num_proto_ids());
        self.counters.observe(
            CacheKind::MethodType,
            self.resolved_method_types.lookup(index.0),
        )
    }

    pub fn set_resolved_method_type(&self, index: ProtoIndex, method_type: GcRoot<MirrorMethodType>) {
        self.check_bound("proto", index.0, self.dex_file.num_proto_ids());
        trace!(cache = self.name(), %index, ?method_type, "caching method type");
        self.resolved_method_types.insert(index.0, method_type);
    }

    pub fn clear_resolved_method_type(&self, index: ProtoIndex) -> bool {
        self.check_bound("proto", index.0, self.dex_file.num_proto_ids());
        self.resolved_method_types.clear_if_matching(index.0)
    }

    /// The cached method for `index`. A slot still holding the resolution
    /// trampoline reads as a miss.
    pub fn get_resolved_method(&self, index: MethodIndex) -> Option<&'a MethodDescription> {
        self.check_bound("method", index.0, self.dex_file.num_method_ids());
        let method = self
            .resolved_methods
            .get(index.0)
            .filter(|m| !m.is_runtime_method());
        self.counters.observe(CacheKind::Method, method)
    }

    pub fn set_resolved_method(&self, index: MethodIndex, method: &'a MethodDescription) {
        self.check_bound("method", index.0, self.dex_file.num_method_ids());
        trace!(cache = self.name(), %index, ?method, "caching method");
        self.resolved_methods.set(index.0, method);
    }

    pub fn get_resolved_field(&self, index: FieldIndex) -> Option<&'a FieldDescription> {
        self.check_bound("field", index.0, self.dex_file.num_field_ids());
        self.counters
            .observe(CacheKind::Field, self.resolved_fields.get(index.0))
    }

    pub fn set_resolved_field(&self, index: FieldIndex, field: &'a FieldDescription) {
        self.check_bound("field", index.0, self.dex_file.num_field_ids());
        trace!(cache = self.name(), %index, ?field, "caching field");
        self.resolved_fields.set(index.0, field);
    }

    pub fn get_resolved_call_site(&self, index: CallSiteIndex) -> Option<GcRoot<MirrorCallSite>> {
        self.check_bound("call site", index.0, self.dex_file.num_call_site_ids());
        self.counters
            .observe(CacheKind::CallSite, self.resolved_call_sites.get(index.0))
    }

    /// Bind call site `index` to `candidate` unless it is already bound.
    ///
    /// Returns the call site that is bound after the call; threads racing to
    /// bind the same index all get the same winner back.
    #[must_use]
    pub fn set_resolved_call_site(
        &self,
        index: CallSiteIndex,
        candidate: GcRoot<MirrorCallSite>,
    ) -> GcRoot<MirrorCallSite> {
        self.check_bound("call site", index.0, self.dex_file.num_call_site_ids());
        let winner = self.resolved_call_sites.bind_once(index.0, candidate);
        if winner == candidate {
            trace!(cache = self.name(), %index, ?winner, "bound call site");
        } else {
            trace!(cache = self.name(), %index, ?winner, ?candidate, "call site already bound");
        }
        winner
    }

    /// Present every GC root held by this cache to `visitor`.
    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor) {
        self.location
            .visit(visitor, RootInfo::new(RootKind::DexCacheLocation, 0));
        self.strings.visit_roots(visitor, RootKind::String);
        self.resolved_types.visit_roots(visitor, RootKind::Type);
        self.resolved_method_types
            .visit_roots(visitor, RootKind::MethodType);
        self.resolved_call_sites
            .visit_roots(visitor, RootKind::CallSite);
    }

    /// Point every unresolved method slot at `trampoline`.
    ///
    /// Run while no other thread uses the cache, e.g. while loading an image.
    pub fn fixup(&self, trampoline: &'a MethodDescription, pointer_size: PointerSize) {
        assert!(
            trampoline.is_runtime_method(),
            "fixup trampoline {trampoline:?} is not a runtime method"
        );
        assert_eq!(
            pointer_size, self.pointer_size,
            "fixup pointer size does not match the image"
        );
        let filled = self.resolved_methods.fill_null_with(trampoline);
        debug!(cache = self.name(), filled, "pointed unresolved methods at the trampoline");
    }

    pub fn fixup_strings(&self, dest: &StringCache, relocate: impl FnMut(ObjectRef) -> ObjectRef) {
        self.strings.fixup_into(dest, relocate);
    }

    pub fn fixup_resolved_types(&self, dest: &TypeCache, relocate: impl FnMut(ObjectRef) -> ObjectRef) {
        self.resolved_types.fixup_into(dest, relocate);
    }

    pub fn fixup_resolved_method_types(
        &self,
        dest: &MethodTypeCache,
        relocate: impl FnMut(ObjectRef) -> ObjectRef,
    ) {
        self.resolved_method_types.fixup_into(dest, relocate);
    }

    pub fn fixup_resolved_call_sites(
        &self,
        dest: &GcRootArray<MirrorCallSite>,
        relocate: impl FnMut(ObjectRef) -> ObjectRef,
    ) {
        self.resolved_call_sites.fixup_into(dest, relocate);
    }

    /// Where this cache's arrays go in an image written for its pointer size.
    pub fn arrays_layout(&self) -> DexCacheArraysLayout {
        DexCacheArraysLayout::new(self.pointer_size, self.dex_file)
    }

    pub fn stats(&self) -> CacheStats {
        let stat = |kind, size, capacity| self.counters.stat(kind, size, capacity);
        CacheStats {
            strings: stat(CacheKind::String, self.strings.occupancy(), self.strings.len()),
            types: stat(
                CacheKind::Type,
                self.resolved_types.occupancy(),
                self.resolved_types.len(),
            ),
            method_types: stat(
                CacheKind::MethodType,
                self.resolved_method_types.occupancy(),
                self.resolved_method_types.len(),
            ),
            methods: stat(
                CacheKind::Method,
                self.resolved_methods
                    .iter()
                    .flatten()
                    .filter(|m| !m.is_runtime_method())
                    .count(),
                self.resolved_methods.len(),
            ),
            fields: stat(
                CacheKind::Field,
                self.resolved_fields.occupancy(),
                self.resolved_fields.len(),
            ),
            call_sites: stat(
                CacheKind::CallSite,
                self.resolved_call_sites.occupancy(),
                self.resolved_call_sites.len(),
            ),
        }
    }

    pub fn stat(&self, kind: CacheKind) -> CacheStat {
        self.stats().get(kind)
    }

    pub fn offsets() -> DexCacheOffsets {
        let data = offset_of!(RawArray, ptr);
        let len = offset_of!(RawArray, len);
        let strings = offset_of!(StaticCache, strings) + offset_of!(StringCache, slots);
        let types = offset_of!(StaticCache, resolved_types) + offset_of!(TypeCache, slots);
        let method_types =
            offset_of!(StaticCache, resolved_method_types) + offset_of!(MethodTypeCache, slots);
        let methods = offset_of!(StaticCache, resolved_methods) + offset_of!(MethodArray, entries);
        let fields = offset_of!(StaticCache, resolved_fields) + offset_of!(FieldArray, entries);
        let call_sites =
            offset_of!(StaticCache, resolved_call_sites) + offset_of!(CallSiteArray, entries);
        DexCacheOffsets {
            location: offset_of!(StaticCache, location),
            strings: strings + data,
            num_strings: strings + len,
            resolved_types: types + data,
            num_resolved_types: types + len,
            resolved_method_types: method_types + data,
            num_resolved_method_types: method_types + len,
            resolved_methods: methods + data,
            num_resolved_methods: methods + len,
            resolved_fields: fields + data,
            num_resolved_fields: fields + len,
            resolved_call_sites: call_sites + data,
            num_resolved_call_sites: call_sites + len,
            dex_file: offset_of!(StaticCache, dex_file),
        }
    }
}

impl Debug for ResolutionCache<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("name", &self.name())
            .field("location", &self.location)
            .field("strings", &self.strings)
            .field("resolved_types", &self.resolved_types)
            .field("resolved_method_types", &self.resolved_method_types)
            .field("resolved_methods", &self.resolved_methods)
            .field("resolved_fields", &self.resolved_fields)
            .field("resolved_call_sites", &self.resolved_call_sites)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dex::DexFileBuilder, linker::LinearAlloc};

    fn image() -> DexFile {
        let mut builder = DexFileBuilder::new();
        builder.class_def("LMain;");
        let main = builder.method("LMain;", "main", "V", &[]);
        builder.method("LMain;", "helper", "I", &["I"]);
        builder.field("LMain;", "count", "I");
        builder.call_site(main, "run", "V", &[]);
        builder.build("main.json").unwrap()
    }

    fn root<T>(slot: usize) -> GcRoot<T> {
        GcRoot::new(ObjectRef::from_slot(slot))
    }

    fn cache(file: &DexFile) -> ResolutionCache<'_> {
        let lock = DexLock::new();
        let guard = lock.lock();
        ResolutionCache::initialize(root(0), file, PointerSize::native(), &guard)
    }

    #[test]
    fn test_initialize_sizes_from_declared_counts() {
        let file = image();
        let cache = cache(&file);
        assert_eq!(cache.num_strings(), file.num_string_ids() as usize);
        assert_eq!(cache.num_resolved_types(), file.num_type_ids() as usize);
        assert_eq!(cache.num_resolved_methods(), 2);
        assert_eq!(cache.num_resolved_fields(), 1);
        assert_eq!(cache.num_resolved_call_sites(), 1);
        assert_eq!(cache.name(), "main.json");
        assert_eq!(cache.location(), root(0));
        assert!(cache.get_resolved_string(StringIndex(0)).is_none());
        assert!(cache.get_resolved_type(TypeIndex(0)).is_none());
    }

    #[test]
    fn test_round_trips_through_every_sub_cache() {
        let file = image();
        let alloc = LinearAlloc::new();
        let cache = cache(&file);

        cache.set_resolved_string(StringIndex(1), root(1));
        cache.set_resolved_type(TypeIndex(0), root(2));
        cache.set_resolved_method_type(ProtoIndex(0), root(3));
        let method = alloc.alloc_method(MethodDescription::declared("LMain;", "main", "()V", MethodIndex(0)));
        cache.set_resolved_method(MethodIndex(0), method);
        let field = alloc.alloc_field(FieldDescription::new("LMain;", "count", "I", FieldIndex(0)));
        cache.set_resolved_field(FieldIndex(0), field);

        assert_eq!(cache.get_resolved_string(StringIndex(1)), Some(root(1)));
        assert_eq!(cache.get_resolved_type(TypeIndex(0)), Some(root(2)));
        assert_eq!(cache.get_resolved_method_type(ProtoIndex(0)), Some(root(3)));
        assert!(std::ptr::eq(cache.get_resolved_method(MethodIndex(0)).unwrap(), method));
        assert!(std::ptr::eq(cache.get_resolved_field(FieldIndex(0)).unwrap(), field));

        let stats = cache.stats();
        assert_eq!(stats.strings.hits, 1);
        assert_eq!(stats.strings.size, 1);
        assert_eq!(stats.methods.size, 1);
    }

    #[test]
    fn test_clear_hooks_roll_back_entries() {
        let file = image();
        let cache = cache(&file);
        cache.set_resolved_string(StringIndex(2), root(1));
        cache.set_resolved_type(TypeIndex(1), root(2));
        cache.set_resolved_method_type(ProtoIndex(0), root(3));

        assert!(cache.clear_string(StringIndex(2)));
        assert!(cache.clear_resolved_type(TypeIndex(1)));
        assert!(cache.clear_resolved_method_type(ProtoIndex(0)));
        assert!(!cache.clear_string(StringIndex(2)));
        assert!(cache.get_resolved_string(StringIndex(2)).is_none());
        assert!(cache.get_resolved_type(TypeIndex(1)).is_none());
        assert!(cache.get_resolved_method_type(ProtoIndex(0)).is_none());
    }

    #[test]
    fn test_call_site_first_install_wins() {
        let file = image();
        let cache = cache(&file);
        assert_eq!(cache.set_resolved_call_site(CallSiteIndex(0), root(7)), root(7));
        assert_eq!(cache.set_resolved_call_site(CallSiteIndex(0), root(8)), root(7));
        assert_eq!(cache.get_resolved_call_site(CallSiteIndex(0)), Some(root(7)));
    }

    #[test]
    fn test_fixup_fills_only_null_methods_and_hides_trampoline() {
        let file = image();
        let alloc = LinearAlloc::new();
        let cache = cache(&file);
        let main = alloc.alloc_method(MethodDescription::declared("LMain;", "main", "()V", MethodIndex(0)));
        cache.set_resolved_method(MethodIndex(0), main);

        let trampoline = alloc.alloc_method(MethodDescription::runtime("resolution"));
        cache.fixup(trampoline, PointerSize::native());

        assert!(std::ptr::eq(cache.get_resolved_method(MethodIndex(0)).unwrap(), main));
        assert!(cache.get_resolved_method(MethodIndex(1)).is_none());
        let raw = cache.resolved_methods().get(1).unwrap();
        assert!(std::ptr::eq(raw, trampoline));
    }

    #[test]
    #[should_panic(expected = "not a runtime method")]
    fn test_fixup_rejects_declared_method() {
        let file = image();
        let alloc = LinearAlloc::new();
        let cache = cache(&file);
        let main = alloc.alloc_method(MethodDescription::declared("LMain;", "main", "()V", MethodIndex(0)));
        cache.fixup(main, PointerSize::native());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_index_is_fatal() {
        let file = image();
        let cache = cache(&file);
        cache.get_resolved_field(FieldIndex(1));
    }

    #[test]
    fn test_visit_roots_sees_location_and_every_entry_once() {
        let file = image();
        let cache = cache(&file);
        cache.set_resolved_string(StringIndex(0), root(10));
        cache.set_resolved_type(TypeIndex(0), root(11));
        cache.set_resolved_method_type(ProtoIndex(0), root(12));
        let _ = cache.set_resolved_call_site(CallSiteIndex(0), root(13));

        let mut seen = Vec::new();
        cache.visit_roots(&mut |r: &mut ObjectRef, info: RootInfo| seen.push((r.slot(), info.kind)));
        seen.sort_by_key(|&(slot, _)| slot);
        assert_eq!(
            seen,
            vec![
                (0, RootKind::DexCacheLocation),
                (10, RootKind::String),
                (11, RootKind::Type),
                (12, RootKind::MethodType),
                (13, RootKind::CallSite),
            ]
        );
    }

    #[test]
    fn test_fixup_copies_relocate_into_destination() {
        let file = image();
        let cache = cache(&file);
        cache.set_resolved_string(StringIndex(3), root(3));
        let _ = cache.set_resolved_call_site(CallSiteIndex(0), root(4));

        let strings = StringCache::new(file.num_string_ids());
        cache.fixup_strings(&strings, |r| ObjectRef::from_slot(r.slot() + 100));
        assert_eq!(strings.lookup(3), Some(root(103)));

        let types = TypeCache::new(file.num_type_ids());
        cache.fixup_resolved_types(&types, |r| r);
        assert_eq!(types.occupancy(), 0);

        let method_types = MethodTypeCache::new(file.num_proto_ids());
        cache.fixup_resolved_method_types(&method_types, |r| r);
        assert_eq!(method_types.lookup(0), None);

        let call_sites = GcRootArray::new(file.num_call_site_ids());
        cache.fixup_resolved_call_sites(&call_sites, |r| ObjectRef::from_slot(r.slot() + 100));
        assert_eq!(call_sites.get(0), Some(root(104)));
    }

    #[test]
    fn test_offsets_point_at_array_fields() {
        let offsets = ResolutionCache::offsets();
        let word = std::mem::size_of::<usize>();
        assert_eq!(offsets.location, 0);
        assert_eq!(offsets.num_strings, offsets.strings + word);
        assert!(offsets.resolved_types > offsets.strings);
        assert!(offsets.resolved_call_sites > offsets.resolved_fields);
        assert!(offsets.dex_file > offsets.num_resolved_call_sites);

        let file = image();
        let cache = cache(&file);
        let base = std::ptr::from_ref(&cache).cast::<u8>();
        // SAFETY: offsets come from the struct's own layout and are in bounds.
        let num_strings = unsafe { base.add(offsets.num_strings).cast::<u32>().read() };
        assert_eq!(num_strings as usize, cache.num_strings());
        let num_methods = unsafe { base.add(offsets.num_resolved_methods).cast::<u32>().read() };
        assert_eq!(num_methods, 2);
    }

    #[test]
    fn test_dex_lock_reports_owner() {
        let lock = DexLock::new();
        assert!(!lock.is_locked());
        let guard = lock.lock();
        assert!(lock.is_locked());
        assert_eq!(guard.owner(), get_current_thread_id());
    }
}
