//! The class linker: owns the runtime-wide tables and turns cache misses into
//! resolved entries.
//!
//! Every `resolve_*` method follows the same shape: ask the cache, and on a
//! miss resolve through the image and the class linker's own tables, then
//! publish the result with the cache's `set_resolved_*`. Two threads missing on
//! the same index may both resolve it; the cache decides which result sticks.
use crate::{
    cache::{CacheStats, DexLock, ResolutionCache},
    dex::DexFile,
    error::{ResolutionError, RuntimeError},
    heap::{
        mirror::is_primitive_descriptor, CollectionStats, GcRoot, Heap, MirrorCallSite,
        MirrorClass, MirrorMethodType, MirrorString, RootVisitor,
    },
    members::{FieldDescription, MemberKey, MethodDescription},
    utils::{
        sync::{register_current_thread, Arc, RwLock},
        CallSiteIndex, FieldIndex, MethodIndex, PointerSize, ProtoIndex, StringIndex, TypeIndex,
    },
};
use dashmap::DashMap;
use std::fmt::{self, Debug, Formatter};
use tracing::{debug, info};

mod alloc;
mod tables;
mod transaction;

pub use alloc::LinearAlloc;
pub use tables::{ClassTable, InternTable};
pub use transaction::{RollbackStats, Transaction};

pub const RESOLUTION_METHOD_NAME: &str = "<resolution>";

pub struct ClassLinker<'a> {
    heap: &'a Heap,
    linear_alloc: &'a LinearAlloc,
    pointer_size: PointerSize,
    dex_lock: DexLock,
    dex_caches: RwLock<Vec<Arc<ResolutionCache<'a>>>>,
    class_table: ClassTable,
    intern_table: InternTable,
    methods: DashMap<MemberKey, &'a MethodDescription>,
    fields: DashMap<MemberKey, &'a FieldDescription>,
    resolution_method: &'a MethodDescription,
}

impl Debug for ClassLinker<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLinker")
            .field("pointer_size", &self.pointer_size)
            .field("dex_caches", &self.dex_caches.read().len())
            .field("class_table", &self.class_table)
            .field("intern_table", &self.intern_table)
            .finish_non_exhaustive()
    }
}

impl<'a> ClassLinker<'a> {
    pub fn new(heap: &'a Heap, linear_alloc: &'a LinearAlloc, pointer_size: PointerSize) -> Self {
        let resolution_method =
            linear_alloc.alloc_method(MethodDescription::runtime(RESOLUTION_METHOD_NAME));
        Self {
            heap,
            linear_alloc,
            pointer_size,
            dex_lock: DexLock::new(),
            dex_caches: RwLock::new(Vec::new()),
            class_table: ClassTable::new(),
            intern_table: InternTable::new(),
            methods: DashMap::new(),
            fields: DashMap::new(),
            resolution_method,
        }
    }

    pub fn heap(&self) -> &'a Heap {
        self.heap
    }

    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    pub fn intern_table(&self) -> &InternTable {
        &self.intern_table
    }

    pub fn dex_lock(&self) -> &DexLock {
        &self.dex_lock
    }

    /// The runtime stub unresolved method slots point at after a fixup.
    pub fn resolution_method(&self) -> &'a MethodDescription {
        self.resolution_method
    }

    /// Create and register the cache for `dex_file`.
    pub fn register_dex_file(
        &self,
        dex_file: &'a DexFile,
    ) -> Result<Arc<ResolutionCache<'a>>, RuntimeError> {
        let guard = self.dex_lock.lock();
        if self.find_dex_cache(dex_file.location()).is_some() {
            return Err(RuntimeError::DuplicateImage(dex_file.location().to_string()));
        }
        let (location, _) = self.intern_table.intern(self.heap, dex_file.location());
        let cache = Arc::new(ResolutionCache::initialize(
            location,
            dex_file,
            self.pointer_size,
            &guard,
        ));
        self.dex_caches.write().push(cache.clone());
        info!(location = dex_file.location(), "registered image");
        Ok(cache)
    }

    pub fn find_dex_cache(&self, location: &str) -> Option<Arc<ResolutionCache<'a>>> {
        self.dex_caches
            .read()
            .iter()
            .find(|c| c.name() == location)
            .cloned()
    }

    pub fn dex_caches(&self) -> Vec<Arc<ResolutionCache<'a>>> {
        self.dex_caches.read().clone()
    }

    /// Point every unresolved method slot of every cache at the resolution
    /// trampoline, as done when images are loaded.
    pub fn fixup_dex_caches(&self) {
        let _guard = self.dex_lock.lock();
        for cache in self.dex_caches.read().iter() {
            cache.fixup(self.resolution_method, self.pointer_size);
        }
    }

    pub fn resolve_string(&self, cache: &ResolutionCache<'a>, index: StringIndex) -> GcRoot<MirrorString> {
        if let Some(string) = cache.get_resolved_string(index) {
            return string;
        }
        let (string, _) = self
            .intern_table
            .intern(self.heap, cache.dex_file().string_data(index));
        cache.set_resolved_string(index, string);
        string
    }

    /// Like [`resolve_string`](Self::resolve_string), but logs the entry and any
    /// newly interned string in `transaction` so they can be rolled back.
    pub fn resolve_string_in_transaction(
        &self,
        cache: &Arc<ResolutionCache<'a>>,
        index: StringIndex,
        transaction: &Transaction<'a>,
    ) -> GcRoot<MirrorString> {
        if let Some(string) = cache.get_resolved_string(index) {
            return string;
        }
        let value = cache.dex_file().string_data(index);
        let (string, fresh) = self.intern_table.intern(self.heap, value);
        if fresh {
            transaction.record_interned_string(value);
        }
        cache.set_resolved_string(index, string);
        transaction.record_resolved_string(cache, index);
        string
    }

    pub fn resolve_type(
        &self,
        cache: &ResolutionCache<'a>,
        index: TypeIndex,
    ) -> Result<GcRoot<MirrorClass>, ResolutionError> {
        if let Some(class) = cache.get_resolved_type(index) {
            return Ok(class);
        }
        let descriptor = cache.dex_file().string_by_type_idx(index);
        let class = match self.class_table.lookup(descriptor) {
            Some(class) => class,
            None => self.define_class(descriptor)?,
        };
        cache.set_resolved_type(index, class);
        Ok(class)
    }

    /// Look up a class by descriptor, defining it from the registered images
    /// if nothing has loaded it yet.
    pub fn find_class(&self, descriptor: &str) -> Result<GcRoot<MirrorClass>, ResolutionError> {
        match self.class_table.lookup(descriptor) {
            Some(class) => Ok(class),
            None => self.define_class(descriptor),
        }
    }

    fn define_class(&self, descriptor: &str) -> Result<GcRoot<MirrorClass>, ResolutionError> {
        let _guard = self.dex_lock.lock();
        if let Some(class) = self.class_table.lookup(descriptor) {
            return Ok(class);
        }
        if is_primitive_descriptor(descriptor) || descriptor.starts_with('[') {
            let class = self.heap.alloc_root(MirrorClass::new(descriptor, None));
            return Ok(self.class_table.insert_or_get(descriptor, class));
        }

        let dex_caches = self.dex_caches.read();
        let Some((dex_file, class_def)) = dex_caches.iter().find_map(|cache| {
            let dex_file = cache.dex_file();
            dex_file.find_class_def(descriptor).map(|t| (dex_file, t))
        }) else {
            return Err(ResolutionError::NoClassDefFound(descriptor.to_string()));
        };

        self.define_members(dex_file, class_def);
        let class = self
            .heap
            .alloc_root(MirrorClass::new(descriptor, Some(dex_file.location())));
        debug!(descriptor, image = dex_file.location(), "defined class");
        Ok(self.class_table.insert_or_get(descriptor, class))
    }

    fn define_members(&self, dex_file: &DexFile, class: TypeIndex) {
        let descriptor = dex_file.string_by_type_idx(class);
        for index in dex_file.methods_of(class) {
            let id = dex_file.method_id(index);
            let method = self.linear_alloc.alloc_method(MethodDescription::declared(
                descriptor,
                dex_file.string_data(id.name),
                &dex_file.proto_signature(id.proto),
                index,
            ));
            self.methods.insert(method.key(), method);
        }
        for index in dex_file.fields_of(class) {
            let id = dex_file.field_id(index);
            let field = self.linear_alloc.alloc_field(FieldDescription::new(
                descriptor,
                dex_file.string_data(id.name),
                dex_file.string_by_type_idx(id.type_),
                index,
            ));
            self.fields.insert(field.key(), field);
        }
    }

    pub fn resolve_method_type(
        &self,
        cache: &ResolutionCache<'a>,
        index: ProtoIndex,
    ) -> Result<GcRoot<MirrorMethodType>, ResolutionError> {
        if let Some(method_type) = cache.get_resolved_method_type(index) {
            return Ok(method_type);
        }
        let dex_file = cache.dex_file();
        let proto = dex_file.proto_id(index);
        self.resolve_type(cache, proto.return_type)?;
        for &parameter in &proto.parameters {
            self.resolve_type(cache, parameter)?;
        }
        let parameters: Vec<_> = proto
            .parameters
            .iter()
            .map(|&p| dex_file.string_by_type_idx(p))
            .collect();
        let method_type = self.heap.alloc_root(MirrorMethodType::new(
            dex_file.string_by_type_idx(proto.return_type),
            &parameters,
        ));
        cache.set_resolved_method_type(index, method_type);
        Ok(method_type)
    }

    pub fn resolve_method(
        &self,
        cache: &ResolutionCache<'a>,
        index: MethodIndex,
    ) -> Result<&'a MethodDescription, ResolutionError> {
        if let Some(method) = cache.get_resolved_method(index) {
            return Ok(method);
        }
        let dex_file = cache.dex_file();
        let id = dex_file.method_id(index);
        self.resolve_type(cache, id.class)?;
        let key = MemberKey::new(
            dex_file.string_by_type_idx(id.class),
            dex_file.string_data(id.name),
            &dex_file.proto_signature(id.proto),
        );
        let method = self
            .methods
            .get(&key)
            .map(|m| *m)
            .ok_or_else(|| ResolutionError::NoSuchMethod {
                class: key.class.to_string(),
                name: key.name.to_string(),
                signature: key.signature.to_string(),
            })?;
        cache.set_resolved_method(index, method);
        Ok(method)
    }

    pub fn resolve_field(
        &self,
        cache: &ResolutionCache<'a>,
        index: FieldIndex,
    ) -> Result<&'a FieldDescription, ResolutionError> {
        if let Some(field) = cache.get_resolved_field(index) {
            return Ok(field);
        }
        let dex_file = cache.dex_file();
        let id = dex_file.field_id(index);
        self.resolve_type(cache, id.class)?;
        let key = MemberKey::new(
            dex_file.string_by_type_idx(id.class),
            dex_file.string_data(id.name),
            dex_file.string_by_type_idx(id.type_),
        );
        let field = self
            .fields
            .get(&key)
            .map(|f| *f)
            .ok_or_else(|| ResolutionError::NoSuchField {
                class: key.class.to_string(),
                name: key.name.to_string(),
                type_descriptor: key.signature.to_string(),
            })?;
        cache.set_resolved_field(index, field);
        Ok(field)
    }

    /// Run the bootstrap of call site `index` and bind the result, or return
    /// the call site another thread bound first.
    pub fn resolve_call_site(
        &self,
        cache: &ResolutionCache<'a>,
        index: CallSiteIndex,
    ) -> Result<GcRoot<MirrorCallSite>, ResolutionError> {
        if let Some(call_site) = cache.get_resolved_call_site(index) {
            return Ok(call_site);
        }
        let dex_file = cache.dex_file();
        let id = dex_file.call_site_id(index);
        let bootstrap = self.resolve_method(cache, id.bootstrap)?;
        self.resolve_method_type(cache, id.proto)?;
        let candidate = self.heap.alloc_root(MirrorCallSite::new(
            dex_file.string_data(id.name),
            format!("{bootstrap:?}"),
            register_current_thread(),
        ));
        Ok(cache.set_resolved_call_site(index, candidate))
    }

    /// Present every root the linker and its caches hold.
    pub fn visit_roots(&self, visitor: &mut dyn RootVisitor) {
        self.class_table.visit_roots(visitor);
        self.intern_table.visit_roots(visitor);
        for cache in self.dex_caches.read().iter() {
            cache.visit_roots(visitor);
        }
    }

    pub fn collect_garbage(&self) -> CollectionStats {
        self.heap.collect(|visitor| self.visit_roots(visitor))
    }

    /// Moving collection over everything the linker roots. Callers must make
    /// sure no other thread is resolving while it runs.
    pub fn compact_heap(&self) -> CollectionStats {
        self.heap.compact(|visitor| self.visit_roots(visitor))
    }

    pub fn stats(&self) -> CacheStats {
        self.dex_caches
            .read()
            .iter()
            .map(|c| c.stats())
            .fold(CacheStats::default(), CacheStats::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::DexFileBuilder;

    fn image() -> DexFile {
        let mut b = DexFileBuilder::new();
        b.class_def("LMain;");
        b.string("hello");
        let main = b.method("LMain;", "main", "V", &["[Ljava/lang/String;"]);
        b.field("LMain;", "count", "I");
        b.method("LMissing;", "gone", "V", &[]);
        b.call_site(main, "run", "I", &["J"]);
        b.build("main.json").unwrap()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();
        assert!(Arc::ptr_eq(&cache, &linker.find_dex_cache("main.json").unwrap()));
        assert_eq!(
            linker.register_dex_file(&file).unwrap_err(),
            RuntimeError::DuplicateImage("main.json".into())
        );
        let location = cache.location().read(&heap).unwrap();
        assert_eq!(location.as_str(), "main.json");
    }

    #[test]
    fn test_resolution_populates_caches() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        let hello = file.contents().strings.iter().position(|s| s == "hello").unwrap();
        let string = linker.resolve_string(&cache, StringIndex(hello as u32));
        assert_eq!(string.read(&heap).unwrap().as_str(), "hello");
        assert_eq!(cache.get_resolved_string(StringIndex(hello as u32)), Some(string));

        let main = linker.resolve_method(&cache, MethodIndex(0)).unwrap();
        assert_eq!(format!("{main:?}"), "LMain;->main([Ljava/lang/String;)V");
        let class = cache.get_resolved_type(TypeIndex(0)).unwrap();
        assert_eq!(linker.class_table().lookup("LMain;"), Some(class));

        let field = linker.resolve_field(&cache, FieldIndex(0)).unwrap();
        assert_eq!(&*field.type_descriptor, "I");

        let call_site = linker.resolve_call_site(&cache, CallSiteIndex(0)).unwrap();
        let call_site = call_site.read(&heap).unwrap();
        assert_eq!(call_site.name(), "run");
        assert_eq!(call_site.target(), "LMain;->main([Ljava/lang/String;)V");
        let method_type = cache.get_resolved_method_type(file.call_site_id(CallSiteIndex(0)).proto);
        assert_eq!(method_type.unwrap().read(&heap).unwrap().signature(), "(J)I");
    }

    #[test]
    fn test_missing_class_is_an_error() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        assert_eq!(
            linker.resolve_method(&cache, MethodIndex(1)).unwrap_err(),
            ResolutionError::NoClassDefFound("LMissing;".into())
        );
        assert!(cache.get_resolved_method(MethodIndex(1)).is_none());
    }

    #[test]
    fn test_classes_are_shared_across_images() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let defining = image();
        let mut b = DexFileBuilder::new();
        let uses_main = b.method("LMain;", "main", "V", &["[Ljava/lang/String;"]);
        let user = b.build("user.json").unwrap();

        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let defining_cache = linker.register_dex_file(&defining).unwrap();
        let user_cache = linker.register_dex_file(&user).unwrap();

        let from_user = linker.resolve_method(&user_cache, uses_main).unwrap();
        let from_defining = linker.resolve_method(&defining_cache, MethodIndex(0)).unwrap();
        assert!(std::ptr::eq(from_user, from_defining));
        let class = linker.class_table().lookup("LMain;").unwrap().read(&heap).unwrap();
        assert_eq!(class.defining_image(), Some("main.json"));
    }

    #[test]
    fn test_fixup_then_resolve_replaces_trampoline() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();
        linker.fixup_dex_caches();

        assert!(cache.get_resolved_method(MethodIndex(0)).is_none());
        let raw = cache.resolved_methods().get(0).unwrap();
        assert!(std::ptr::eq(raw, linker.resolution_method()));

        let main = linker.resolve_method(&cache, MethodIndex(0)).unwrap();
        assert!(!main.is_runtime_method());
        assert!(std::ptr::eq(cache.get_resolved_method(MethodIndex(0)).unwrap(), main));
    }

    #[test]
    fn test_transaction_rollback_clears_strings() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        let hello = StringIndex(file.contents().strings.iter().position(|s| s == "hello").unwrap() as u32);
        let transaction = Transaction::new();
        linker.resolve_string_in_transaction(&cache, hello, &transaction);
        assert_eq!(transaction.num_resolved_strings(), 1);
        assert!(linker.intern_table().lookup("hello").is_some());

        let stats = transaction.rollback(&linker);
        assert_eq!(stats, RollbackStats { cleared: 1, uninterned: 1 });
        assert!(cache.get_resolved_string(hello).is_none());
        assert!(linker.intern_table().lookup("hello").is_none());
        // the image location stays interned
        assert!(linker.intern_table().lookup("main.json").is_some());

        let live = heap.live_objects();
        let collected = linker.collect_garbage();
        assert_eq!(collected.freed, 1);
        assert_eq!(collected.moved, 0);
        assert_eq!(heap.live_objects(), live - 1);
        assert_eq!(cache.location().read(&heap).unwrap().as_str(), "main.json");
    }

    #[test]
    fn test_compaction_keeps_cached_entries_readable() {
        let heap = Heap::new();
        let alloc = LinearAlloc::new();
        let file = image();
        let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
        let cache = linker.register_dex_file(&file).unwrap();

        linker.resolve_call_site(&cache, CallSiteIndex(0)).unwrap();
        let hello = StringIndex(file.contents().strings.iter().position(|s| s == "hello").unwrap() as u32);
        let before = linker.resolve_string(&cache, hello);
        heap.alloc(MirrorString::new("unreachable"));

        let stats = linker.compact_heap();
        assert_eq!(stats.freed, 1);

        let after = cache.get_resolved_string(hello).unwrap();
        assert_ne!(after, before);
        assert_eq!(after.read(&heap).unwrap().as_str(), "hello");
        assert_eq!(linker.intern_table().lookup("hello"), Some(after));
        let call_site = cache.get_resolved_call_site(CallSiteIndex(0)).unwrap();
        assert_eq!(call_site.read(&heap).unwrap().name(), "run");
        assert_eq!(cache.location().read(&heap).unwrap().as_str(), "main.json");
    }
}
