use dex_cache::{
    cache::{StringCache, STRING_CACHE_SIZE},
    dex::{DexFile, DexFileBuilder},
    heap::{GcRoot, Heap, MirrorCallSite, MirrorString, ObjectRef, RootInfo, RootKind},
    linker::{ClassLinker, LinearAlloc, Transaction},
    utils::{CallSiteIndex, PointerSize, StringIndex},
    ResolutionCache,
};
use rand::{seq::SliceRandom, thread_rng};
use std::{sync::Barrier, thread};

const C: u32 = STRING_CACHE_SIZE as u32;

fn strings(heap: &Heap, values: &[&str]) -> Vec<GcRoot<MirrorString>> {
    values.iter().map(|&v| heap.alloc_root(MirrorString::new(v))).collect()
}

#[test]
fn test_readers_never_see_a_torn_slot() {
    let heap = Heap::new();
    let cache = StringCache::new(4 * C);
    let objects = strings(&heap, &["k", "k+C", "k+2C", "k+3C"]);
    let indices: Vec<u32> = (0..4).map(|m| 7 + m * C).collect();

    thread::scope(|s| {
        for w in 0..4 {
            let (cache, objects, indices) = (&cache, &objects, &indices);
            s.spawn(move || {
                for round in 0..2000 {
                    let i = (w + round) % 4;
                    cache.insert(indices[i], objects[i]);
                    if round % 7 == 0 {
                        cache.clear_if_matching(indices[i]);
                    }
                }
            });
        }
        for _ in 0..4 {
            let (cache, objects, indices) = (&cache, &objects, &indices);
            s.spawn(move || {
                for _ in 0..2000 {
                    for (i, &index) in indices.iter().enumerate() {
                        if let Some(found) = cache.lookup(index) {
                            assert_eq!(found, objects[i], "slot returned another index's object");
                        }
                    }
                }
            });
        }
    });
}

#[test]
fn test_aliasing_indices_share_a_slot() {
    let heap = Heap::new();
    let cache = StringCache::new(2 * C);
    let ab = strings(&heap, &["A", "B", "Z"]);

    cache.insert(5, ab[0]);
    assert_eq!(cache.lookup(5), Some(ab[0]));
    cache.insert(5 + C, ab[1]);
    assert_eq!(cache.lookup(5), None);
    assert_eq!(cache.lookup(5 + C), Some(ab[1]));

    let fresh = StringCache::new(2 * C);
    assert_eq!(fresh.lookup(0), None);
    fresh.insert(0, ab[2]);
    assert_eq!(fresh.lookup(0), Some(ab[2]));
    assert_eq!(fresh.lookup(C), None);
}

#[test]
fn test_root_visits_race_inserts_without_mixing_entries() {
    let heap = Heap::new();
    let cache = StringCache::new(2 * C);
    let objects = strings(&heap, &["a", "b", "a moved", "b moved"]);
    let (a, b, a2, b2) = (objects[0], objects[1], objects[2], objects[3]);
    let (k, alias) = (7, 7 + C);

    thread::scope(|s| {
        let cache = &cache;
        s.spawn(move || {
            for _ in 0..5000 {
                cache.insert(k, a);
                cache.insert(alias, b);
            }
        });
        s.spawn(move || {
            let mut mover = |r: &mut ObjectRef, info: RootInfo| {
                assert_eq!(info.kind, RootKind::String);
                if Some(*r) == a.reference() {
                    *r = a2.reference().unwrap();
                } else if Some(*r) == b.reference() {
                    *r = b2.reference().unwrap();
                }
            };
            for _ in 0..5000 {
                cache.visit_roots(&mut mover, RootKind::String);
            }
        });
        s.spawn(move || {
            for _ in 0..5000 {
                if let Some(found) = cache.lookup(k) {
                    assert!(found == a || found == a2, "index {k} returned {found:?}");
                }
                if let Some(found) = cache.lookup(alias) {
                    assert!(found == b || found == b2, "index {alias} returned {found:?}");
                }
            }
        });
    });

    let last = cache.lookup(alias).unwrap();
    assert!(last == b || last == b2);
    assert_eq!(cache.lookup(k), None);
}

#[test]
fn test_clear_matches_by_index_only() {
    let heap = Heap::new();
    let cache = StringCache::new(C);
    let v = strings(&heap, &["v1", "v2"]);

    cache.insert(9, v[0]);
    assert!(cache.clear_if_matching(9));
    assert_eq!(cache.lookup(9), None);

    // a clear recorded against v1 also removes a later v2 at the same index
    cache.insert(9, v[0]);
    cache.insert(9, v[1]);
    assert!(cache.clear_if_matching(9));
    assert_eq!(cache.lookup(9), None);
}

#[test]
fn test_slot_zero_never_aliases_its_sentinel() {
    let heap = Heap::new();
    let cache = StringCache::new(8 * C);
    let s = strings(&heap, &["zero"]);
    for m in 0..8 {
        assert_eq!(cache.lookup(m * C), None, "index {} hit an empty slot", m * C);
    }
    cache.insert(3 * C, s[0]);
    assert_eq!(cache.lookup(3 * C), Some(s[0]));
    assert_eq!(cache.lookup(0), None);
}

fn call_site_image() -> DexFile {
    let mut b = DexFileBuilder::new();
    b.class_def("LBoot;");
    let bootstrap = b.method("LBoot;", "bootstrap", "V", &[]);
    for i in 0..16 {
        b.call_site(bootstrap, &format!("site{i}"), "I", &["J"]);
    }
    b.build("sites.json").unwrap()
}

#[test]
fn test_call_site_binds_once_under_contention() {
    const THREADS: usize = 8;
    let heap = Heap::new();
    let alloc = LinearAlloc::new();
    let file = call_site_image();
    let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
    let cache = linker.register_dex_file(&file).unwrap();
    let barrier = Barrier::new(THREADS);

    let results: Vec<(GcRoot<MirrorCallSite>, GcRoot<MirrorCallSite>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let (heap, cache, barrier) = (&heap, &cache, &barrier);
                s.spawn(move || {
                    let candidate = heap.alloc_root(MirrorCallSite::new("site0", "bootstrap", t as u64));
                    barrier.wait();
                    (candidate, cache.set_resolved_call_site(CallSiteIndex(0), candidate))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winner = results[0].1;
    assert!(results.iter().all(|&(_, w)| w == winner));
    assert_eq!(results.iter().filter(|&&(c, _)| c == winner).count(), 1);
    assert_eq!(cache.get_resolved_call_site(CallSiteIndex(0)), Some(winner));
}

#[test]
fn test_concurrent_resolution_agrees_on_every_call_site() {
    let heap = Heap::new();
    let alloc = LinearAlloc::new();
    let file = call_site_image();
    let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
    let cache = linker.register_dex_file(&file).unwrap();
    linker.fixup_dex_caches();

    let views: Vec<Vec<GcRoot<MirrorCallSite>>> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (linker, cache) = (&linker, &cache);
                s.spawn(move || {
                    let mut order: Vec<u32> = (0..16).collect();
                    order.shuffle(&mut thread_rng());
                    let mut view = vec![GcRoot::null(); 16];
                    for i in order {
                        view[i as usize] = linker.resolve_call_site(cache, CallSiteIndex(i)).unwrap();
                    }
                    view
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(views.iter().all(|v| *v == views[0]));
    assert_eq!(cache.stats().call_sites.size, 16);
}

#[test]
fn test_compaction_keeps_resolved_entries() {
    let heap = Heap::new();
    let alloc = LinearAlloc::new();
    let mut b = DexFileBuilder::new();
    b.class_def("LMain;");
    let names: Vec<_> = (0..32).map(|i| b.string(&format!("s{i}"))).collect();
    let file = b.build("compact.json").unwrap();
    let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
    let cache = linker.register_dex_file(&file).unwrap();

    for &i in &names {
        linker.resolve_string(&cache, i);
    }
    let main = linker.find_class("LMain;").unwrap();
    heap.alloc(MirrorString::new("garbage"));

    let stats = linker.compact_heap();
    assert_eq!(stats.freed, 1);
    for (n, &i) in names.iter().enumerate() {
        let root = cache.get_resolved_string(i).unwrap();
        assert_eq!(root.read(&heap).unwrap().as_str(), format!("s{n}"));
    }
    let relocated = linker.class_table().lookup("LMain;").unwrap();
    assert_ne!(relocated, main);
    assert!(relocated.read(&heap).unwrap().descriptor_equals("LMain;"));
}

#[test]
fn test_rollback_forgets_transaction_strings() {
    let heap = Heap::new();
    let alloc = LinearAlloc::new();
    let mut b = DexFileBuilder::new();
    let kept = b.string("kept");
    let temp = b.string("temporary");
    let file = b.build("tx.json").unwrap();
    let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
    let cache = linker.register_dex_file(&file).unwrap();

    linker.resolve_string(&cache, kept);
    let transaction = Transaction::new();
    linker.resolve_string_in_transaction(&cache, temp, &transaction);
    assert_eq!(transaction.num_resolved_strings(), 1);
    let stats = transaction.rollback(&linker);

    assert_eq!(stats.cleared, 1);
    assert_eq!(stats.uninterned, 1);
    assert!(cache.get_resolved_string(temp).is_none());
    assert!(cache.get_resolved_string(kept).is_some());
    assert!(linker.intern_table().lookup("temporary").is_none());
    assert!(linker.intern_table().lookup("kept").is_some());
}

#[test]
fn test_offsets_address_the_live_arrays() {
    let heap = Heap::new();
    let alloc = LinearAlloc::new();
    let mut b = DexFileBuilder::new();
    let hello = b.string("hello");
    let file = b.build("offsets.json").unwrap();
    let linker = ClassLinker::new(&heap, &alloc, PointerSize::native());
    let cache = linker.register_dex_file(&file).unwrap();
    let offsets = ResolutionCache::offsets();

    let base = &*cache as *const ResolutionCache<'_> as *const u8;
    // SAFETY: the offsets name u32 length fields inside the live cache.
    let num_strings = unsafe { base.add(offsets.num_strings).cast::<u32>().read() };
    assert_eq!(num_strings as usize, cache.num_strings());
    let layout = cache.arrays_layout();
    assert_eq!(
        layout.string_offset(hello) - layout.strings_offset(),
        hello.0 as usize * 8
    );
    assert!(offsets.strings < offsets.resolved_types);
    assert_eq!(file.num_string_ids(), 1);
    assert_eq!(cache.get_resolved_string(StringIndex(0)), None);
}
