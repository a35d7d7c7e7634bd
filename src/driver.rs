//! Drives a registered image through concurrent resolution and checks what
//! the cache ends up holding.
use crate::{
    cache::{CacheStats, ResolutionCache},
    dex::DexFile,
    error::RuntimeError,
    heap::{CollectionStats, GcRoot, Heap, MirrorCallSite},
    linker::{ClassLinker, LinearAlloc, RollbackStats, Transaction},
    utils::{
        CallSiteIndex, FieldIndex, MethodIndex, PointerSize, ProtoIndex, StringIndex, TypeIndex,
    },
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use std::{sync::Arc, thread};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub threads: usize,
    pub rounds: usize,
    pub transaction: bool,
    pub compact: bool,
    pub pointer_size: PointerSize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            rounds: 2,
            transaction: false,
            compact: false,
            pointer_size: PointerSize::native(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub location: String,
    pub resolved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocated: Option<usize>,
    pub stats: CacheStats,
}

#[derive(Copy, Clone, Debug)]
enum Entry {
    String(StringIndex),
    Type(TypeIndex),
    MethodType(ProtoIndex),
    Method(MethodIndex),
    Field(FieldIndex),
    CallSite(CallSiteIndex),
}

fn entries(dex_file: &DexFile) -> Vec<Entry> {
    let mut entries = Vec::new();
    entries.extend((0..dex_file.num_string_ids()).map(|i| Entry::String(StringIndex(i))));
    entries.extend((0..dex_file.num_type_ids()).map(|i| Entry::Type(TypeIndex(i))));
    entries.extend((0..dex_file.num_proto_ids()).map(|i| Entry::MethodType(ProtoIndex(i))));
    entries.extend((0..dex_file.num_method_ids()).map(|i| Entry::Method(MethodIndex(i))));
    entries.extend((0..dex_file.num_field_ids()).map(|i| Entry::Field(FieldIndex(i))));
    entries.extend((0..dex_file.num_call_site_ids()).map(|i| Entry::CallSite(CallSiteIndex(i))));
    entries
}

/// Resolve every entry in a thread-specific shuffled order. Returns the call
/// site this thread observed for each call-site index.
fn resolve_all<'a>(
    linker: &ClassLinker<'a>,
    cache: &ResolutionCache<'a>,
    entries: &[Entry],
    seed: u64,
    rounds: usize,
) -> Result<Vec<GcRoot<MirrorCallSite>>, RuntimeError> {
    let mut order = entries.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut call_sites = vec![GcRoot::null(); cache.dex_file().num_call_site_ids() as usize];
    for _ in 0..rounds {
        order.shuffle(&mut rng);
        for &entry in &order {
            match entry {
                Entry::String(i) => {
                    linker.resolve_string(cache, i);
                }
                Entry::Type(i) => {
                    linker.resolve_type(cache, i)?;
                }
                Entry::MethodType(i) => {
                    linker.resolve_method_type(cache, i)?;
                }
                Entry::Method(i) => {
                    linker.resolve_method(cache, i)?;
                }
                Entry::Field(i) => {
                    linker.resolve_field(cache, i)?;
                }
                Entry::CallSite(i) => {
                    let call_site = linker.resolve_call_site(cache, i)?;
                    let seen = &mut call_sites[i.as_usize()];
                    if !seen.is_null() && *seen != call_site {
                        return Err(RuntimeError::Verification(format!(
                            "call site {i} changed between rounds"
                        )));
                    }
                    *seen = call_site;
                }
            }
        }
    }
    Ok(call_sites)
}

/// Check that everything the cache currently holds agrees with the image.
fn verify(heap: &Heap, cache: &ResolutionCache<'_>) -> Result<(), RuntimeError> {
    let dex_file = cache.dex_file();
    let fail = |what: String| Err(RuntimeError::Verification(what));
    for i in (0..dex_file.num_string_ids()).map(StringIndex) {
        if let Some(root) = cache.get_resolved_string(i) {
            match root.read(heap) {
                Some(s) if s.as_str() == dex_file.string_data(i) => {}
                _ => return fail(format!("string {i} does not hold {:?}", dex_file.string_data(i))),
            }
        }
    }
    for i in (0..dex_file.num_type_ids()).map(TypeIndex) {
        if let Some(root) = cache.get_resolved_type(i) {
            let descriptor = dex_file.string_by_type_idx(i);
            match root.read(heap) {
                Some(c) if c.descriptor_equals(descriptor) => {}
                _ => return fail(format!("type {i} is not {descriptor}")),
            }
        }
    }
    for i in (0..dex_file.num_proto_ids()).map(ProtoIndex) {
        if let Some(root) = cache.get_resolved_method_type(i) {
            let signature = dex_file.proto_signature(i);
            match root.read(heap) {
                Some(m) if m.signature() == signature => {}
                _ => return fail(format!("method type {i} is not {signature}")),
            }
        }
    }
    for i in (0..dex_file.num_call_site_ids()).map(CallSiteIndex) {
        if let Some(root) = cache.get_resolved_call_site(i) {
            if root.read(heap).is_none() {
                return fail(format!("call site {i} is dead"));
            }
        }
    }
    Ok(())
}

/// Resolve every string under a transaction, roll it back and check the
/// cache forgot all of them.
fn roll_back_strings<'a>(
    linker: &ClassLinker<'a>,
    cache: &Arc<ResolutionCache<'a>>,
) -> Result<RollbackStats, RuntimeError> {
    let transaction = Transaction::new();
    for i in (0..cache.dex_file().num_string_ids()).map(StringIndex) {
        linker.resolve_string_in_transaction(cache, i, &transaction);
    }
    let stats = transaction.rollback(linker);
    if let Some(i) = (0..cache.dex_file().num_string_ids())
        .map(StringIndex)
        .find(|&i| cache.get_resolved_string(i).is_some())
    {
        return Err(RuntimeError::Verification(format!(
            "string {i} survived a rollback"
        )));
    }
    Ok(stats)
}

/// Register `dex_file` with a fresh runtime and exercise its cache.
pub fn run_image(dex_file: &DexFile, options: &RunOptions) -> Result<RunReport, RuntimeError> {
    let heap = Heap::new();
    let linear_alloc = LinearAlloc::new();
    let linker = ClassLinker::new(&heap, &linear_alloc, options.pointer_size);
    let cache = linker.register_dex_file(dex_file)?;
    linker.fixup_dex_caches();
    debug!(
        size = cache.arrays_layout().size(),
        pointer_size = %options.pointer_size,
        "prepared cache"
    );

    let rolled_back = if options.transaction {
        let stats = roll_back_strings(&linker, &cache)?;
        let CollectionStats { marked, freed, .. } = linker.collect_garbage();
        info!(
            cleared = stats.cleared,
            uninterned = stats.uninterned,
            marked,
            freed,
            "rolled back strings"
        );
        Some(stats.cleared)
    } else {
        None
    };

    let entries = entries(dex_file);
    let threads = options.threads.max(1);
    let views = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let (linker, cache, entries) = (&linker, &cache, &entries);
                s.spawn(move || resolve_all(linker, cache, entries, t as u64, options.rounds))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect::<Result<Vec<_>, _>>()
    })?;
    if let Some(i) = (0..dex_file.num_call_site_ids() as usize)
        .find(|&i| views.iter().any(|v| v[i] != views[0][i]))
    {
        return Err(RuntimeError::Verification(format!(
            "threads disagree on call site {i}"
        )));
    }
    verify(&heap, &cache)?;
    info!(
        location = dex_file.location(),
        entries = entries.len(),
        threads,
        rounds = options.rounds,
        "resolved image"
    );

    let relocated = if options.compact {
        let CollectionStats { moved, freed, .. } = linker.compact_heap();
        info!(moved, freed, "compacted heap");
        verify(&heap, &cache)?;
        Some(moved)
    } else {
        None
    };

    Ok(RunReport {
        location: dex_file.location().to_string(),
        resolved: entries.len(),
        rolled_back,
        relocated,
        stats: linker.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dex::DexFileBuilder, error::ResolutionError};

    fn image() -> DexFile {
        let mut b = DexFileBuilder::new();
        b.class_def("LMain;");
        b.string("greeting");
        let main = b.method("LMain;", "main", "V", &["[Ljava/lang/String;"]);
        b.method("LMain;", "count", "I", &[]);
        b.field("LMain;", "total", "J");
        b.call_site(main, "apply", "V", &["I"]);
        b.call_site(main, "accept", "Z", &[]);
        b.build("driver.json").unwrap()
    }

    #[test]
    fn test_run_image_resolves_everything() {
        let file = image();
        let options = RunOptions {
            threads: 4,
            rounds: 3,
            transaction: true,
            compact: true,
            ..RunOptions::default()
        };
        let report = run_image(&file, &options).unwrap();
        assert_eq!(report.location, "driver.json");
        assert_eq!(report.stats.call_sites.size, 2);
        assert_eq!(report.stats.methods.size, 2);
        assert_eq!(report.stats.fields.size, 1);
        assert!(report.rolled_back.unwrap() > 0);
        assert!(report.relocated.unwrap() > 0);
    }

    #[test]
    fn test_run_image_reports_missing_class() {
        let mut b = DexFileBuilder::new();
        b.field("LGone;", "x", "I");
        let file = b.build("missing.json").unwrap();
        let err = run_image(&file, &RunOptions::default()).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Resolution(ResolutionError::NoClassDefFound("LGone;".into()))
        );
    }
}
