//! Layout of a cache's arrays inside a written image.
//!
//! An image stores all arrays of one cache back to back in a single block, in
//! the order types, methods, strings, fields, method types, call sites. Pair
//! caches use 8-byte elements whatever the target, method and field arrays use
//! the target's pointer width, and call sites use 4-byte compressed roots.
use super::{METHOD_TYPE_CACHE_SIZE, STRING_CACHE_SIZE, TYPE_CACHE_SIZE};
use crate::{
    dex::DexFile,
    utils::{
        round_up, CallSiteIndex, FieldIndex, MethodIndex, PointerSize, ProtoIndex, StringIndex,
        TypeIndex,
    },
};
use serde::Serialize;
use std::mem::{align_of, size_of};

const PAIR_SIZE: usize = size_of::<u64>();
const PAIR_ALIGNMENT: usize = align_of::<u64>();
const ROOT_SIZE: usize = size_of::<u32>();
const ROOT_ALIGNMENT: usize = align_of::<u32>();

/// Declared entry counts of an image's id tables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArrayCounts {
    pub types: u32,
    pub methods: u32,
    pub strings: u32,
    pub fields: u32,
    pub method_types: u32,
    pub call_sites: u32,
}

impl ArrayCounts {
    pub fn of(dex_file: &DexFile) -> Self {
        Self {
            types: dex_file.num_type_ids(),
            methods: dex_file.num_method_ids(),
            strings: dex_file.num_string_ids(),
            fields: dex_file.num_field_ids(),
            method_types: dex_file.num_proto_ids(),
            call_sites: dex_file.num_call_site_ids(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DexCacheArraysLayout {
    pointer_size: PointerSize,
    types_offset: usize,
    methods_offset: usize,
    strings_offset: usize,
    fields_offset: usize,
    method_types_offset: usize,
    call_sites_offset: usize,
    size: usize,
}

impl DexCacheArraysLayout {
    pub fn new(pointer_size: PointerSize, dex_file: &DexFile) -> Self {
        Self::from_counts(pointer_size, ArrayCounts::of(dex_file))
    }

    pub fn from_counts(pointer_size: PointerSize, counts: ArrayCounts) -> Self {
        let ptr = pointer_size.bytes();
        let types_offset = 0;
        let methods_offset = types_offset
            + round_up(pair_array_size(counts.types, TYPE_CACHE_SIZE), ptr);
        let strings_offset = methods_offset
            + round_up(counts.methods as usize * ptr, PAIR_ALIGNMENT);
        let fields_offset = strings_offset
            + round_up(pair_array_size(counts.strings, STRING_CACHE_SIZE), ptr);
        let method_types_offset = fields_offset
            + round_up(counts.fields as usize * ptr, PAIR_ALIGNMENT);
        let call_sites_offset = method_types_offset
            + round_up(
                pair_array_size(counts.method_types, METHOD_TYPE_CACHE_SIZE),
                ROOT_ALIGNMENT,
            );
        let size = call_sites_offset + counts.call_sites as usize * ROOT_SIZE;
        Self {
            pointer_size,
            types_offset,
            methods_offset,
            strings_offset,
            fields_offset,
            method_types_offset,
            call_sites_offset,
            size,
        }
    }

    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    /// Total size of the block.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment the block itself needs.
    pub fn alignment(&self) -> usize {
        PAIR_ALIGNMENT
            .max(self.pointer_size.bytes())
            .max(ROOT_ALIGNMENT)
    }

    pub fn types_offset(&self) -> usize {
        self.types_offset
    }

    pub fn methods_offset(&self) -> usize {
        self.methods_offset
    }

    pub fn strings_offset(&self) -> usize {
        self.strings_offset
    }

    pub fn fields_offset(&self) -> usize {
        self.fields_offset
    }

    pub fn method_types_offset(&self) -> usize {
        self.method_types_offset
    }

    pub fn call_sites_offset(&self) -> usize {
        self.call_sites_offset
    }

    pub fn type_offset(&self, index: TypeIndex) -> usize {
        self.types_offset + (index.as_usize() % TYPE_CACHE_SIZE) * PAIR_SIZE
    }

    pub fn method_offset(&self, index: MethodIndex) -> usize {
        self.methods_offset + index.as_usize() * self.pointer_size.bytes()
    }

    pub fn string_offset(&self, index: StringIndex) -> usize {
        self.strings_offset + (index.as_usize() % STRING_CACHE_SIZE) * PAIR_SIZE
    }

    pub fn field_offset(&self, index: FieldIndex) -> usize {
        self.fields_offset + index.as_usize() * self.pointer_size.bytes()
    }

    pub fn method_type_offset(&self, index: ProtoIndex) -> usize {
        self.method_types_offset + (index.as_usize() % METHOD_TYPE_CACHE_SIZE) * PAIR_SIZE
    }

    pub fn call_site_offset(&self, index: CallSiteIndex) -> usize {
        self.call_sites_offset + index.as_usize() * ROOT_SIZE
    }
}

fn pair_array_size(count: u32, capacity: usize) -> usize {
    (count as usize).min(capacity) * PAIR_SIZE
}
