//! Utility types and functions used throughout the codebase.
use clap::ValueEnum;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

pub mod newtypes;
pub mod sync;

pub use newtypes::{CallSiteIndex, FieldIndex, MethodIndex, ProtoIndex, StringIndex, TypeIndex};

/// Width of a native pointer in an image, which is not necessarily the width
/// of the pointers in the running process (an image may be written for another
/// target).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, ValueEnum)]
pub enum PointerSize {
    #[serde(rename = "32")]
    #[value(name = "32")]
    K32 = 4,
    #[serde(rename = "64")]
    #[value(name = "64")]
    K64 = 8,
}

impl PointerSize {
    /// The pointer size of the running process.
    pub const fn native() -> Self {
        if std::mem::size_of::<usize>() == 8 {
            PointerSize::K64
        } else {
            PointerSize::K32
        }
    }

    pub const fn bytes(self) -> usize {
        self as usize
    }
}

impl Display for PointerSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bytes() * 8)
    }
}

/// Round `value` up to a multiple of `alignment`, which must be a power of two.
pub const fn round_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
