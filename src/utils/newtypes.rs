//! Index types for the id tables of a binary image.
//!
//! Each table of an image (strings, types, protos, fields, methods, call sites)
//! has its own index space, and mixing them up is a classic source of
//! "resolved the wrong thing" bugs, so every space gets its own newtype.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

macro_rules! dex_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                $name(index)
            }
        }

        impl From<$name> for u32 {
            fn from(index: $name) -> Self {
                index.0
            }
        }

        impl $name {
            pub const fn new(index: u32) -> Self {
                $name(index)
            }

            pub const fn as_u32(self) -> u32 {
                self.0
            }

            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

dex_index!(
    /// Index into the string id table.
    StringIndex
);
dex_index!(
    /// Index into the type id table.
    TypeIndex
);
dex_index!(
    /// Index into the prototype (method type) id table.
    ProtoIndex
);
dex_index!(
    /// Index into the field id table.
    FieldIndex
);
dex_index!(
    /// Index into the method id table.
    MethodIndex
);
dex_index!(
    /// Index into the call site id table.
    CallSiteIndex
);
