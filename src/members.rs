//! Native method and field records.
//!
//! These are not managed objects: the class linker allocates them in a
//! [`LinearAlloc`](crate::linker::LinearAlloc) and the caches store plain
//! references to them.
use crate::utils::{FieldIndex, MethodIndex};
use std::fmt::{self, Debug, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// A method declared by an image.
    Declared(MethodIndex),
    /// A stub owned by the runtime, such as the resolution trampoline.
    Runtime,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodDescription {
    pub declaring_class: Box<str>,
    pub name: Box<str>,
    pub signature: Box<str>,
    pub kind: MethodKind,
}

impl MethodDescription {
    pub fn declared(
        declaring_class: &str,
        name: &str,
        signature: &str,
        index: MethodIndex,
    ) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            signature: signature.into(),
            kind: MethodKind::Declared(index),
        }
    }

    pub fn runtime(name: &str) -> Self {
        Self {
            declaring_class: "".into(),
            name: name.into(),
            signature: "".into(),
            kind: MethodKind::Runtime,
        }
    }

    pub fn is_runtime_method(&self) -> bool {
        self.kind == MethodKind::Runtime
    }

    /// Key under which the class linker finds this method.
    pub fn key(&self) -> MemberKey {
        MemberKey::new(&self.declaring_class, &self.name, &self.signature)
    }
}

impl Debug for MethodDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            MethodKind::Runtime => write!(f, "<runtime {}>", self.name),
            MethodKind::Declared(_) => write!(
                f,
                "{}->{}{}",
                self.declaring_class, self.name, self.signature
            ),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldDescription {
    pub declaring_class: Box<str>,
    pub name: Box<str>,
    pub type_descriptor: Box<str>,
    pub index: FieldIndex,
}

impl FieldDescription {
    pub fn new(declaring_class: &str, name: &str, type_descriptor: &str, index: FieldIndex) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            type_descriptor: type_descriptor.into(),
            index,
        }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::new(&self.declaring_class, &self.name, &self.type_descriptor)
    }
}

impl Debug for FieldDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}:{}",
            self.declaring_class, self.name, self.type_descriptor
        )
    }
}

/// Class descriptor, member name and signature (or field type) of a member.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub class: Box<str>,
    pub name: Box<str>,
    pub signature: Box<str>,
}

impl MemberKey {
    pub fn new(class: &str, name: &str, signature: &str) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }
}
