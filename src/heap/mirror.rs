//! Managed objects the resolution caches point at.
//!
//! These are deliberately leaf objects: none of them holds a reference to
//! another managed object, so the only edges the collector has to follow are
//! roots.
use enum_dispatch::enum_dispatch;
use std::mem::size_of;

pub const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";
pub const CLASS_DESCRIPTOR: &str = "Ljava/lang/Class;";
pub const METHOD_TYPE_DESCRIPTOR: &str = "Ljava/lang/invoke/MethodType;";
pub const CALL_SITE_DESCRIPTOR: &str = "Ljava/lang/invoke/CallSite;";

#[enum_dispatch]
pub trait ManagedObject {
    /// Descriptor of the object's class.
    fn class_descriptor(&self) -> &str;
    /// Approximate footprint in bytes, for heap statistics.
    fn size_of(&self) -> usize;
}

#[enum_dispatch(ManagedObject)]
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    MirrorString,
    MirrorClass,
    MirrorMethodType,
    MirrorCallSite,
}

/// Typed view of one [`Object`] variant.
pub trait Mirror: ManagedObject + Into<Object> + Sized {
    fn from_object(object: &Object) -> Option<&Self>;
}

macro_rules! impl_mirror {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Mirror for $ty {
                fn from_object(object: &Object) -> Option<&Self> {
                    match object {
                        Object::$ty(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_mirror!(MirrorString, MirrorClass, MirrorMethodType, MirrorCallSite);

/// An interned text constant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorString {
    value: Box<str>,
}

impl MirrorString {
    pub fn new(value: impl Into<Box<str>>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl ManagedObject for MirrorString {
    fn class_descriptor(&self) -> &str {
        STRING_DESCRIPTOR
    }

    fn size_of(&self) -> usize {
        size_of::<Self>() + self.value.len()
    }
}

/// A loaded class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorClass {
    descriptor: Box<str>,
    /// Location of the image that defined the class; `None` for classes the
    /// runtime synthesizes (primitives, arrays).
    defining_image: Option<Box<str>>,
}

impl MirrorClass {
    pub fn new(descriptor: impl Into<Box<str>>, defining_image: Option<&str>) -> Self {
        Self {
            descriptor: descriptor.into(),
            defining_image: defining_image.map(Into::into),
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn descriptor_equals(&self, descriptor: &str) -> bool {
        *self.descriptor == *descriptor
    }

    pub fn defining_image(&self) -> Option<&str> {
        self.defining_image.as_deref()
    }

    pub fn is_primitive(&self) -> bool {
        is_primitive_descriptor(&self.descriptor)
    }

    pub fn is_array(&self) -> bool {
        self.descriptor.starts_with('[')
    }
}

impl ManagedObject for MirrorClass {
    fn class_descriptor(&self) -> &str {
        CLASS_DESCRIPTOR
    }

    fn size_of(&self) -> usize {
        size_of::<Self>() + self.descriptor.len()
    }
}

pub fn is_primitive_descriptor(descriptor: &str) -> bool {
    matches!(
        descriptor,
        "Z" | "B" | "C" | "S" | "I" | "J" | "F" | "D" | "V"
    )
}

/// A resolved call-target signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorMethodType {
    return_type: Box<str>,
    parameter_types: Vec<Box<str>>,
}

impl MirrorMethodType {
    pub fn new(return_type: &str, parameter_types: &[&str]) -> Self {
        Self {
            return_type: return_type.into(),
            parameter_types: parameter_types.iter().map(|&p| p.into()).collect(),
        }
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn parameter_types(&self) -> impl Iterator<Item = &str> {
        self.parameter_types.iter().map(AsRef::as_ref)
    }

    /// Signature in descriptor form, e.g. `(ILjava/lang/String;)V`.
    pub fn signature(&self) -> String {
        let mut signature = String::from("(");
        for parameter in &self.parameter_types {
            signature.push_str(parameter);
        }
        signature.push(')');
        signature.push_str(&self.return_type);
        signature
    }
}

impl ManagedObject for MirrorMethodType {
    fn class_descriptor(&self) -> &str {
        METHOD_TYPE_DESCRIPTOR
    }

    fn size_of(&self) -> usize {
        size_of::<Self>()
            + self.return_type.len()
            + self.parameter_types.iter().map(|p| p.len()).sum::<usize>()
    }
}

/// A dynamically bound call site, produced by running its bootstrap method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorCallSite {
    name: Box<str>,
    target: Box<str>,
    /// Runtime thread that ran the bootstrap producing this candidate.
    bootstrap_thread: u64,
}

impl MirrorCallSite {
    pub fn new(name: impl Into<Box<str>>, target: impl Into<Box<str>>, bootstrap_thread: u64) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            bootstrap_thread,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn bootstrap_thread(&self) -> u64 {
        self.bootstrap_thread
    }
}

impl ManagedObject for MirrorCallSite {
    fn class_descriptor(&self) -> &str {
        CALL_SITE_DESCRIPTOR
    }

    fn size_of(&self) -> usize {
        size_of::<Self>() + self.name.len() + self.target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_matches_variant() {
        let object: Object = MirrorString::new("hello").into();
        assert_eq!(object.class_descriptor(), STRING_DESCRIPTOR);
        assert_eq!(
            MirrorString::from_object(&object).map(MirrorString::as_str),
            Some("hello")
        );
        assert!(MirrorClass::from_object(&object).is_none());
    }

    #[test]
    fn test_class_kinds() {
        assert!(MirrorClass::new("I", None).is_primitive());
        assert!(MirrorClass::new("[I", None).is_array());
        let class = MirrorClass::new("LFoo;", Some("foo.dex"));
        assert!(!class.is_primitive());
        assert!(class.descriptor_equals("LFoo;"));
        assert_eq!(class.defining_image(), Some("foo.dex"));
    }

    #[test]
    fn test_method_type_signature() {
        let method_type = MirrorMethodType::new("V", &["I", "Ljava/lang/String;"]);
        assert_eq!(method_type.signature(), "(ILjava/lang/String;)V");
        assert_eq!(method_type.parameter_types().count(), 2);
    }
}
