//! In-memory binary images.
//!
//! An image is a set of id tables that refer to each other by index: type ids
//! name a descriptor string, protos name their return and parameter types,
//! fields and methods name their declaring class, and so on. On disk an image
//! is a JSON document with one array per table; the raw bytes are kept so the
//! runtime can hand them back out unchanged.
use crate::{
    error::ImageError,
    utils::{CallSiteIndex, FieldIndex, MethodIndex, ProtoIndex, StringIndex, TypeIndex},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Formatter},
    path::Path,
};

mod builder;

pub use builder::DexFileBuilder;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoId {
    pub return_type: TypeIndex,
    #[serde(default)]
    pub parameters: Vec<TypeIndex>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldId {
    pub class: TypeIndex,
    #[serde(rename = "type")]
    pub type_: TypeIndex,
    pub name: StringIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodId {
    pub class: TypeIndex,
    pub proto: ProtoIndex,
    pub name: StringIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteId {
    pub bootstrap: MethodIndex,
    pub name: StringIndex,
    pub proto: ProtoIndex,
}

/// The id tables of an image, as serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DexFileContents {
    #[serde(default)]
    pub strings: Vec<String>,
    /// Descriptor string of each type.
    #[serde(default)]
    pub types: Vec<StringIndex>,
    #[serde(default)]
    pub protos: Vec<ProtoId>,
    #[serde(default)]
    pub fields: Vec<FieldId>,
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub call_sites: Vec<CallSiteId>,
    /// Types this image defines.
    #[serde(default)]
    pub class_defs: Vec<TypeIndex>,
}

pub struct DexFile {
    location: String,
    contents: DexFileContents,
    data: Vec<u8>,
}

impl Debug for DexFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexFile")
            .field("location", &self.location)
            .field("strings", &self.contents.strings.len())
            .field("types", &self.contents.types.len())
            .field("methods", &self.contents.methods.len())
            .finish_non_exhaustive()
    }
}

impl DexFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_bytes(path.display().to_string(), data)
    }

    pub fn from_bytes(location: impl Into<String>, data: Vec<u8>) -> Result<Self, ImageError> {
        let location = location.into();
        let contents = serde_json::from_slice(&data).map_err(|e| ImageError::InvalidFormat {
            location: location.clone(),
            message: e.to_string(),
        })?;
        let file = Self {
            location,
            contents,
            data,
        };
        file.validate()?;
        Ok(file)
    }

    pub fn from_contents(
        location: impl Into<String>,
        contents: DexFileContents,
    ) -> Result<Self, ImageError> {
        let location = location.into();
        let data = serde_json::to_vec(&contents).map_err(|e| ImageError::InvalidFormat {
            location: location.clone(),
            message: e.to_string(),
        })?;
        let file = Self {
            location,
            contents,
            data,
        };
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ImageError> {
        let c = &self.contents;
        let tables = [
            ("strings", c.strings.len()),
            ("types", c.types.len()),
            ("protos", c.protos.len()),
            ("fields", c.fields.len()),
            ("methods", c.methods.len()),
            ("call_sites", c.call_sites.len()),
        ];
        for (table, count) in tables {
            if u32::try_from(count).is_err() {
                return Err(ImageError::TableTooLarge {
                    location: self.location.clone(),
                    table,
                    count,
                });
            }
        }

        let check = |table: &'static str, entry: usize, target: &'static str, index: u32, count: u32| {
            if index < count {
                Ok(())
            } else {
                Err(ImageError::IndexOutOfBounds {
                    location: self.location.clone(),
                    table,
                    entry,
                    target,
                    index,
                    count,
                })
            }
        };
        let (strings, types, protos, methods) = (
            self.num_string_ids(),
            self.num_type_ids(),
            self.num_proto_ids(),
            self.num_method_ids(),
        );

        for (i, descriptor) in c.types.iter().enumerate() {
            check("types", i, "string", descriptor.0, strings)?;
        }
        for (i, proto) in c.protos.iter().enumerate() {
            check("protos", i, "type", proto.return_type.0, types)?;
            for parameter in &proto.parameters {
                check("protos", i, "type", parameter.0, types)?;
            }
        }
        for (i, field) in c.fields.iter().enumerate() {
            check("fields", i, "type", field.class.0, types)?;
            check("fields", i, "type", field.type_.0, types)?;
            check("fields", i, "string", field.name.0, strings)?;
        }
        for (i, method) in c.methods.iter().enumerate() {
            check("methods", i, "type", method.class.0, types)?;
            check("methods", i, "proto", method.proto.0, protos)?;
            check("methods", i, "string", method.name.0, strings)?;
        }
        for (i, call_site) in c.call_sites.iter().enumerate() {
            check("call_sites", i, "method", call_site.bootstrap.0, methods)?;
            check("call_sites", i, "string", call_site.name.0, strings)?;
            check("call_sites", i, "proto", call_site.proto.0, protos)?;
        }
        for (i, class_def) in c.class_defs.iter().enumerate() {
            check("class_defs", i, "type", class_def.0, types)?;
        }
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn contents(&self) -> &DexFileContents {
        &self.contents
    }

    /// The image's raw bytes.
    pub fn begin(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    // counts are validated to fit in u32 on load
    pub fn num_string_ids(&self) -> u32 {
        self.contents.strings.len() as u32
    }

    pub fn num_type_ids(&self) -> u32 {
        self.contents.types.len() as u32
    }

    pub fn num_proto_ids(&self) -> u32 {
        self.contents.protos.len() as u32
    }

    pub fn num_field_ids(&self) -> u32 {
        self.contents.fields.len() as u32
    }

    pub fn num_method_ids(&self) -> u32 {
        self.contents.methods.len() as u32
    }

    pub fn num_call_site_ids(&self) -> u32 {
        self.contents.call_sites.len() as u32
    }

    pub fn string_data(&self, index: StringIndex) -> &str {
        &self.contents.strings[index.as_usize()]
    }

    pub fn string_by_type_idx(&self, index: TypeIndex) -> &str {
        self.string_data(self.contents.types[index.as_usize()])
    }

    pub fn proto_id(&self, index: ProtoIndex) -> &ProtoId {
        &self.contents.protos[index.as_usize()]
    }

    pub fn field_id(&self, index: FieldIndex) -> &FieldId {
        &self.contents.fields[index.as_usize()]
    }

    pub fn method_id(&self, index: MethodIndex) -> &MethodId {
        &self.contents.methods[index.as_usize()]
    }

    pub fn call_site_id(&self, index: CallSiteIndex) -> &CallSiteId {
        &self.contents.call_sites[index.as_usize()]
    }

    /// Signature of a proto in descriptor form, e.g. `(I)V`.
    pub fn proto_signature(&self, index: ProtoIndex) -> String {
        let proto = self.proto_id(index);
        let mut signature = String::from("(");
        for &parameter in &proto.parameters {
            signature.push_str(self.string_by_type_idx(parameter));
        }
        signature.push(')');
        signature.push_str(self.string_by_type_idx(proto.return_type));
        signature
    }

    pub fn class_defs(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.contents.class_defs.iter().copied()
    }

    /// Find the type id this image defines under `descriptor`.
    pub fn find_class_def(&self, descriptor: &str) -> Option<TypeIndex> {
        self.class_defs()
            .find(|&t| self.string_by_type_idx(t) == descriptor)
    }

    /// Method ids declared on `class`.
    pub fn methods_of(&self, class: TypeIndex) -> impl Iterator<Item = MethodIndex> + '_ {
        self.contents
            .methods
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.class == class)
            .map(|(i, _)| MethodIndex(i as u32))
    }

    /// Field ids declared on `class`.
    pub fn fields_of(&self, class: TypeIndex) -> impl Iterator<Item = FieldIndex> + '_ {
        self.contents
            .fields
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.class == class)
            .map(|(i, _)| FieldIndex(i as u32))
    }
}
