use super::{CallSiteId, DexFile, DexFileContents, FieldId, MethodId, ProtoId};
use crate::{
    error::ImageError,
    utils::{CallSiteIndex, FieldIndex, MethodIndex, ProtoIndex, StringIndex, TypeIndex},
};
use std::collections::HashMap;

/// Assembles an image table by table, deduplicating strings, types and protos.
#[derive(Debug, Default)]
pub struct DexFileBuilder {
    contents: DexFileContents,
    strings: HashMap<String, StringIndex>,
    types: HashMap<String, TypeIndex>,
    protos: HashMap<(TypeIndex, Vec<TypeIndex>), ProtoIndex>,
}

impl DexFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&mut self, value: &str) -> StringIndex {
        if let Some(&index) = self.strings.get(value) {
            return index;
        }
        let index = StringIndex(self.contents.strings.len() as u32);
        self.contents.strings.push(value.to_string());
        self.strings.insert(value.to_string(), index);
        index
    }

    pub fn type_id(&mut self, descriptor: &str) -> TypeIndex {
        if let Some(&index) = self.types.get(descriptor) {
            return index;
        }
        let descriptor_index = self.string(descriptor);
        let index = TypeIndex(self.contents.types.len() as u32);
        self.contents.types.push(descriptor_index);
        self.types.insert(descriptor.to_string(), index);
        index
    }

    pub fn proto(&mut self, return_type: &str, parameters: &[&str]) -> ProtoIndex {
        let return_type = self.type_id(return_type);
        let parameters: Vec<_> = parameters.iter().map(|p| self.type_id(p)).collect();
        let key = (return_type, parameters);
        if let Some(&index) = self.protos.get(&key) {
            return index;
        }
        let index = ProtoIndex(self.contents.protos.len() as u32);
        self.contents.protos.push(ProtoId {
            return_type,
            parameters: key.1.clone(),
        });
        self.protos.insert(key, index);
        index
    }

    /// Declare `descriptor` as defined by this image.
    pub fn class_def(&mut self, descriptor: &str) -> TypeIndex {
        let index = self.type_id(descriptor);
        if !self.contents.class_defs.contains(&index) {
            self.contents.class_defs.push(index);
        }
        index
    }

    pub fn field(&mut self, class: &str, name: &str, type_descriptor: &str) -> FieldIndex {
        let field = FieldId {
            class: self.type_id(class),
            type_: self.type_id(type_descriptor),
            name: self.string(name),
        };
        let index = FieldIndex(self.contents.fields.len() as u32);
        self.contents.fields.push(field);
        index
    }

    pub fn method(
        &mut self,
        class: &str,
        name: &str,
        return_type: &str,
        parameters: &[&str],
    ) -> MethodIndex {
        let method = MethodId {
            class: self.type_id(class),
            proto: self.proto(return_type, parameters),
            name: self.string(name),
        };
        let index = MethodIndex(self.contents.methods.len() as u32);
        self.contents.methods.push(method);
        index
    }

    pub fn call_site(
        &mut self,
        bootstrap: MethodIndex,
        name: &str,
        return_type: &str,
        parameters: &[&str],
    ) -> CallSiteIndex {
        let call_site = CallSiteId {
            bootstrap,
            name: self.string(name),
            proto: self.proto(return_type, parameters),
        };
        let index = CallSiteIndex(self.contents.call_sites.len() as u32);
        self.contents.call_sites.push(call_site);
        index
    }

    pub fn contents(&self) -> &DexFileContents {
        &self.contents
    }

    pub fn build(self, location: impl Into<String>) -> Result<DexFile, ImageError> {
        DexFile::from_contents(location, self.contents)
    }
}
