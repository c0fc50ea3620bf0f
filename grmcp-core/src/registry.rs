//! # Type Registry
//!
//! A long-lived, append-only store of Protobuf file descriptors shared by every component
//! that needs to resolve a type by name.
//!
//! The registry is passed around explicitly. Cloning a [`TypeRegistry`] shares the same
//! underlying store, so files registered through one handle are visible through all of them.
//!
//! Files are never removed or replaced: registering a file whose name is already known is a
//! no-op. Each registration links the new files against a copy of the current pool and swaps
//! the copy in only when linking succeeds, so a failed registration leaves the registry as
//! it was.
//!
//! Because registered files are never replaced, a discovery pass must not resolve its types
//! through the registry alone: a server upgraded between passes serves new versions of files
//! the registry already holds. [`TypeRegistry::isolated_pool`] links a pass's files on their
//! own and only borrows the imports the pass did not bring.
use parking_lot::RwLock;
use prost_reflect::{
    DescriptorError, DescriptorPool, EnumDescriptor, MessageDescriptor, ServiceDescriptor,
};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to link file descriptors into the registry: '{0}'")]
    Link(#[from] DescriptorError),
}

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    pool: Arc<RwLock<DescriptorPool>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry seeded with the Protobuf well-known types.
    pub fn new() -> Self {
        Self {
            pool: Arc::new(RwLock::new(DescriptorPool::global())),
        }
    }

    /// Creates a fresh registry holding the well-known types plus every file of `set`.
    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.add_files(set.file)?;
        Ok(registry)
    }

    /// Registers `files`, skipping those whose name is already present.
    ///
    /// Returns a snapshot of the pool after the registration.
    pub fn add_files(
        &self,
        files: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<DescriptorPool, RegistryError> {
        let mut pool = self.pool.write();
        let mut seen = HashSet::new();

        let fresh: Vec<FileDescriptorProto> = files
            .into_iter()
            .filter(|file| pool.get_file_by_name(file.name()).is_none())
            .filter(|file| seen.insert(file.name().to_string()))
            .collect();

        if fresh.is_empty() {
            return Ok(pool.clone());
        }

        let mut next = pool.clone();
        next.add_file_descriptor_protos(fresh)?;
        *pool = next;

        Ok(pool.clone())
    }

    /// Links `files` into a new pool seeded with the well-known types, leaving the registry
    /// untouched.
    ///
    /// Imports that are neither well-known nor part of `files` are taken from the registry,
    /// along with their own imports. A registered file never shadows a file of `files` with
    /// the same name.
    pub fn isolated_pool(
        &self,
        files: Vec<FileDescriptorProto>,
    ) -> Result<DescriptorPool, RegistryError> {
        let mut pool = DescriptorPool::global();

        let mut seen: HashSet<String> = files.iter().map(|f| f.name().to_string()).collect();
        let mut pending: Vec<String> = files
            .iter()
            .flat_map(|f| f.dependency.iter().cloned())
            .collect();

        let mut borrowed = Vec::new();
        {
            let registered = self.pool.read();
            while let Some(name) = pending.pop() {
                if pool.get_file_by_name(&name).is_some() || !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(file) = registered.get_file_by_name(&name) {
                    let proto = file.file_descriptor_proto().clone();
                    pending.extend(proto.dependency.iter().cloned());
                    borrowed.push(proto);
                }
            }
        }

        let own: Vec<FileDescriptorProto> = files
            .into_iter()
            .filter(|file| pool.get_file_by_name(file.name()).is_none())
            .collect();

        pool.add_file_descriptor_protos(borrowed.into_iter().chain(own))?;

        Ok(pool)
    }

    /// A point-in-time copy of the underlying pool.
    pub fn snapshot(&self) -> DescriptorPool {
        self.pool.read().clone()
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.pool.read().get_file_by_name(name).is_some()
    }

    pub fn message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.read().get_message_by_name(trim_leading_dot(full_name))
    }

    pub fn enumeration(&self, full_name: &str) -> Option<EnumDescriptor> {
        self.pool.read().get_enum_by_name(trim_leading_dot(full_name))
    }

    pub fn service(&self, full_name: &str) -> Option<ServiceDescriptor> {
        self.pool.read().get_service_by_name(trim_leading_dot(full_name))
    }
}

/// Type references inside descriptors are written as `.package.Name`.
pub(crate) fn trim_leading_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{DescriptorProto, FieldDescriptorProto, field_descriptor_proto::Type};

    fn file(name: &str, package: &str, message: &str, deps: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.into()),
            package: Some(package.into()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            message_type: vec![DescriptorProto {
                name: Some(message.into()),
                ..Default::default()
            }],
            syntax: Some("proto3".into()),
            ..Default::default()
        }
    }

    #[test]
    fn seeded_with_well_known_types() {
        let registry = TypeRegistry::new();

        assert!(registry.message("google.protobuf.Timestamp").is_some());
        assert!(registry.message(".google.protobuf.StringValue").is_some());
    }

    #[test]
    fn clones_share_the_same_store() {
        let registry = TypeRegistry::new();
        let other = registry.clone();

        registry
            .add_files([file("a.proto", "a", "Alpha", &[])])
            .unwrap();

        assert!(other.message("a.Alpha").is_some());
        assert!(other.contains_file("a.proto"));
    }

    #[test]
    fn registering_a_known_file_is_a_no_op() {
        let registry = TypeRegistry::new();

        registry
            .add_files([file("a.proto", "a", "Alpha", &[])])
            .unwrap();
        // Same name, different content: skipped rather than rejected.
        registry
            .add_files([file("a.proto", "a", "Beta", &[])])
            .unwrap();

        assert!(registry.message("a.Alpha").is_some());
        assert!(registry.message("a.Beta").is_none());
    }

    #[test]
    fn isolated_pool_prefers_the_given_files() {
        let registry = TypeRegistry::new();
        registry
            .add_files([file("a.proto", "a", "Alpha", &[])])
            .unwrap();

        let pool = registry
            .isolated_pool(vec![file("a.proto", "a", "Beta", &[])])
            .unwrap();

        assert!(pool.get_message_by_name("a.Beta").is_some());
        assert!(pool.get_message_by_name("a.Alpha").is_none());
        // The registry keeps the first version.
        assert!(registry.message("a.Alpha").is_some());
        assert!(registry.message("a.Beta").is_none());
    }

    #[test]
    fn isolated_pool_borrows_missing_imports_from_the_registry() {
        let registry = TypeRegistry::new();
        registry
            .add_files([
                file("base.proto", "base", "Base", &[]),
                file("mid.proto", "mid", "Mid", &["base.proto"]),
            ])
            .unwrap();

        let pool = registry
            .isolated_pool(vec![file("top.proto", "top", "Top", &["mid.proto"])])
            .unwrap();

        assert!(pool.get_message_by_name("top.Top").is_some());
        assert!(pool.get_message_by_name("mid.Mid").is_some());
        assert!(pool.get_message_by_name("base.Base").is_some());
        assert!(pool.get_message_by_name("google.protobuf.Timestamp").is_some());
        assert!(!registry.contains_file("top.proto"));
    }

    #[test]
    fn failed_registration_leaves_registry_untouched() {
        let registry = TypeRegistry::new();

        let mut broken = file("b.proto", "b", "Broken", &[]);
        broken.message_type[0].field.push(FieldDescriptorProto {
            name: Some("missing".into()),
            number: Some(1),
            r#type: Some(Type::Message as i32),
            type_name: Some(".nowhere.Missing".into()),
            ..Default::default()
        });

        let result = registry.add_files([file("ok.proto", "ok", "Fine", &[]), broken]);

        assert!(matches!(result, Err(RegistryError::Link(_))));
        assert!(registry.message("ok.Fine").is_none());
        assert!(!registry.contains_file("b.proto"));
    }

    #[test]
    fn dependencies_may_arrive_in_the_same_batch() {
        let registry = TypeRegistry::new();

        let mut user = file("user.proto", "user", "User", &["base.proto"]);
        user.message_type[0].field.push(FieldDescriptorProto {
            name: Some("base".into()),
            number: Some(1),
            r#type: Some(Type::Message as i32),
            type_name: Some(".base.Base".into()),
            ..Default::default()
        });

        registry
            .add_files([file("base.proto", "base", "Base", &[]), user])
            .unwrap();

        let user = registry.message("user.User").unwrap();
        let field = user.get_field_by_name("base").unwrap();
        assert_eq!(field.kind().as_message().unwrap().full_name(), "base.Base");
    }
}
