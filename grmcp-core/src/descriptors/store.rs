//! # Descriptor Set Loader
//!
//! Stateless transforms from a binary `FileDescriptorSet` on disk to a [`TypeRegistry`] and
//! from a registry to the service catalog.
//!
//! Loading is all or nothing: if a single file of the set cannot be decoded or linked, the
//! whole load fails and no partial registry is returned.
use super::comments::Documented;
use crate::reflection::client::is_internal_service;
use crate::registry::{RegistryError, TypeRegistry};
use crate::types::{MethodInfo, ServiceInfo};
use prost::Message;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use prost_types::FileDescriptorSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DescriptorLoadError {
    #[error("Failed to read descriptor set '{path}': '{source}'")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode descriptor set: '{0}'")]
    Decode(#[from] prost::DecodeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Reads and decodes a binary `FileDescriptorSet`.
pub fn load_from_file(path: &Path) -> Result<FileDescriptorSet, DescriptorLoadError> {
    let bytes = std::fs::read(path).map_err(|source| DescriptorLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(FileDescriptorSet::decode(bytes.as_slice())?)
}

/// Builds a fresh registry holding the well-known types and every file of `set`.
pub fn build_registry(set: FileDescriptorSet) -> Result<TypeRegistry, DescriptorLoadError> {
    Ok(TypeRegistry::from_file_descriptor_set(set)?)
}

/// Every non-internal service known to `registry`, in file declaration order.
///
/// Descriptions and source locations are only filled in when `include_source_info` is set.
pub fn extract_services(registry: &TypeRegistry, include_source_info: bool) -> Vec<ServiceInfo> {
    let pool = registry.snapshot();

    pool.services()
        .filter(|service| !is_internal_service(service.full_name()))
        .map(|service| service_info(&service, include_source_info))
        .collect()
}

/// Convenience wrapper running [`load_from_file`], [`build_registry`] and
/// [`extract_services`] in sequence.
pub fn load(
    path: &Path,
    include_source_info: bool,
) -> Result<(TypeRegistry, Vec<ServiceInfo>), DescriptorLoadError> {
    let set = load_from_file(path)?;
    let registry = build_registry(set)?;
    let services = extract_services(&registry, include_source_info);

    tracing::info!(
        path = %path.display(),
        services = services.len(),
        "Loaded descriptor set"
    );

    Ok((registry, services))
}

fn service_info(service: &ServiceDescriptor, include_source_info: bool) -> ServiceInfo {
    ServiceInfo {
        name: service.full_name().to_string(),
        methods: service
            .methods()
            .map(|method| method_info(&method, include_source_info))
            .collect(),
        file: service.parent_file().name().to_string(),
    }
}

fn method_info(method: &MethodDescriptor, include_source_info: bool) -> MethodInfo {
    let input = method.input();
    let output = method.output();

    let (description, source) = if include_source_info {
        (method.comments(), method.source_span())
    } else {
        (String::new(), None)
    };

    MethodInfo {
        name: method.name().to_string(),
        full_name: method.full_name().to_string(),
        description,
        input_type: input.full_name().to_string(),
        output_type: output.full_name().to_string(),
        input,
        output,
        client_streaming: method.is_client_streaming(),
        server_streaming: method.is_server_streaming(),
        source,
    }
}
