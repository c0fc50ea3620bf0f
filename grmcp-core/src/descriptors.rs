//! # Descriptor Store
//!
//! Offline schema source: a precompiled binary `FileDescriptorSet` (as produced by
//! `protoc --descriptor_set_out`, optionally with `--include_source_info`) loaded into a
//! [`crate::TypeRegistry`] and flattened into the service catalog.
//!
//! The [`comments`] module extracts documentation from `SourceCodeInfo` and is shared with the
//! reflection path and the schema compiler.
pub mod comments;
pub mod store;
