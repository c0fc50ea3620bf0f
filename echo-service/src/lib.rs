//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a gRPC server implementation
//! and descriptor set for integration testing `grmcp-core`.
//! It is not intended for production use.
//!
//! The descriptors are assembled in code (see [`descriptors`]) so no `protoc` is needed to
//! build the tests. The equivalent `.proto` sources are reproduced in the module docs.
pub mod descriptors;
pub mod server;

pub use descriptors::{
    ECHO_FILE, LEGACY_FILE, STANDALONE_FILE, descriptor_pool, encoded_file_descriptor_set,
    file_descriptor_set, legacy_file_descriptor_set,
};
pub use server::EchoServer;
