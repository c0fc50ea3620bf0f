//! # grmcp Core
//!
//! `grmcp-core` bridges arbitrary gRPC services to generic tool-calling clients. It discovers
//! a server's method surface at runtime, derives a JSON schema for every method's input and
//! output messages, and invokes unary methods from plain JSON payloads without any compiled
//! client stubs.
//!
//! ## Key Components
//!
//! * **[`ServiceDiscoverer`]:** The main entry point. It owns the connection, populates the
//!   service catalog from a precompiled descriptor set or from server reflection (with fallback
//!   between the two), reconnects on demand and dispatches invocations.
//! * **[`ConnectionManager`]:** Dials the target, keeps the HTTP/2 channel alive and answers
//!   health checks.
//! * **[`SchemaCompiler`]:** Turns a Protobuf message descriptor into a JSON-schema document,
//!   breaking recursion cycles with `$ref` placeholders.
//! * **[`ToolBuilder`]:** Derives tool names and tool definitions (description plus input and
//!   output schemas) from the discovered catalog.
//!
//! ## Internal clients
//!
//! The lower level clients are exposed as well:
//!
//! * **[`GrpcClient`]:** A dynamic unary gRPC client using a [`DynamicMessage`](prost_reflect::DynamicMessage) codec.
//! * **[`ReflectionClient`]:** A `grpc.reflection.v1` client with a descriptor cache.
//! * **[`DynamicInvoker`]:** JSON in, JSON out, on top of [`GrpcClient`].
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod config;
pub mod connection;
pub mod descriptors;
pub mod discovery;
pub mod grpc;
pub mod reflection;
pub mod registry;
pub mod schema;
pub mod tools;
pub mod types;

pub use connection::{ConnectionManager, ConnectionProvider, ConnectionState};
pub use discovery::ServiceDiscoverer;
pub use grpc::{client::GrpcClient, invoker::DynamicInvoker};
pub use reflection::client::ReflectionClient;
pub use registry::TypeRegistry;
pub use schema::SchemaCompiler;
pub use tools::ToolBuilder;
pub use types::{MethodInfo, ServiceInfo};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
