//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the bridge to query a server for its own Protobuf schema at runtime, so no
//! pre-compiled descriptors are needed to build the service catalog.
pub mod client;
