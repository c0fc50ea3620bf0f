use prost_reflect::MessageDescriptor;
use std::fmt;

/// A discovered service and the methods it exposes.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Fully qualified name (e.g. `my.package.Service`).
    pub name: String,
    pub methods: Vec<MethodInfo>,
    /// Name of the proto file declaring the service.
    pub file: String,
}

impl ServiceInfo {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A single RPC method with its resolved input and output types.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Simple name (e.g. `SayHello`).
    pub name: String,
    /// Fully qualified name (e.g. `my.package.Service.SayHello`).
    pub full_name: String,
    /// Comment attached to the method, empty when none is available.
    pub description: String,
    pub input_type: String,
    pub output_type: String,
    pub input: MessageDescriptor,
    pub output: MessageDescriptor,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub source: Option<SourceSpan>,
}

impl MethodInfo {
    pub fn is_streaming(&self) -> bool {
        self.client_streaming || self.server_streaming
    }
}

/// Where a definition lives in its proto file. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
