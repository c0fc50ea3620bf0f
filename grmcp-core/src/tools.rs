//! # Tools
//!
//! Every unary method of the catalog is exposed to tool-calling clients as a tool named after
//! its service and method: the service name lower-cased with dots replaced by underscores,
//! an underscore, and the lower-cased method name.
//!
//! ```
//! use grmcp_core::tools::tool_name;
//!
//! assert_eq!(tool_name("pkg.sub.Widget", "DoThing"), "pkg_sub_widget_dothing");
//! ```
//!
//! The mapping is lossy, so tool names are resolved back by re-deriving the name of every
//! `(service, method)` pair of the catalog and keeping the single exact match.
use crate::schema::SchemaCompiler;
use crate::types::{MethodInfo, ServiceInfo};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool name cannot be empty")]
    EmptyName,
    #[error("Tool '{0}' has an empty description")]
    EmptyDescription(String),
    #[error("Tool name '{0}' must separate service and method with '_'")]
    MissingSeparator(String),
    #[error("Method '{0}' is streaming and cannot be exposed as a tool")]
    Streaming(String),
}

/// A tool as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.name.is_empty() {
            return Err(ToolError::EmptyName);
        }
        if self.description.trim().is_empty() {
            return Err(ToolError::EmptyDescription(self.name.clone()));
        }
        if !self.name.contains('_') {
            return Err(ToolError::MissingSeparator(self.name.clone()));
        }
        Ok(())
    }
}

pub fn tool_name(service: &str, method: &str) -> String {
    format!(
        "{}_{}",
        service.replace('.', "_").to_lowercase(),
        method.to_lowercase()
    )
}

/// Used when a method carries no comment.
pub fn fallback_description(service: &str, method: &str) -> String {
    format!("Calls the {method} method of the {service} service")
}

/// Finds the `(service, method)` pair whose derived tool name is exactly `name`.
///
/// Returns `None` when nothing matches or when several pairs derive the same name.
pub fn resolve_tool_name<'a>(
    services: &'a [ServiceInfo],
    name: &str,
) -> Option<(&'a ServiceInfo, &'a MethodInfo)> {
    let mut matches = services.iter().flat_map(|service| {
        service
            .methods
            .iter()
            .filter(|method| tool_name(&service.name, &method.name) == name)
            .map(move |method| (service, method))
    });

    let found = matches.next()?;

    if let Some((other, _)) = matches.next() {
        tracing::warn!(
            tool = name,
            first = %found.0.name,
            second = %other.name,
            "Ambiguous tool name"
        );
        return None;
    }

    Some(found)
}

/// Builds tool definitions from the catalog, compiling schemas through a shared compiler.
#[derive(Debug, Clone, Default)]
pub struct ToolBuilder {
    compiler: Arc<SchemaCompiler>,
}

impl ToolBuilder {
    pub fn new(compiler: Arc<SchemaCompiler>) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> &SchemaCompiler {
        &self.compiler
    }

    pub fn build_tool(
        &self,
        service: &ServiceInfo,
        method: &MethodInfo,
    ) -> Result<ToolDefinition, ToolError> {
        if method.is_streaming() {
            return Err(ToolError::Streaming(method.full_name.clone()));
        }

        let description = if method.description.trim().is_empty() {
            fallback_description(&service.name, &method.name)
        } else {
            method.description.clone()
        };

        let tool = ToolDefinition {
            name: tool_name(&service.name, &method.name),
            description,
            input_schema: self.compiler.compile(&method.input),
            output_schema: self.compiler.compile(&method.output),
        };

        tool.validate()?;

        Ok(tool)
    }

    /// One tool per unary method, sorted by name. Streaming methods and methods failing
    /// validation are skipped.
    pub fn build_tools(&self, services: &[ServiceInfo]) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = services
            .iter()
            .flat_map(|service| {
                service
                    .methods
                    .iter()
                    .map(move |method| (service, method))
            })
            .filter(|(_, method)| {
                if method.is_streaming() {
                    tracing::debug!(method = %method.full_name, "Skipping streaming method");
                }
                !method.is_streaming()
            })
            .filter_map(|(service, method)| match self.build_tool(service, method) {
                Ok(tool) => Some(tool),
                Err(err) => {
                    tracing::warn!(method = %method.full_name, error = %err, "Skipping tool");
                    None
                }
            })
            .collect();

        tools.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(tools = tools.len(), "Built tool definitions");

        tools
    }
}
