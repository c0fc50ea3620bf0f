//! # CLI
//!
//! This module defines the command-line interface of `grmcp` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "grmcp",
    version,
    about = "Expose a gRPC server as JSON-schema described tools"
)]
pub struct Cli {
    /// TOML configuration file. Flags below override its values.
    #[arg(long, global = true, env = "GRMCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host of the gRPC server
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port of the gRPC server
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Binary FileDescriptorSet to discover services from (enables the descriptor set)
    #[arg(long, global = true)]
    pub descriptor: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the discovered services and their methods
    Services,

    /// Print the tool definitions derived from every unary method
    Tools,

    /// Print the JSON schema of a message
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// grmcp --port 50051 schema my.package.Request
    /// ```
    Schema {
        /// Fully qualified message name (e.g. my.package.Message)
        message: String,
    },

    /// Invoke a tool
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// grmcp call my_package_service_method --body '{"key": "value"}' -H x-tenant:acme
    /// ```
    Call {
        /// Tool name, as printed by `grmcp tools`
        tool: String,

        /// JSON arguments. Defaults to an empty object.
        #[arg(long, value_parser = parse_body)]
        body: Option<serde_json::Value>,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}
