//! # grmcp CLI Entry Point
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`], loads the
//!    configuration and installs the log subscriber.
//! 2. **Discovery**: Connects to the target server and populates the service catalog through
//!    `grmcp_core`.
//! 3. **Execution**: Lists services, prints tool definitions or schemas, or invokes a tool.
//! 4. **Presentation**: Pretty-prints the resulting JSON to standard output. Logs go to
//!    standard error.
mod cli;
mod formatter;

use anyhow::{Context, anyhow};
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, ServiceList};
use grmcp_core::config::{Config, DescriptorSetConfig};
use grmcp_core::tools::resolve_tool_name;
use grmcp_core::{SchemaCompiler, ServiceDiscoverer, ToolBuilder};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;
    let discoverer = ServiceDiscoverer::from_config(&config);

    let discovered = connect(&discoverer, &config.descriptor_set).await?;
    if !discovered {
        discoverer
            .discover_services()
            .await
            .context("Service discovery failed")?;
    }

    let result = run(cli.command, &discoverer).await;
    discoverer.close().await;
    result
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(host) = &cli.host {
        config.grpc.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.grpc.port = port;
    }
    if let Some(path) = &cli.descriptor {
        config.descriptor_set.enabled = true;
        config.descriptor_set.path = Some(path.clone());
    }

    Ok(config)
}

/// Connects, retrying with the configured policy until Ctrl-C.
///
/// Returns whether the retry loop already populated the catalog. Without a connection the
/// descriptor set alone is enough to list services and schemas: a preferred set skips the
/// retries entirely, and any other configured set turns a failed retry loop into a warning.
async fn connect(
    discoverer: &ServiceDiscoverer,
    descriptor_set: &DescriptorSetConfig,
) -> anyhow::Result<bool> {
    let err = match discoverer.connect().await {
        Ok(()) => return Ok(false),
        Err(err) => err,
    };

    if descriptor_set.preferred_path().is_some() {
        tracing::warn!(error = %err, "Server unreachable, continuing with the descriptor set only");
        return Ok(false);
    }

    tracing::warn!(error = %err, "Initial connection failed, retrying");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match discoverer.reconnect(&cancel).await {
        Ok(()) => Ok(true),
        Err(err) if descriptor_set.active_path().is_some() => {
            tracing::warn!(error = %err, "Continuing with the descriptor set only");
            Ok(false)
        }
        Err(err) => Err(err).context("Failed to connect to the gRPC server"),
    }
}

async fn run(command: Commands, discoverer: &ServiceDiscoverer) -> anyhow::Result<()> {
    match command {
        Commands::Services => {
            println!(
                "{}",
                FormattedString::from(ServiceList(discoverer.get_services()))
            );
        }
        Commands::Tools => {
            let tools = ToolBuilder::default().build_tools(&discoverer.get_services());
            println!("{}", FormattedString::from(serde_json::to_value(tools)?));
        }
        Commands::Schema { message } => {
            let schema = SchemaCompiler::new().compile_by_name(discoverer.registry(), &message)?;
            println!("{}", FormattedString::from(schema));
        }
        Commands::Call {
            tool,
            body,
            headers,
        } => {
            let services = discoverer.get_services();
            let (service, method) = resolve_tool_name(&services, &tool)
                .ok_or_else(|| anyhow!("Unknown or ambiguous tool '{tool}'"))?;

            let input = body.map(|b| b.to_string()).unwrap_or_default();

            let response = discoverer
                .invoke_method_with_headers(headers, &service.name, &method.name, &input)
                .await?;

            let value: serde_json::Value = serde_json::from_str(&response)?;
            println!("{}", FormattedString::from(value));
        }
    }

    Ok(())
}
