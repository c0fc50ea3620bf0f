//! # Service Discoverer
//!
//! The [`ServiceDiscoverer`] is the boundary the rest of the bridge talks to. It owns:
//!
//! * the transport, through a [`ConnectionProvider`] ([`ConnectionManager`] by default),
//! * the backend built on top of the live connection: a [`ReflectionClient`] and a
//!   [`DynamicInvoker`] sharing the same channel,
//! * the service catalog, replaced wholesale on every discovery pass,
//! * the shared [`TypeRegistry`].
//!
//! ## Discovery sources
//!
//! When a descriptor set is configured, exactly one source populates the catalog per pass:
//!
//! | `prefer_over_reflection` | first try      | on any error   |
//! |--------------------------|----------------|----------------|
//! | `true` (default)         | descriptor set | reflection     |
//! | `false`                  | reflection     | descriptor set |
//!
//! Without a descriptor set, reflection is the only source.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grmcp_core::{ServiceDiscoverer, config::Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let discoverer = ServiceDiscoverer::from_config(&Config::default());
//!
//! discoverer.connect().await?;
//! discoverer.discover_services().await?;
//!
//! let response = discoverer
//!     .invoke_method("helloworld.Greeter", "SayHello", r#"{"name": "grmcp"}"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```
use crate::BoxError;
use crate::config::{Config, DEFAULT_MAX_MESSAGE_SIZE, DescriptorSetConfig, ReconnectPolicy};
use crate::connection::{ConnectionError, ConnectionManager, ConnectionProvider};
use crate::descriptors::store::{self, DescriptorLoadError};
use crate::grpc::client::GrpcClient;
use crate::grpc::invoker::{DynamicInvoker, InvokeError};
use crate::reflection::client::{ReflectionClient, ReflectionResolveError};
use crate::registry::TypeRegistry;
use crate::types::{MethodInfo, ServiceInfo};
use http_body::Body as HttpBody;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::client::GrpcService;

/// Deadline applied to every invocation.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Not connected to gRPC server")]
    NotConnected,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Reflection discovery failed: '{0}'")]
    Reflection(#[from] ReflectionResolveError),
    #[error("Descriptor set discovery failed: '{0}'")]
    DescriptorStore(#[from] DescriptorLoadError),
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeMethodError {
    #[error("Not connected to gRPC server")]
    NotConnected,
    #[error("Method {service}.{method} not found")]
    MethodNotFound { service: String, method: String },
    #[error("Streaming methods are not supported: {service}.{method}")]
    StreamingNotSupported { service: String, method: String },
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error("Reconnection cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
    #[error("Failed to reconnect after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: DiscoveryError,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub service_count: usize,
    pub method_count: usize,
    pub is_connected: bool,
    pub services: Vec<String>,
}

/// Clients bound to the current connection.
#[derive(Debug, Clone)]
struct Backend<S> {
    reflection: ReflectionClient<S>,
    invoker: DynamicInvoker<S>,
}

pub struct ServiceDiscoverer<C: ConnectionProvider = ConnectionManager> {
    connection: C,
    backend: RwLock<Option<Backend<C::Service>>>,
    catalog: RwLock<Vec<ServiceInfo>>,
    registry: TypeRegistry,
    descriptor_set: DescriptorSetConfig,
    reconnect_policy: ReconnectPolicy,
    max_message_size: usize,
}

impl ServiceDiscoverer<ConnectionManager> {
    pub fn from_config(config: &Config) -> Self {
        let connection = ConnectionManager::new(config.grpc.clone());

        Self::new(
            connection,
            config.descriptor_set.clone(),
            config.grpc.reconnect.clone(),
        )
        .with_max_message_size(config.grpc.max_message_size)
    }
}

impl<C: ConnectionProvider> ServiceDiscoverer<C> {
    pub fn new(
        connection: C,
        descriptor_set: DescriptorSetConfig,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            connection,
            backend: RwLock::new(None),
            catalog: RwLock::new(Vec::new()),
            registry: TypeRegistry::new(),
            descriptor_set,
            reconnect_policy,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Shares an existing registry instead of the fresh one created by [`Self::new`].
    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// A copy of the catalog, in discovery order.
    pub fn get_services(&self) -> Vec<ServiceInfo> {
        self.catalog.read().clone()
    }

    pub fn get_service(&self, name: &str) -> Option<ServiceInfo> {
        self.catalog.read().iter().find(|s| s.name == name).cloned()
    }

    pub fn get_method(&self, service: &str, method: &str) -> Option<MethodInfo> {
        self.catalog
            .read()
            .iter()
            .find(|s| s.name == service)
            .and_then(|s| s.method(method))
            .cloned()
    }

    pub fn service_count(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn method_count(&self) -> usize {
        self.catalog.read().iter().map(|s| s.methods.len()).sum()
    }

    /// True when the transport is up and the backend has been built.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected() && self.backend.read().is_some()
    }

    pub fn stats(&self) -> DiscoveryStats {
        let catalog = self.catalog.read();

        DiscoveryStats {
            service_count: catalog.len(),
            method_count: catalog.iter().map(|s| s.methods.len()).sum(),
            is_connected: self.is_connected(),
            services: catalog.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

impl<C, S> ServiceDiscoverer<C>
where
    C: ConnectionProvider<Service = S>,
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Connects the transport and builds the backend on top of it.
    pub async fn connect(&self) -> Result<(), DiscoveryError> {
        self.connection.connect().await?;
        self.rebuild_backend().await
    }

    /// Populates the catalog from the configured sources.
    ///
    /// The catalog is only replaced when a source succeeds; on failure the previous catalog
    /// is kept.
    pub async fn discover_services(&self) -> Result<(), DiscoveryError> {
        let prefer_store = self.descriptor_set.prefer_over_reflection;

        let services = match self.descriptor_set.active_path() {
            Some(path) if prefer_store => match self.discover_from_store(path) {
                Ok(services) => services,
                Err(err) => {
                    tracing::warn!(error = %err, "Descriptor set discovery failed, falling back to reflection");
                    self.discover_from_reflection().await?
                }
            },
            Some(path) => match self.discover_from_reflection().await {
                Ok(services) => services,
                Err(err) => {
                    tracing::warn!(error = %err, "Reflection discovery failed, falling back to descriptor set");
                    self.discover_from_store(path)?
                }
            },
            None => self.discover_from_reflection().await?,
        };

        let service_count = services.len();
        let method_count: usize = services.iter().map(|s| s.methods.len()).sum();

        *self.catalog.write() = services;

        tracing::info!(
            services = service_count,
            methods = method_count,
            "Service discovery completed"
        );

        Ok(())
    }

    pub async fn invoke_method(
        &self,
        service: &str,
        method: &str,
        input: &str,
    ) -> Result<String, InvokeMethodError> {
        self.invoke_method_with_headers(Vec::new(), service, method, input)
            .await
    }

    /// Invokes a unary method with extra request metadata.
    ///
    /// Fails before any wire activity when there is no backend, when the method is not in the
    /// catalog or when it is streaming.
    pub async fn invoke_method_with_headers(
        &self,
        headers: Vec<(String, String)>,
        service: &str,
        method: &str,
        input: &str,
    ) -> Result<String, InvokeMethodError> {
        let mut invoker = self
            .backend
            .read()
            .as_ref()
            .map(|backend| backend.invoker.clone())
            .ok_or(InvokeMethodError::NotConnected)?;

        let method_info =
            self.get_method(service, method)
                .ok_or_else(|| InvokeMethodError::MethodNotFound {
                    service: service.to_string(),
                    method: method.to_string(),
                })?;

        if method_info.is_streaming() {
            return Err(InvokeMethodError::StreamingNotSupported {
                service: service.to_string(),
                method: method.to_string(),
            });
        }

        Ok(invoker
            .invoke(&method_info, input, headers, Some(INVOCATION_TIMEOUT))
            .await?)
    }

    /// Reconnects and re-runs discovery, up to the policy's attempt count.
    ///
    /// Returns [`ReconnectError::Cancelled`] without any attempt when `cancel` is already
    /// cancelled, and as soon as it fires during the wait between two attempts.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), ReconnectError> {
        if cancel.is_cancelled() {
            return Err(ReconnectError::Cancelled { attempts: 0 });
        }

        let max_attempts = self.reconnect_policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.try_reconnect().await {
                Ok(()) => {
                    tracing::info!(attempt, "Reconnected to gRPC server");
                    return Ok(());
                }
                Err(err) => err,
            };

            tracing::warn!(attempt, max_attempts, error = %err, "Reconnect attempt failed");

            if attempt >= max_attempts {
                return Err(ReconnectError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReconnectError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(self.reconnect_policy.interval()) => {}
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), DiscoveryError> {
        self.connection.health_check().await?;

        if self.backend.read().is_none() {
            return Err(DiscoveryError::NotConnected);
        }

        Ok(())
    }

    /// Drops the backend, clears the catalog and closes the transport.
    pub async fn close(&self) {
        self.backend.write().take();
        self.catalog.write().clear();
        self.connection.close().await;

        tracing::info!("Service discoverer closed");
    }

    async fn try_reconnect(&self) -> Result<(), DiscoveryError> {
        self.backend.write().take();

        self.connection.reconnect().await?;
        self.rebuild_backend().await?;
        self.discover_services().await
    }

    async fn rebuild_backend(&self) -> Result<(), DiscoveryError> {
        let service = self
            .connection
            .connection()
            .await
            .ok_or(DiscoveryError::NotConnected)?;

        let limit = self.max_message_size;
        let backend = Backend {
            reflection: ReflectionClient::with_max_message_size(
                service.clone(),
                self.registry.clone(),
                limit,
            ),
            invoker: DynamicInvoker::new(GrpcClient::with_max_message_size(service, limit)),
        };

        *self.backend.write() = Some(backend);

        Ok(())
    }

    async fn discover_from_reflection(&self) -> Result<Vec<ServiceInfo>, DiscoveryError> {
        let mut reflection = self
            .backend
            .read()
            .as_ref()
            .map(|backend| backend.reflection.clone())
            .ok_or(DiscoveryError::NotConnected)?;

        Ok(reflection.discover_services().await?)
    }

    fn discover_from_store(&self, path: &Path) -> Result<Vec<ServiceInfo>, DiscoveryError> {
        let (store_registry, services) = store::load(path, self.descriptor_set.include_source_info)?;

        // Make the store's types resolvable by name through the shared registry as well.
        let files = store_registry
            .snapshot()
            .files()
            .map(|file| file.file_descriptor_proto().clone())
            .collect::<Vec<_>>();

        if let Err(err) = self.registry.add_files(files) {
            tracing::warn!(error = %err, "Failed to merge descriptor set into the shared registry");
        }

        Ok(services)
    }
}
