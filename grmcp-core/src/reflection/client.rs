//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`.
//!
//! This client enumerates the services of a live server and fetches the file descriptors
//! that define them. It handles dependency management by inspecting imports and fetching
//! missing files over the same stream until the whole schema tree of a requested symbol is
//! available.
//!
//! Every fetched file is kept in a descriptor cache keyed by symbol and by file name. The cache
//! is filled lazily and never evicted; a racing duplicate fetch simply overwrites an entry with
//! an equal value. Each client starts with an empty cache, so a client built after a reconnect
//! fetches everything again. Resolved files are registered in the shared [`TypeRegistry`], but
//! method types always come from the files fetched by this client.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::descriptors::comments::{
    FILE_SERVICE_TAG, SERVICE_METHOD_TAG, find_location, join_comments, source_span,
};
use crate::registry::{TypeRegistry, trim_leading_dot};
use crate::types::{MethodInfo, ServiceInfo};
use futures_util::stream::once;
use http_body::Body as HttpBody;
use parking_lot::RwLock;
use prost::Message;
use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::{FileDescriptorProto, MethodDescriptorProto};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Streaming, client::GrpcService};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("The server returned no file for symbol '{0}'")]
    SymbolNotFound(String),
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

/// Services every gRPC server may expose for its own plumbing.
const INTERNAL_SERVICE_PREFIXES: [&str; 4] = [
    "grpc.reflection.",
    "grpc.health.",
    "grpc.channelz.",
    "grpc.testing.",
];

pub fn is_internal_service(name: &str) -> bool {
    INTERNAL_SERVICE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Drops the reflection, health, channelz and testing services.
pub fn filter_internal_services(services: Vec<String>) -> Vec<String> {
    services
        .into_iter()
        .filter(|name| !is_internal_service(name))
        .collect()
}

/// A generic client for the gRPC Server Reflection Protocol.
#[derive(Debug, Clone)]
pub struct ReflectionClient<T = Channel> {
    client: ServerReflectionClient<T>,
    cache: Arc<RwLock<HashMap<String, FileDescriptorProto>>>,
    registry: TypeRegistry,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(channel: S, registry: TypeRegistry) -> Self {
        Self::with_max_message_size(channel, registry, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(channel: S, registry: TypeRegistry, limit: usize) -> Self {
        let client = ServerReflectionClient::new(channel)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Self {
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            registry,
        }
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };

        let mut response_stream = self
            .client
            .server_reflection_info(once(async { req }))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                let services = resp.service.into_iter().map(|s| s.name).collect();
                Ok(services)
            }
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Err(ReflectionResolveError::UnexpectedResponseType(format!(
                "{other:?}",
            ))),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }

    /// Returns the file declaring `symbol` (e.g. `my.package.MyService`).
    ///
    /// Served from the cache when possible. On a miss the file and any import that is neither
    /// cached nor well-known are fetched in a single reflection session, and every fetched
    /// file is cached under its own name while the declaring file is also cached under
    /// `symbol`.
    pub async fn file_descriptor_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorProto, ReflectionResolveError> {
        let cached = self.cache.read().get(symbol).cloned();
        if let Some(file) = cached {
            return Ok(file);
        }

        let known = self.known_files();
        let (primary, files) = self.fetch_file_containing_symbol(symbol, known).await?;

        let primary = primary
            .and_then(|name| files.get(&name).cloned())
            .ok_or_else(|| ReflectionResolveError::SymbolNotFound(symbol.to_string()))?;

        tracing::debug!(symbol, file = primary.name(), fetched = files.len(), "Resolved symbol");

        let mut cache = self.cache.write();
        cache.extend(files);
        cache.insert(symbol.to_string(), primary.clone());

        Ok(primary)
    }

    /// Builds one [`ServiceInfo`] per service declared in `file` whose fully qualified name is
    /// listed in `targets`.
    ///
    /// Types resolve against a pool linked from `file` and its cached imports alone, so a file
    /// fetched in this pass wins over an older version held by the shared registry. The same
    /// files are then registered in the registry. Methods whose input or output type cannot
    /// be resolved are dropped.
    pub fn extract_services_from_file_descriptor(
        &self,
        file: &FileDescriptorProto,
        targets: &[String],
    ) -> Vec<ServiceInfo> {
        let closure = self.file_closure(file);

        let local = match self.registry.isolated_pool(closure.clone()) {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!(
                    file = file.name(),
                    error = %err,
                    "Failed to link file descriptors, resolving types against the registry only"
                );
                self.registry.snapshot()
            }
        };

        if let Err(err) = self.registry.add_files(closure) {
            tracing::warn!(file = file.name(), error = %err, "Failed to register file descriptors");
        }

        file.service
            .iter()
            .enumerate()
            .filter_map(|(service_index, service)| {
                let full_name = qualified_name(file.package(), service.name());

                if !targets.contains(&full_name) {
                    return None;
                }

                let methods = service
                    .method
                    .iter()
                    .enumerate()
                    .filter_map(|(method_index, method)| {
                        let path = [
                            FILE_SERVICE_TAG,
                            service_index as i32,
                            SERVICE_METHOD_TAG,
                            method_index as i32,
                        ];
                        self.create_method_info(file, &full_name, method, &path, &local)
                    })
                    .collect();

                Some(ServiceInfo {
                    name: full_name,
                    methods,
                    file: file.name().to_string(),
                })
            })
            .collect()
    }

    /// Resolves a raw method declaration into a [`MethodInfo`].
    ///
    /// Types are looked up in `local` first and in the shared registry second. Returns `None`
    /// when either side cannot be resolved.
    pub fn create_method_info(
        &self,
        file: &FileDescriptorProto,
        service: &str,
        method: &MethodDescriptorProto,
        path: &[i32],
        local: &DescriptorPool,
    ) -> Option<MethodInfo> {
        let resolve = |type_name: &str| -> Option<MessageDescriptor> {
            local
                .get_message_by_name(trim_leading_dot(type_name))
                .or_else(|| self.registry.message(type_name))
        };

        let (Some(input), Some(output)) = (resolve(method.input_type()), resolve(method.output_type()))
        else {
            tracing::error!(
                service,
                method = method.name(),
                input = method.input_type(),
                output = method.output_type(),
                "Failed to resolve method types, skipping method"
            );
            return None;
        };

        let location = find_location(file.source_code_info.as_ref(), path);

        Some(MethodInfo {
            name: method.name().to_string(),
            full_name: format!("{service}.{}", method.name()),
            description: location.map(join_comments).unwrap_or_default(),
            input_type: input.full_name().to_string(),
            output_type: output.full_name().to_string(),
            input,
            output,
            client_streaming: method.client_streaming(),
            server_streaming: method.server_streaming(),
            source: location.and_then(|loc| source_span(file.name(), loc)),
        })
    }

    /// Lists, filters and resolves every service of the server.
    ///
    /// Services whose descriptor cannot be fetched are logged and skipped. Services are grouped
    /// by declaring file (in order of first appearance) and de-duplicated by name, keeping
    /// the first occurrence.
    pub async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, ReflectionResolveError> {
        let names = filter_internal_services(self.list_services().await?);

        let mut files: Vec<FileDescriptorProto> = Vec::new();
        let mut targets: HashMap<String, Vec<String>> = HashMap::new();

        for name in names {
            match self.file_descriptor_by_symbol(&name).await {
                Ok(file) => {
                    let entry = targets.entry(file.name().to_string()).or_default();
                    if entry.is_empty() {
                        files.push(file);
                    }
                    entry.push(name);
                }
                Err(err) => {
                    tracing::warn!(service = %name, error = %err, "Failed to resolve service, skipping");
                }
            }
        }

        let mut seen = HashSet::new();
        let services: Vec<ServiceInfo> = files
            .iter()
            .flat_map(|file| {
                let wanted = targets.get(file.name()).map(Vec::as_slice).unwrap_or_default();
                self.extract_services_from_file_descriptor(file, wanted)
            })
            .filter(|service| seen.insert(service.name.clone()))
            .collect();

        tracing::info!(
            services = services.len(),
            "Discovered services through reflection"
        );

        Ok(services)
    }

    /// Number of entries (symbols and file names) currently cached.
    pub fn cached_entries(&self) -> usize {
        self.cache.read().len()
    }

    fn known_files(&self) -> KnownFiles {
        KnownFiles {
            cached: self.cache.read().keys().cloned().collect(),
            well_known: DescriptorPool::global(),
        }
    }

    /// `file` plus every transitive import available in the cache.
    fn file_closure(&self, file: &FileDescriptorProto) -> Vec<FileDescriptorProto> {
        let cache = self.cache.read();
        let mut seen = HashSet::new();
        let mut stack = vec![file.clone()];
        let mut closure = Vec::new();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.name().to_string()) {
                continue;
            }

            for dep in &current.dependency {
                if let Some(dep_file) = cache.get(dep)
                    && !seen.contains(dep)
                {
                    stack.push(dep_file.clone());
                }
            }

            closure.push(current);
        }

        closure
    }

    async fn fetch_file_containing_symbol(
        &mut self,
        symbol: &str,
        known: KnownFiles,
    ) -> Result<(Option<String>, HashMap<String, FileDescriptorProto>), ReflectionResolveError>
    {
        // Initialize Stream
        let (tx, rx) = mpsc::channel(100);

        let mut response_stream = self
            .client
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(ReflectionResolveError::ServerStreamInitFailed)?
            .into_inner();

        // Send Initial Request
        let req = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(MessageRequest::FileContainingSymbol(symbol.to_string())),
        };

        tx.send(req)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)?;

        collect_descriptors(&mut response_stream, tx, &known).await
    }
}

/// Files that never need to be fetched again.
///
/// Files held by the shared registry are not part of it: they may come from an earlier pass
/// against an older version of the server.
struct KnownFiles {
    cached: HashSet<String>,
    well_known: DescriptorPool,
}

impl KnownFiles {
    fn contains(&self, name: &str) -> bool {
        self.cached.contains(name) || self.well_known.get_file_by_name(name).is_some()
    }
}

fn qualified_name(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}.{name}")
    }
}

/// Reads responses until every request sent on the stream has been answered.
///
/// Returns the name of the first file received, which is the one declaring the requested
/// symbol, along with every file collected.
async fn collect_descriptors(
    response_stream: &mut Streaming<ServerReflectionResponse>,
    request_channel: mpsc::Sender<ServerReflectionRequest>,
    known: &KnownFiles,
) -> Result<(Option<String>, HashMap<String, FileDescriptorProto>), ReflectionResolveError> {
    let mut inflight = 1;
    let mut primary = None;
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = response_stream
            .message()
            .await
            .map_err(ReflectionResolveError::ServerStreamFailure)?
            .ok_or(ReflectionResolveError::StreamClosed)?;

        inflight -= 1;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => {
                let batch = Batch {
                    collected_files: &mut collected_files,
                    requested: &mut requested,
                    known,
                    tx: &request_channel,
                };

                let (first, sent_count) = batch.process(res.file_descriptor_proto).await?;

                if primary.is_none() {
                    primary = first;
                }

                inflight += sent_count;
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                return Err(ReflectionResolveError::ServerError {
                    message: e.error_message,
                    code: e.error_code,
                });
            }
            Some(other) => {
                return Err(ReflectionResolveError::UnexpectedResponseType(format!(
                    "{:?}",
                    other
                )));
            }
            None => {
                return Err(ReflectionResolveError::UnexpectedResponseType(
                    "Empty Message".into(),
                ));
            }
        }
    }

    Ok((primary, collected_files))
}

struct Batch<'a> {
    collected_files: &'a mut HashMap<String, FileDescriptorProto>,
    requested: &'a mut HashSet<String>,
    known: &'a KnownFiles,
    tx: &'a mpsc::Sender<ServerReflectionRequest>,
}

impl Batch<'_> {
    /// Decodes a batch of files and queues their unknown imports.
    ///
    /// Returns the name of the first decoded file and the number of requests sent.
    async fn process(
        self,
        raw_protos: Vec<Vec<u8>>,
    ) -> Result<(Option<String>, usize), ReflectionResolveError> {
        let mut sent_count = 0;
        let mut first = None;

        for raw in raw_protos {
            let fd = FileDescriptorProto::decode(raw.as_ref())?;
            let name = fd.name().to_string();

            if first.is_none() {
                first = Some(name.clone());
            }

            if !self.collected_files.contains_key(&name) {
                for dep in &fd.dependency {
                    if !self.collected_files.contains_key(dep)
                        && !self.known.contains(dep)
                        && self.requested.insert(dep.clone())
                    {
                        let req = ServerReflectionRequest {
                            host: EMPTY_HOST.to_string(),
                            message_request: Some(MessageRequest::FileByFilename(dep.clone())),
                        };

                        self.tx
                            .send(req)
                            .await
                            .map_err(|_| ReflectionResolveError::SendFailed)?;
                        sent_count += 1;
                    }
                }

                self.collected_files.insert(name, fd);
            }
        }

        Ok((first, sent_count))
    }
}
