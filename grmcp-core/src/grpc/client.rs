//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! unary gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! It does not need to know the structure of the data it is sending; it ensures the
//! connection is ready and hands the [`DynamicMessage`] to the codec together with the
//! output descriptor it should decode the answer into.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Appends standard Rust string tuples to Tonic's `MetadataMap`.
//! * **Deadlines**: Sends `grpc-timeout` and gives up locally once the deadline passes.
use super::codec::DynamicCodec;
use crate::BoxError;
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::types::MethodInfo;
use http_body::Body as HttpBody;
use prost_reflect::DynamicMessage;
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("Method '{0}' does not map to a valid gRPC path")]
    InvalidPath(String),
}

/// A generic unary gRPC client.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self::with_max_message_size(service, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Caps encoded and decoded messages at `limit` bytes.
    pub fn with_max_message_size(service: S, limit: usize) -> Self {
        let client = tonic::client::Grpc::new(service)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(DynamicMessage))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but the server or the transport returned an error,
    ///   including `DEADLINE_EXCEEDED` when `timeout` elapsed.
    /// * `Err(GrpcRequestError)` - Failed to build the request or the client was not ready.
    pub async fn unary(
        &mut self,
        method: &MethodInfo,
        payload: DynamicMessage,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Result<DynamicMessage, tonic::Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = DynamicCodec::new(method.output.clone());
        let path = http_path(method)?;
        let mut request = build_request(payload, headers)?;

        let call = match timeout {
            Some(timeout) => {
                request.set_timeout(timeout);
                match tokio::time::timeout(timeout, self.client.unary(request, path, codec)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(tonic::Status::deadline_exceeded(format!(
                        "Deadline of {timeout:?} exceeded calling '{}'",
                        method.full_name
                    ))),
                }
            }
            None => self.client.unary(request, path, codec).await,
        };

        match call {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }
}

/// `/<package.Service>/<Method>`, derived from the method's fully qualified name.
fn http_path(method: &MethodInfo) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let invalid = || GrpcRequestError::InvalidPath(method.full_name.clone());

    let (service, name) = method.full_name.rsplit_once('.').ok_or_else(invalid)?;
    let path = format!("/{service}/{name}");

    http::uri::PathAndQuery::from_str(&path).map_err(|_| invalid())
}

fn build_request<T>(
    payload: T,
    headers: Vec<(String, String)>,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in headers {
        let key =
            MetadataKey::from_str(&k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().append(key, val);
    }
    Ok(request)
}
