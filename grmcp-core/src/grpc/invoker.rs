//! # Dynamic Invoker
//!
//! JSON in, JSON out. The invoker turns a JSON argument string into a wire message of the
//! method's input type, performs the unary call and renders the response as a JSON string.
//!
//! * An empty payload or `{}` yields an empty input message without parsing.
//! * Unknown fields and trailing characters are rejected before any wire activity.
//! * Responses use the Protobuf field names as keys, enums are rendered by name and bytes as
//!   base64.
use super::client::{GrpcClient, GrpcRequestError};
use crate::BoxError;
use crate::types::MethodInfo;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions};
use std::time::Duration;
use tonic::{Status, client::GrpcService, transport::Channel};

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Invalid input for '{method}', the JSON does not match the Protobuf schema: '{source}'")]
    InvalidInput {
        method: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("gRPC call failed: code={:?} message={:?}", .0.code(), .0.message())]
    CallFailed(#[source] Status),
    #[error("Failed to encode the response as JSON: '{0}'")]
    EncodeOutput(#[source] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct DynamicInvoker<S = Channel> {
    client: GrpcClient<S>,
}

impl<S> DynamicInvoker<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(client: GrpcClient<S>) -> Self {
        Self { client }
    }

    /// Invokes `method` with `input` and returns the JSON-encoded response.
    ///
    /// The caller is responsible for rejecting streaming methods beforehand.
    pub async fn invoke(
        &mut self,
        method: &MethodInfo,
        input: &str,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<String, InvokeError> {
        let request =
            decode_input(&method.input, input).map_err(|source| InvokeError::InvalidInput {
                method: method.full_name.clone(),
                source,
            })?;

        tracing::debug!(method = %method.full_name, "Invoking method");

        let response = self
            .client
            .unary(method, request, headers, timeout)
            .await?
            .map_err(InvokeError::CallFailed)?;

        encode_output(&response).map_err(InvokeError::EncodeOutput)
    }
}

/// Parses `input` into a message of type `desc`.
pub fn decode_input(
    desc: &MessageDescriptor,
    input: &str,
) -> Result<DynamicMessage, serde_json::Error> {
    let trimmed = input.trim();

    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(DynamicMessage::new(desc.clone()));
    }

    let mut deserializer = serde_json::Deserializer::from_str(trimmed);
    let message = DynamicMessage::deserialize(desc.clone(), &mut deserializer)?;
    deserializer.end()?;

    Ok(message)
}

/// Renders `message` as compact JSON keyed by Protobuf field names.
pub fn encode_output(message: &DynamicMessage) -> Result<String, serde_json::Error> {
    let options = SerializeOptions::new().use_proto_field_name(true);
    let value = message.serialize_with_options(serde_json::value::Serializer, &options)?;

    serde_json::to_string(&value)
}
