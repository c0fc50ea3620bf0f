//! A dynamic implementation of `echo.EchoService`.
//!
//! Only the unary methods answer:
//!
//! * `UnaryEcho` returns the request fields as an `EchoResponse`. When the call carries an
//!   `x-request-id` header, `x-request-id=<value>` is appended to `tags`.
//! * `FailEcho` always fails with `FAILED_PRECONDITION`.
//! * `SlowEcho` behaves like `UnaryEcho` after a configurable delay.
//!
//! Every other path is answered with `UNIMPLEMENTED`.
use crate::descriptors::descriptor_pool;
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Duration;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::{BoxFuture, Service, StdError};
use tonic::server::{NamedService, UnaryService};
use tonic::{Request, Response, Status};

const DEFAULT_SLOW_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EchoServer {
    pool: DescriptorPool,
    slow_delay: Duration,
}

impl EchoServer {
    pub fn new() -> Result<Self, DescriptorError> {
        Ok(Self {
            pool: descriptor_pool()?,
            slow_delay: DEFAULT_SLOW_DELAY,
        })
    }

    pub fn with_slow_delay(mut self, delay: Duration) -> Self {
        self.slow_delay = delay;
        self
    }

    fn message(&self, name: &str) -> Result<MessageDescriptor, Status> {
        self.pool
            .get_message_by_name(name)
            .ok_or_else(|| Status::internal(format!("missing message '{name}'")))
    }
}

impl NamedService for EchoServer {
    const NAME: &'static str = "echo.EchoService";
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Echo,
    Fail,
    Slow(Duration),
}

impl<B> Service<http::Request<B>> for EchoServer
where
    B: HttpBody + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let behavior = match req.uri().path() {
            "/echo.EchoService/UnaryEcho" => Behavior::Echo,
            "/echo.EchoService/FailEcho" => Behavior::Fail,
            "/echo.EchoService/SlowEcho" => Behavior::Slow(self.slow_delay),
            path => {
                let status = Status::unimplemented(format!("'{path}' is not served"));
                return Box::pin(async move { Ok(status.into_http()) });
            }
        };

        let descriptors = self
            .message("echo.EchoRequest")
            .and_then(|request| Ok((request, self.message("echo.EchoResponse")?)));

        let (request, response) = match descriptors {
            Ok(pair) => pair,
            Err(status) => return Box::pin(async move { Ok(status.into_http()) }),
        };

        let handler = EchoHandler { behavior, response };
        let codec = EchoCodec { request };

        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(codec);
            Ok(grpc.unary(handler, req).await)
        })
    }
}

struct EchoHandler {
    behavior: Behavior,
    response: MessageDescriptor,
}

impl UnaryService<DynamicMessage> for EchoHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Response<DynamicMessage>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let behavior = self.behavior;
        let response = self.response.clone();

        Box::pin(async move {
            match behavior {
                Behavior::Fail => return Err(Status::failed_precondition("echo refused")),
                Behavior::Slow(delay) => tokio::time::sleep(delay).await,
                Behavior::Echo => {}
            }

            let request_id = request
                .metadata()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let bytes = request.into_inner().encode_to_vec();
            let mut reply = DynamicMessage::decode(response, bytes.as_slice())
                .map_err(|e| Status::internal(e.to_string()))?;

            if let Some(id) = request_id
                && let Some(Value::List(tags)) = reply.get_field_by_name_mut("tags")
            {
                tags.push(Value::String(format!("x-request-id={id}")));
            }

            Ok(Response::new(reply))
        })
    }
}

struct EchoCodec {
    request: MessageDescriptor,
}

impl Codec for EchoCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = EchoEncoder;
    type Decoder = EchoDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        EchoEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        EchoDecoder(self.request.clone())
    }
}

struct EchoEncoder;

impl Encoder for EchoEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode_raw(dst);
        Ok(())
    }
}

struct EchoDecoder(MessageDescriptor);

impl Decoder for EchoDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(self.0.clone(), src)
            .map(Some)
            .map_err(|e| Status::internal(e.to_string()))
    }
}
