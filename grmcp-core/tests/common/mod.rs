#![allow(dead_code)]

use echo_service::EchoServer;
use grmcp_core::config::{DescriptorSetConfig, ReconnectPolicy};
use grmcp_core::connection::{ConnectionError, ConnectionProvider};
use grmcp_core::{ReflectionClient, ServiceDiscoverer, TypeRegistry};
use parking_lot::Mutex;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tonic::body::Body;
use tonic::codegen::{BoxFuture, Service};
use tonic::service::Routes;

pub const SLOW_DELAY: Duration = Duration::from_millis(300);

pub fn echo_server() -> EchoServer {
    EchoServer::new()
        .expect("Failed to build echo descriptors")
        .with_slow_delay(SLOW_DELAY)
}

/// Reflection plus the echo service.
pub fn echo_routes() -> Routes {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(echo_service::file_descriptor_set())
        .build_v1()
        .expect("Failed to setup Reflection Service");

    Routes::new(reflection).add_service(echo_server())
}

/// The echo service alone, without reflection.
pub fn echo_routes_without_reflection() -> Routes {
    Routes::new(echo_server())
}

pub fn reflection_client() -> ReflectionClient<Routes> {
    ReflectionClient::new(echo_routes(), TypeRegistry::new())
}

pub const INVENTORY_FILE: &str = "inventory/inventory.proto";

/// `inventory/inventory.proto` as served by two releases of the same server.
///
/// Release 1 declares `Stock.Get(Item)`. Release 2 adds `Item.quantity` and a `Restock` method
/// taking a new `RestockRequest` message.
pub fn inventory_file_descriptor_set(release: u32) -> FileDescriptorSet {
    let field = |name: &str, number: i32, r#type: Type| FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(r#type as i32),
        ..Default::default()
    };
    let method = |name: &str, input: &str| MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(format!(".inventory.{input}")),
        output_type: Some(".inventory.Item".into()),
        ..Default::default()
    };

    let mut item = DescriptorProto {
        name: Some("Item".into()),
        field: vec![field("sku", 1, Type::String)],
        ..Default::default()
    };
    let mut stock = ServiceDescriptorProto {
        name: Some("Stock".into()),
        method: vec![method("Get", "Item")],
        ..Default::default()
    };
    let mut messages = Vec::new();

    if release >= 2 {
        item.field.push(field("quantity", 2, Type::Int32));
        stock.method.push(method("Restock", "RestockRequest"));
        messages.push(DescriptorProto {
            name: Some("RestockRequest".into()),
            field: vec![field("sku", 1, Type::String), field("amount", 2, Type::Int32)],
            ..Default::default()
        });
    }
    messages.insert(0, item);

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some(INVENTORY_FILE.into()),
            package: Some("inventory".into()),
            message_type: messages,
            service: vec![stock],
            syntax: Some("proto3".into()),
            ..Default::default()
        }],
    }
}

/// Reflection alone, describing the given inventory release.
pub fn inventory_routes(release: u32) -> Routes {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(inventory_file_descriptor_set(release))
        .build_v1()
        .expect("Failed to setup Reflection Service");

    Routes::new(reflection)
}

/// Writes the encoded echo descriptor set to a temporary file.
pub fn descriptor_file() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("echo.pb");
    std::fs::write(&path, echo_service::encoded_file_descriptor_set())
        .expect("Failed to write descriptor set");
    (dir, path)
}

pub fn store_config(path: Option<PathBuf>, prefer_over_reflection: bool) -> DescriptorSetConfig {
    DescriptorSetConfig {
        enabled: true,
        path,
        prefer_over_reflection,
        include_source_info: true,
    }
}

pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        interval_ms: 10,
    }
}

pub fn discoverer(
    routes: Routes,
    descriptor_set: DescriptorSetConfig,
) -> ServiceDiscoverer<InProcessConnection<CountingService<Routes>>> {
    ServiceDiscoverer::new(
        InProcessConnection::new(CountingService::new(routes)),
        descriptor_set,
        fast_policy(3),
    )
}

/// Counts every request passed to the inner service.
#[derive(Debug, Clone)]
pub struct CountingService<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
}

impl<S> CountingService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<S> Service<http::Request<Body>> for CountingService<S>
where
    S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>,
    S::Future: Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(self.inner.call(req))
    }
}

/// A transport that hands out an in-process service instead of a network channel.
#[derive(Debug)]
pub struct InProcessConnection<S> {
    service: Mutex<S>,
    upgrade: Mutex<Option<S>>,
    connected: AtomicBool,
    failing_reconnects: AtomicU32,
    reconnects: AtomicU32,
}

impl<S> InProcessConnection<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Mutex::new(service),
            upgrade: Mutex::new(None),
            connected: AtomicBool::new(false),
            failing_reconnects: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
        }
    }

    /// The first successful reconnect lands on `next`, as if the server had been redeployed.
    pub fn with_upgrade(self, next: S) -> Self {
        *self.upgrade.lock() = Some(next);
        self
    }

    /// The next `count` reconnects fail.
    pub fn with_failing_reconnects(self, count: u32) -> Self {
        self.failing_reconnects.store(count, Ordering::SeqCst);
        self
    }

    pub fn service(&self) -> S
    where
        S: Clone,
    {
        self.service.lock().clone()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl<S> ConnectionProvider for InProcessConnection<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Service = S;

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ConnectionError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_reconnects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reconnects.store(failing - 1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            return Err(ConnectionError::NotConnected);
        }

        if let Some(next) = self.upgrade.lock().take() {
            *self.service.lock() = next;
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connection(&self) -> Option<S> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.service.lock().clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn health_check(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
