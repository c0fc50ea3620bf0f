use common::{
    CountingService, InProcessConnection, descriptor_file, discoverer, echo_routes,
    echo_routes_without_reflection, fast_policy, inventory_routes, store_config,
};
use grmcp_core::config::DescriptorSetConfig;
use grmcp_core::discovery::{DiscoveryError, InvokeMethodError, ReconnectError};
use grmcp_core::grpc::invoker::InvokeError;
use grmcp_core::{ServiceDiscoverer, ToolBuilder};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;

fn names(discoverer: &ServiceDiscoverer<impl grmcp_core::ConnectionProvider>) -> Vec<String> {
    discoverer
        .get_services()
        .into_iter()
        .map(|s| s.name)
        .collect()
}

#[tokio::test]
async fn test_discovery_through_reflection() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let services = names(&discoverer);
    assert!(services.contains(&"echo.EchoService".to_string()));
    assert!(services.contains(&"Standalone".to_string()));
    assert!(!services.iter().any(|s| s.starts_with("grpc.")));

    let unary = discoverer.get_method("echo.EchoService", "UnaryEcho").unwrap();
    assert_eq!(unary.description, "Echoes the request.\nUnary only.");

    // Types learned through reflection become resolvable by name.
    assert!(discoverer.registry().message("echo.EchoRequest").is_some());
}

#[tokio::test]
async fn test_discovery_requires_a_connection_for_reflection() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());

    let result = discoverer.discover_services().await;

    assert!(matches!(result, Err(DiscoveryError::NotConnected)));
    assert_eq!(discoverer.service_count(), 0);
}

#[tokio::test]
async fn test_descriptor_set_is_preferred() {
    let (_dir, path) = descriptor_file();
    let discoverer = discoverer(
        echo_routes_without_reflection(),
        store_config(Some(path), true),
    );

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let services = names(&discoverer);
    assert_eq!(
        services,
        [
            "echo.EchoService",
            "echo.AdminService",
            "echo.AuditService",
            "Standalone"
        ]
    );

    let unary = discoverer.get_method("echo.EchoService", "UnaryEcho").unwrap();
    assert_eq!(unary.source.unwrap().to_string(), "echo/echo.proto:43:3");

    // The reflection service was never needed.
    let response = discoverer
        .invoke_method("echo.EchoService", "UnaryEcho", r#"{"message": "store"}"#)
        .await
        .unwrap();
    assert_eq!(response, r#"{"message":"store"}"#);
}

#[tokio::test]
async fn test_preferred_descriptor_set_needs_no_connection() {
    let (_dir, path) = descriptor_file();
    let config = store_config(Some(path), true);
    assert!(config.preferred_path().is_some());

    let discoverer = discoverer(echo_routes(), config);
    discoverer.discover_services().await.unwrap();

    assert!(!discoverer.is_connected());
    assert_eq!(discoverer.service_count(), 4);
    assert_eq!(discoverer.connection().service().calls(), 0);
}

#[tokio::test]
async fn test_source_info_can_be_left_out() {
    let (_dir, path) = descriptor_file();
    let mut config = store_config(Some(path), true);
    config.include_source_info = false;

    let discoverer = discoverer(echo_routes(), config);
    discoverer.discover_services().await.unwrap();

    let unary = discoverer.get_method("echo.EchoService", "UnaryEcho").unwrap();
    assert!(unary.description.is_empty());
    assert!(unary.source.is_none());
}

#[tokio::test]
async fn test_missing_descriptor_set_falls_back_to_reflection() {
    let missing = PathBuf::from("/definitely/not/here/echo.pb");
    let discoverer = discoverer(echo_routes(), store_config(Some(missing), true));

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    assert!(discoverer.get_service("echo.EchoService").is_some());
}

#[tokio::test]
async fn test_reflection_failure_falls_back_to_descriptor_set() {
    let (_dir, path) = descriptor_file();
    let discoverer = discoverer(
        echo_routes_without_reflection(),
        store_config(Some(path), false),
    );

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    assert_eq!(discoverer.service_count(), 4);
}

#[tokio::test]
async fn test_both_sources_failing_keeps_the_previous_catalog() {
    let (dir, path) = descriptor_file();
    let discoverer = discoverer(
        echo_routes_without_reflection(),
        store_config(Some(path.clone()), false),
    );

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();
    assert_eq!(discoverer.service_count(), 4);

    std::fs::write(&path, b"not a descriptor set").unwrap();

    let result = discoverer.discover_services().await;
    assert!(matches!(result, Err(DiscoveryError::DescriptorStore(_))));
    assert_eq!(discoverer.service_count(), 4);

    drop(dir);
}

#[tokio::test]
async fn test_enabled_store_without_path_uses_reflection() {
    let discoverer = discoverer(echo_routes(), store_config(None, true));

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    assert!(discoverer.get_service("Standalone").is_some());
}

#[tokio::test]
async fn test_invoke_method() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());
    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let response = discoverer
        .invoke_method("echo.EchoService", "UnaryEcho", r#"{"message": "hi", "tags": ["t"]}"#)
        .await
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value, serde_json::json!({"message": "hi", "tags": ["t"]}));
}

#[tokio::test]
async fn test_invoke_method_with_headers() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());
    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let response = discoverer
        .invoke_method_with_headers(
            vec![("x-request-id".into(), "abc".into())],
            "echo.EchoService",
            "UnaryEcho",
            "{}",
        )
        .await
        .unwrap();

    assert_eq!(response, r#"{"tags":["x-request-id=abc"]}"#);
}

#[tokio::test]
async fn test_rejected_invocations_never_touch_the_wire() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());
    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let counter = discoverer.connection().service().clone();
    let before = counter.calls();

    let missing = discoverer
        .invoke_method("echo.EchoService", "NoSuchMethod", "{}")
        .await;
    assert!(matches!(
        missing,
        Err(InvokeMethodError::MethodNotFound { service, method })
            if service == "echo.EchoService" && method == "NoSuchMethod"
    ));

    let streaming = discoverer
        .invoke_method("echo.EchoService", "ServerStreamingEcho", "{}")
        .await;
    assert!(matches!(
        streaming,
        Err(InvokeMethodError::StreamingNotSupported { .. })
    ));

    let bad_input = discoverer
        .invoke_method("echo.EchoService", "UnaryEcho", "{\"message\": ")
        .await;
    assert!(matches!(bad_input, Err(InvokeMethodError::Invoke(_))));

    assert_eq!(counter.calls(), before);
}

#[tokio::test]
async fn test_invoke_before_connect() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());

    let result = discoverer
        .invoke_method("echo.EchoService", "UnaryEcho", "{}")
        .await;

    assert!(matches!(result, Err(InvokeMethodError::NotConnected)));
}

#[tokio::test]
async fn test_reconnect_rediscovers() {
    let connection =
        InProcessConnection::new(CountingService::new(echo_routes())).with_failing_reconnects(2);
    let discoverer = ServiceDiscoverer::new(
        connection,
        DescriptorSetConfig::default(),
        fast_policy(3),
    );

    discoverer.connect().await.unwrap();
    discoverer.reconnect(&CancellationToken::new()).await.unwrap();

    assert_eq!(discoverer.connection().reconnects(), 3);
    assert!(discoverer.is_connected());
    assert!(discoverer.get_service("echo.EchoService").is_some());
}

#[tokio::test]
async fn test_reconnect_picks_up_an_upgraded_server() {
    let connection = InProcessConnection::new(CountingService::new(inventory_routes(1)))
        .with_upgrade(CountingService::new(inventory_routes(2)));
    let discoverer = ServiceDiscoverer::new(
        connection,
        DescriptorSetConfig::default(),
        fast_policy(3),
    );
    let tools = ToolBuilder::default();

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let stock = discoverer.get_service("inventory.Stock").unwrap();
    assert_eq!(stock.methods.len(), 1);
    let before = tools.build_tools(&discoverer.get_services());
    assert!(before[0].input_schema["properties"].get("quantity").is_none());

    discoverer.reconnect(&CancellationToken::new()).await.unwrap();

    let stock = discoverer.get_service("inventory.Stock").unwrap();
    let methods: Vec<&str> = stock.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(methods, ["Get", "Restock"]);

    let get = discoverer.get_method("inventory.Stock", "Get").unwrap();
    assert!(get.input.get_field_by_name("quantity").is_some());
    let restock = discoverer.get_method("inventory.Stock", "Restock").unwrap();
    assert_eq!(restock.input.full_name(), "inventory.RestockRequest");

    // The same builder compiles the new shape of `Item`.
    let after = tools.build_tools(&discoverer.get_services());
    let get_tool = after
        .iter()
        .find(|tool| tool.name == "inventory_stock_get")
        .unwrap();
    assert!(get_tool.input_schema["properties"].get("quantity").is_some());

    // The new field passes input validation; only the call fails, as nothing serves Stock.
    let result = discoverer
        .invoke_method("inventory.Stock", "Get", r#"{"sku": "a-1", "quantity": 3}"#)
        .await;
    assert!(matches!(
        result,
        Err(InvokeMethodError::Invoke(InvokeError::CallFailed(status)))
            if status.code() == tonic::Code::Unimplemented
    ));
}

#[tokio::test]
async fn test_reconnect_gives_up() {
    let connection =
        InProcessConnection::new(CountingService::new(echo_routes())).with_failing_reconnects(10);
    let discoverer = ServiceDiscoverer::new(
        connection,
        DescriptorSetConfig::default(),
        fast_policy(3),
    );

    let result = discoverer.reconnect(&CancellationToken::new()).await;

    match result {
        Err(ReconnectError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected Exhausted, got: {other:?}"),
    }
    assert_eq!(discoverer.connection().reconnects(), 3);
    assert!(!discoverer.is_connected());
}

#[tokio::test]
async fn test_reconnect_already_cancelled() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = discoverer.reconnect(&cancel).await;

    assert!(matches!(result, Err(ReconnectError::Cancelled { attempts: 0 })));
    assert_eq!(discoverer.connection().reconnects(), 0);
}

#[tokio::test]
async fn test_reconnect_cancelled_while_waiting() {
    let connection =
        InProcessConnection::new(CountingService::new(echo_routes())).with_failing_reconnects(10);
    let mut policy = fast_policy(5);
    policy.interval_ms = 60_000;
    let discoverer = ServiceDiscoverer::new(connection, DescriptorSetConfig::default(), policy);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), discoverer.reconnect(&cancel))
        .await
        .expect("Cancellation did not interrupt the wait");

    assert!(matches!(result, Err(ReconnectError::Cancelled { attempts: 1 })));
}

#[tokio::test]
async fn test_health_check_and_close() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());

    assert!(discoverer.health_check().await.is_err());

    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();
    discoverer.health_check().await.unwrap();
    assert!(discoverer.is_connected());

    discoverer.close().await;

    assert!(!discoverer.is_connected());
    assert_eq!(discoverer.service_count(), 0);
    assert!(discoverer.health_check().await.is_err());
    assert!(matches!(
        discoverer.invoke_method("echo.EchoService", "UnaryEcho", "{}").await,
        Err(InvokeMethodError::NotConnected)
    ));
}

#[tokio::test]
async fn test_stats() {
    let discoverer = discoverer(echo_routes(), DescriptorSetConfig::default());
    discoverer.connect().await.unwrap();
    discoverer.discover_services().await.unwrap();

    let stats = discoverer.stats();

    assert_eq!(stats.service_count, 4);
    // 6 echo methods, 2 admin, 1 audit and the standalone ping.
    assert_eq!(stats.method_count, 10);
    assert_eq!(discoverer.method_count(), 10);
    assert!(stats.is_connected);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["serviceCount"], 4);
    assert_eq!(json["isConnected"], true);
}
