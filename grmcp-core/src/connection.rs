//! # Connection Manager
//!
//! Owns the single HTTP/2 channel to the target server.
//!
//! [`ConnectionManager::connect`] dials eagerly with the configured keep-alive settings and
//! then runs a liveness probe: a unary call to `grpc.health.v1.Health/Check`. Any answer from
//! the server, `UNIMPLEMENTED` included, proves the transport works. Only transport level
//! failures (`UNAVAILABLE`, `CANCELLED`, `DEADLINE_EXCEEDED`) or a client that never becomes
//! ready fail the probe, in which case the new channel is dropped.
//!
//! The channel slot sits behind an async read/write lock: `connect`, `reconnect` and `close`
//! take the write lock for the whole swap, everything else only reads.
use crate::config::ConnectionConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tonic_prost::ProstCodec;

/// Upper bound for a single liveness probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Dialed, not probed yet.
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Ready => "READY",
            ConnectionState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectionState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid target '{target}': '{source}'")]
    InvalidEndpoint {
        target: String,
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} connecting to '{target}'")]
    ConnectTimeout { target: String, timeout: Duration },
    #[error("Failed to connect to '{target}': '{source}'")]
    ConnectFailed {
        target: String,
        source: tonic::transport::Error,
    },
    #[error("No connection")]
    NotConnected,
    #[error("Connection is unhealthy, state: {0}")]
    Unhealthy(ConnectionState),
    #[error("Health check timed out after {0:?}")]
    HealthCheckTimeout(Duration),
    #[error("Health check failed: code={:?} message={:?}", .0.code(), .0.message())]
    ProbeFailed(#[source] Status),
}

/// The transport seen by [`crate::ServiceDiscoverer`].
///
/// [`ConnectionManager`] is the production implementation. Tests plug in-process services in
/// through this trait.
pub trait ConnectionProvider: Send + Sync {
    type Service: Clone + Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn reconnect(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// A handle to the current connection, if any.
    ///
    /// Waits while a connect or reconnect is in progress. For [`ConnectionManager`] that is up
    /// to the connect timeout plus the 5s health probe, and callers such as a backend rebuild
    /// or a health check wait with it.
    fn connection(&self) -> impl Future<Output = Option<Self::Service>> + Send;

    fn is_connected(&self) -> bool;

    fn health_check(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub target: String,
    pub state: Option<ConnectionState>,
    pub connected: bool,
    pub connected_at: Option<SystemTime>,
}

#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    channel: RwLock<Option<Channel>>,
    state: Mutex<Option<ConnectionState>>,
    connected_at: Mutex<Option<SystemTime>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            channel: RwLock::new(None),
            state: Mutex::new(None),
            connected_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// `None` until the first call to [`Self::connect`].
    pub fn state(&self) -> Option<ConnectionState> {
        *self.state.lock()
    }

    /// Closes any previous channel, dials the target and probes it.
    ///
    /// The channel slot stays write-locked until the probe returns, so [`Self::connection`]
    /// callers wait for the outcome instead of seeing a half-established channel.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut slot = self.channel.write().await;

        if slot.take().is_some() {
            tracing::debug!("Closing previous connection");
        }

        let target = self.config.target();
        self.set_state(ConnectionState::Connecting);

        let channel = match self.dial(&target).await {
            Ok(channel) => channel,
            Err(err) => {
                self.set_state(ConnectionState::TransientFailure);
                return Err(err);
            }
        };

        self.set_state(ConnectionState::Idle);

        if let Err(err) = probe(channel.clone(), HEALTH_CHECK_TIMEOUT).await {
            tracing::warn!(endpoint = %target, error = %err, "Connection failed its health check");
            self.set_state(ConnectionState::TransientFailure);
            return Err(err);
        }

        *slot = Some(channel);
        *self.connected_at.lock() = Some(SystemTime::now());
        self.set_state(ConnectionState::Ready);

        tracing::info!(endpoint = %target, "Connected to gRPC server");

        Ok(())
    }

    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        tracing::info!(endpoint = %self.config.target(), "Reconnecting to gRPC server");
        self.connect().await
    }

    pub async fn connection(&self) -> Option<Channel> {
        self.channel.read().await.clone()
    }

    /// True while the channel is `Ready` or `Idle`.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            Some(ConnectionState::Ready | ConnectionState::Idle)
        )
    }

    /// Fails immediately in `TransientFailure` or `Shutdown`, otherwise re-probes the server.
    pub async fn health_check(&self) -> Result<(), ConnectionError> {
        if let Some(state @ (ConnectionState::TransientFailure | ConnectionState::Shutdown)) =
            self.state()
        {
            return Err(ConnectionError::Unhealthy(state));
        }

        let channel = self
            .connection()
            .await
            .ok_or(ConnectionError::NotConnected)?;

        match probe(channel, HEALTH_CHECK_TIMEOUT).await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::TransientFailure);
                Err(err)
            }
        }
    }

    /// Drops the channel. Calling it again is a no-op.
    pub async fn close(&self) {
        let mut slot = self.channel.write().await;

        if slot.take().is_some() {
            tracing::info!(endpoint = %self.config.target(), "Closed gRPC connection");
        }

        self.set_state(ConnectionState::Shutdown);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            target: self.config.target(),
            state: self.state(),
            connected: self.is_connected(),
            connected_at: *self.connected_at.lock(),
        }
    }

    async fn dial(&self, target: &str) -> Result<Channel, ConnectionError> {
        let keep_alive = &self.config.keep_alive;
        let timeout = self.config.connect_timeout();

        let endpoint = Endpoint::from_shared(target.to_string())
            .map_err(|source| ConnectionError::InvalidEndpoint {
                target: target.to_string(),
                source,
            })?
            .connect_timeout(timeout)
            .http2_keep_alive_interval(keep_alive.interval())
            .keep_alive_timeout(keep_alive.timeout())
            .keep_alive_while_idle(keep_alive.permit_without_stream);

        match tokio::time::timeout(timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(source)) => Err(ConnectionError::ConnectFailed {
                target: target.to_string(),
                source,
            }),
            Err(_) => Err(ConnectionError::ConnectTimeout {
                target: target.to_string(),
                timeout,
            }),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        let previous = *current;
        if previous != Some(state) {
            tracing::debug!(from = ?previous, to = %state, "Connection state changed");
            *current = Some(state);
        }
    }
}

impl ConnectionProvider for ConnectionManager {
    type Service = Channel;

    async fn connect(&self) -> Result<(), ConnectionError> {
        ConnectionManager::connect(self).await
    }

    async fn reconnect(&self) -> Result<(), ConnectionError> {
        ConnectionManager::reconnect(self).await
    }

    async fn connection(&self) -> Option<Channel> {
        ConnectionManager::connection(self).await
    }

    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    async fn health_check(&self) -> Result<(), ConnectionError> {
        ConnectionManager::health_check(self).await
    }

    async fn close(&self) {
        ConnectionManager::close(self).await
    }
}

/// Status codes meaning the request never got a real answer from the server.
fn is_transport_failure(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::Cancelled | Code::DeadlineExceeded
    )
}

/// Sends an empty `grpc.health.v1.HealthCheckRequest` and waits for any server answer.
async fn probe(channel: Channel, timeout: Duration) -> Result<(), ConnectionError> {
    let mut client = tonic::client::Grpc::new(channel);

    let call = async {
        client
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("Client not ready: {e}")))?;

        let mut request = tonic::Request::new(());
        request.set_timeout(timeout);

        let codec: ProstCodec<(), ()> = ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(HEALTH_CHECK_PATH);

        client.unary(request, path, codec).await.map(|_| ())
    };

    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(ConnectionError::HealthCheckTimeout(timeout)),
        Ok(Ok(())) => Ok(()),
        Ok(Err(status)) if is_transport_failure(status.code()) => {
            Err(ConnectionError::ProbeFailed(status))
        }
        Ok(Err(status)) => {
            tracing::trace!(code = ?status.code(), "Server answered the health probe");
            Ok(())
        }
    }
}
