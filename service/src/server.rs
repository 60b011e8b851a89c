//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Line server implementation
//!
//! The LineServer owns the listening socket and the accept loop. Accepted
//! sockets are turned into connections by a [`ConnectionFactory`] and added to
//! the [`ConnectionRegistry`]; the registry hooks start each connection's read
//! session and republish its traffic to the server's handlers.

use crate::registry::RegistryObserver;
use crate::subscribers::Subscribers;
use crate::{
    Connection, ConnectionFactory, ConnectionId, ConnectionInfo, ConnectionListener,
    ConnectionRegistry, DefaultConnectionFactory, Message, Result, ServerConfig, ServerHandler,
    ServerMetrics, ServerSnapshot, ServerState, ServiceError, SubscriptionId,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use lineserve_codec::TERMINATOR;
use metrics::counter;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Total number of connections attempted
    pub total: usize,
    /// Number of successful sends
    pub succeeded: usize,
    /// Number of failed sends
    pub failed: usize,
    /// Errors that occurred (ConnectionId and error message)
    pub errors: Vec<(ConnectionId, String)>,
}

impl BroadcastResult {
    /// Check if all broadcasts succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Get the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }
}

/// Line-oriented TCP server
///
/// # Example
///
/// ```no_run
/// use lineserve_service::{CallbackHandler, CancellationToken, LineServer, ServerConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = LineServer::new(ServerConfig::on_port(2323));
///     server.subscribe(Arc::new(CallbackHandler::default().on_message(
///         |id, _conn, message| println!("{id}: {}", message.text()),
///     )));
///
///     let address = server.start(CancellationToken::new()).await?;
///     println!("listening on {address}");
///
///     tokio::signal::ctrl_c().await?;
///     server.stop().await;
///     Ok(())
/// }
/// ```
pub struct LineServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    handlers: Subscribers<dyn ServerHandler>,
    factory: Arc<dyn ConnectionFactory>,
    metrics: Arc<ServerMetrics>,
    state: AtomicU8,
    /// Replaced on every start
    root: Mutex<CancellationToken>,
    /// Cancelled when the accept loop of the current run has wound down
    done: Mutex<CancellationToken>,
    local_addr: Mutex<Option<SocketAddr>>,
    republishers: Mutex<HashMap<ConnectionId, SubscriptionId>>,
    created_at: Instant,
    this: Weak<ServerInner>,
}

impl LineServer {
    /// Create a stopped server using the default connection factory
    pub fn new(config: ServerConfig) -> Self {
        Self::with_factory(config, DefaultConnectionFactory)
    }

    /// Create a stopped server with a custom connection factory
    pub fn with_factory(config: ServerConfig, factory: impl ConnectionFactory) -> Self {
        let done = CancellationToken::new();
        done.cancel();

        let inner = Arc::new_cyclic(|this: &Weak<ServerInner>| {
            let observer: Weak<dyn RegistryObserver> = this.clone();
            ServerInner {
                config,
                registry: Arc::new(ConnectionRegistry::with_observer(observer)),
                handlers: Subscribers::new(),
                factory: Arc::new(factory),
                metrics: Arc::new(ServerMetrics::new()),
                state: AtomicU8::new(ServerState::Stopped.as_u8()),
                root: Mutex::new(CancellationToken::new()),
                done: Mutex::new(done),
                local_addr: Mutex::new(None),
                republishers: Mutex::new(HashMap::new()),
                created_at: Instant::now(),
                this: this.clone(),
            }
        });
        Self { inner }
    }

    /// Bind the listening socket and start accepting connections
    ///
    /// Clears the registry, binds `config.bind_address` and spawns the accept
    /// loop, which runs until [`stop`](Self::stop) is called or `cancel` fires.
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` unless the server is stopped, `InvalidConfig` if the
    /// configuration fails validation, `Bind` if the socket cannot be bound.
    #[instrument(skip(self, cancel), fields(address = %self.inner.config.bind_address))]
    pub async fn start(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        let inner = &self.inner;
        inner.config.validate()?;

        // Tokens are swapped under the root lock together with the state, so a
        // concurrent `stop` sees either the previous run or this one.
        let root = CancellationToken::new();
        let done = CancellationToken::new();
        {
            let mut current = inner.root.lock().unwrap_or_else(PoisonError::into_inner);
            if inner
                .state
                .compare_exchange(
                    ServerState::Stopped.as_u8(),
                    ServerState::Starting.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return Err(ServiceError::AlreadyRunning);
            }
            *current = root.clone();
            *inner.done.lock().unwrap_or_else(PoisonError::into_inner) = done.clone();
        }
        inner.publish_state(ServerState::Starting).await;
        inner.registry.clear().await;

        let (listener, local_addr) = match bind(inner.config.bind_address).await {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Failed to bind listening socket");
                inner.publish_state(ServerState::Stopped).await;
                done.cancel();
                return Err(e);
            }
        };

        *inner.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);

        inner.publish_state(ServerState::Running).await;
        info!(address = %local_addr, "Line server started");

        tokio::spawn(inner.clone().accept_loop(listener, root, cancel, done));
        Ok(local_addr)
    }

    /// Stop accepting connections and dispose every live connection
    ///
    /// Idempotent. Waits up to `config.shutdown_timeout` for the current run to
    /// wind down; a run still starting is stopped as soon as its accept loop is
    /// spawned.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        let (root, done) = {
            let root = inner.root.lock().unwrap_or_else(PoisonError::into_inner);
            let done = inner.done.lock().unwrap_or_else(PoisonError::into_inner);
            (root.clone(), done.clone())
        };
        root.cancel();
        let disposed = inner.registry.clear().await;

        if time::timeout(inner.config.shutdown_timeout, done.cancelled())
            .await
            .is_err()
        {
            warn!(
                timeout = ?inner.config.shutdown_timeout,
                "Accept loop did not exit in time"
            );
        }
        debug!(disposed, "Stop completed");
    }

    /// Wait until the accept loop of the current run has exited
    ///
    /// Resolves immediately if the server was never started.
    pub async fn stopped(&self) {
        let done = self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        done.cancelled().await;
    }

    /// Register a handler for connection and server events
    pub fn subscribe(&self, handler: Arc<dyn ServerHandler>) -> SubscriptionId {
        self.inner.handlers.subscribe(handler)
    }

    /// Remove a previously registered handler
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.inner.handlers.unsubscribe(subscription)
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ServerState {
        self.inner.state()
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Get the bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a connection by ID
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.registry.get(id)
    }

    /// Get all live connection IDs
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.registry.ids()
    }

    /// Get the number of live connections
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Get info for all live connections
    pub fn connection_infos(&self) -> Vec<ConnectionInfo> {
        self.inner.registry.infos()
    }

    /// Write bytes verbatim to one connection
    pub async fn send_to(&self, id: ConnectionId, bytes: impl Into<Bytes>) -> Result<()> {
        let connection = self
            .connection(id)
            .ok_or(ServiceError::ConnectionNotFound(id))?;
        connection.write(bytes).await
    }

    /// Write bytes verbatim to every live connection
    ///
    /// Writes run concurrently; a failure on one connection does not affect
    /// the others.
    pub async fn broadcast(&self, bytes: impl Into<Bytes>) -> BroadcastResult {
        let bytes = bytes.into();
        let connections = self.inner.registry.snapshot();
        let mut result = BroadcastResult {
            total: connections.len(),
            ..Default::default()
        };

        let sends = connections.iter().map(|conn| {
            let bytes = bytes.clone();
            async move { (conn.id(), conn.write(bytes).await) }
        });

        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }
        result
    }

    /// Write `text` followed by `\r\n` to every live connection
    pub async fn broadcast_line(&self, text: &str) -> BroadcastResult {
        let mut line = BytesMut::with_capacity(text.len() + TERMINATOR.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(TERMINATOR);
        self.broadcast(line.freeze()).await
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            state: self.state(),
            active_connections: self.connection_count(),
            total_connections: self.inner.metrics.total_connections(),
            bind_address: self.local_addr(),
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.inner.metrics.clone()
    }

    /// Get the connection registry
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.inner.registry.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

async fn bind(address: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ServiceError::Bind { address, source })?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

/// Accept errors that mean the listening socket itself is unusable
fn is_listener_failure(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::InvalidInput | ErrorKind::PermissionDenied | ErrorKind::Unsupported
    )
}

impl ServerInner {
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn root(&self) -> CancellationToken {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn publish_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::Release);
        debug!(state = %state, "Server state changed");
        for handler in self.handlers.snapshot() {
            handler.on_state_changed(state).await;
        }
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        root: CancellationToken,
        cancel: CancellationToken,
        done: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                () = root.cancelled() => break,
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => self.admit(socket, peer_addr).await,
                Err(e) if is_listener_failure(&e) => {
                    error!(error = %e, "Listening socket failed");
                    self.metrics.accept_error();
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    self.metrics.accept_error();
                    counter!("lineserve.errors.accept").increment(1);

                    // Back off on errors to avoid tight loop
                    tokio::select! {
                        () = root.cancelled() => break,
                        () = cancel.cancelled() => break,
                        () = time::sleep(self.config.accept_backoff) => {}
                    }
                }
            }
        }

        drop(listener);
        self.publish_state(ServerState::Stopping).await;
        root.cancel();
        let disposed = self.registry.clear().await;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.publish_state(ServerState::Stopped).await;
        info!(disposed, "Line server stopped");
        done.cancel();
    }

    async fn admit(&self, socket: TcpStream, peer_addr: SocketAddr) {
        debug!(peer_addr = %peer_addr, "Accepted connection");

        if self.registry.len() >= self.config.max_connections {
            warn!(
                peer_addr = %peer_addr,
                limit = self.config.max_connections,
                "Connection limit reached, rejecting connection"
            );
            self.metrics.connection_rejected();
            counter!("lineserve.connections.rejected").increment(1);
            return;
        }

        let connection = match self.factory.create(socket, &self.config.connection) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(peer_addr = %peer_addr, error = %e, "Failed to create connection");
                self.metrics.connection_error();
                return;
            }
        };

        if let Err(e) = self.registry.add(connection.clone()).await {
            warn!(connection_id = %connection.id(), error = %e, "Failed to register connection");
            self.metrics.connection_error();
            connection.dispose().await;
        }
    }
}

#[async_trait]
impl RegistryObserver for ServerInner {
    async fn on_added(&self, connection: &Arc<Connection>) {
        let id = connection.id();
        let republisher = Arc::new(Republisher {
            server: self.this.clone(),
        });
        let subscription = connection.subscribe(republisher);
        self.republishers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscription);
        self.metrics.connection_opened();

        // Removed before this hook ran; whoever takes the entry closes the books
        if connection.is_disposed() {
            let subscription = self
                .republishers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            if let Some(subscription) = subscription {
                connection.unsubscribe(subscription);
                self.metrics
                    .connection_closed(connection.created_at().elapsed());
            }
            return;
        }

        info!(
            connection_id = %id,
            peer_addr = ?connection.peer_addr(),
            "Connection established"
        );
        for handler in self.handlers.snapshot() {
            handler.on_connect(id, connection).await;
        }

        if self.state().is_running() {
            let session = self.root().child_token();
            let connection = connection.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.start_listening(session).await {
                    debug!(connection_id = %connection.id(), error = %e, "Connection did not start listening");
                }
            });
        }
    }

    async fn on_removed(&self, connection: &Arc<Connection>) {
        let id = connection.id();
        let subscription = self
            .republishers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(subscription) = subscription else {
            return;
        };
        connection.unsubscribe(subscription);
        self.metrics
            .connection_closed(connection.created_at().elapsed());

        info!(connection_id = %id, "Connection closed");
        for handler in self.handlers.snapshot() {
            handler.on_disconnect(id, connection).await;
        }
    }
}

/// Forwards one connection's traffic to the server's handlers
struct Republisher {
    server: Weak<ServerInner>,
}

#[async_trait]
impl ConnectionListener for Republisher {
    async fn on_received(&self, conn: &Connection, message: &Message) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        server.metrics.message_received(message.len() as u64);
        for handler in server.handlers.snapshot() {
            handler.on_message(conn.id(), conn, message).await;
        }
    }

    async fn on_sent(&self, conn: &Connection, bytes: &Bytes) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        server.metrics.message_sent(bytes.len() as u64);
        for handler in server.handlers.snapshot() {
            handler.on_sent(conn.id(), conn, bytes).await;
        }
    }
}

impl std::fmt::Debug for LineServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("connection_count", &self.connection_count())
            .field("uptime", &self.inner.created_at.elapsed())
            .finish()
    }
}

// Implement Drop to ensure cleanup
impl Drop for LineServer {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("LineServer dropped while still running");
            self.inner.root().cancel();
        }
    }
}
