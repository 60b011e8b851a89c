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

//! Managed TCP connection
//!
//! A [`Connection`] owns both halves of a socket. The read half is driven by a
//! single listening session that frames inbound bytes into [`Message`]s; the
//! write half is shared by all writers behind an async lock, so writes never
//! interleave. Every connection also runs a keep-alive task from the moment it
//! is wrapped until it is disposed.

use crate::keepalive;
use crate::payload::{PayloadCodec, PayloadFormat};
use crate::registry::ConnectionRegistry;
use crate::subscribers::Subscribers;
use crate::{
    ConnectionConfig, ConnectionId, ConnectionInfo, ConnectionListener, ConnectionState, Message,
    Result, ServiceError, SubscriptionId,
};
use bytes::{Bytes, BytesMut};
use futures_util::{FutureExt, SinkExt, StreamExt};
use lineserve_codec::{LineCodec, TERMINATOR};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

type Reader = FramedRead<OwnedReadHalf, LineCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LineCodec>;

/// A line-oriented TCP connection
///
/// Connections are always handled through an `Arc`; the keep-alive task and the
/// owning registry only keep weak references.
pub struct Connection {
    // Metadata (lock-free access)
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    created_at: Instant,
    config: ConnectionConfig,
    state: AtomicU8,

    // Socket halves, taken during disposal
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,

    // Parent of every read session and write scope
    io: CancellationToken,
    read_scope: StdMutex<Option<CancellationToken>>,
    keep_alive: CancellationToken,
    disposed: CancellationToken,

    listeners: Subscribers<dyn ConnectionListener>,
    registry: StdMutex<Option<Weak<ConnectionRegistry>>>,

    // Metrics (lock-free)
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl Connection {
    /// Wrap an accepted TCP stream
    ///
    /// Starts the keep-alive task when `config.keep_alive_interval` is set. The
    /// connection does not read until [`start_listening`](Self::start_listening)
    /// is called.
    #[instrument(skip(socket, config), fields(connection_id = %id))]
    pub fn wrap(socket: TcpStream, id: ConnectionId, config: ConnectionConfig) -> Result<Arc<Self>> {
        let peer_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr()?;

        info!(peer_addr = %peer_addr, "Creating new connection");

        counter!("lineserve.connections.total").increment(1);
        gauge!("lineserve.connections.active").increment(1.0);

        let (read_half, write_half) = socket.into_split();
        let reader = FramedRead::new(
            read_half,
            LineCodec::with_max_length(config.max_message_length),
        );
        let writer = FramedWrite::new(write_half, LineCodec::new());

        let connection = Arc::new(Self {
            id,
            peer_addr,
            local_addr,
            created_at: Instant::now(),
            config,
            state: AtomicU8::new(ConnectionState::Created.as_u8()),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            io: CancellationToken::new(),
            read_scope: StdMutex::new(None),
            keep_alive: CancellationToken::new(),
            disposed: CancellationToken::new(),
            listeners: Subscribers::new(),
            registry: StdMutex::new(None),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        });

        if let Some(interval) = connection.config.keep_alive_interval {
            let weak = Arc::downgrade(&connection);
            let cancel = connection.keep_alive.clone();
            tokio::spawn(async move {
                let outcome = keepalive::run_keep_alive(weak, interval, cancel).await;
                trace!(connection_id = %id, ?outcome, "Keep-alive stopped");
            });
        }

        Ok(connection)
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns true once disposal has started
    pub fn is_disposed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Remote address, or `None` once disposed
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        (!self.is_disposed()).then_some(self.peer_addr)
    }

    /// Local address, or `None` once disposed
    pub fn local_addr(&self) -> Option<SocketAddr> {
        (!self.is_disposed()).then_some(self.local_addr)
    }

    /// Get when the connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Get messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get a point-in-time snapshot of this connection
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            state: self.state(),
            peer_addr: self.peer_addr(),
            local_addr: self.local_addr(),
            created_at: self.created_at,
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
        }
    }

    /// Register a listener for this connection's events
    pub fn subscribe(&self, listener: Arc<dyn ConnectionListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    /// Remove a previously registered listener
    ///
    /// Returns `false` if the subscription was not found.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.listeners.unsubscribe(subscription)
    }

    /// Run the read loop until the peer closes, an error occurs, or `cancel`
    /// (or [`stop_listening`](Self::stop_listening)) ends the session
    ///
    /// Every complete message is delivered to the listeners in arrival order.
    /// Whatever ends the session, the connection is removed from its registry
    /// and disposed before this returns. Transport errors are logged, not
    /// returned.
    ///
    /// # Errors
    ///
    /// `AlreadyListening` if a session is active, `ConnectionDisposed` if the
    /// connection has been disposed.
    #[instrument(skip(self, cancel), fields(connection_id = %self.id))]
    pub async fn start_listening(&self, cancel: CancellationToken) -> Result<()> {
        // Held across the transition so stop_listening never sees Listening without a scope
        let session = {
            let mut scope = self
                .read_scope
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(current) = self.state.compare_exchange(
                ConnectionState::Created.as_u8(),
                ConnectionState::Listening.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                return Err(match ConnectionState::from_u8(current) {
                    ConnectionState::Listening => ServiceError::AlreadyListening(self.id),
                    _ => ServiceError::ConnectionDisposed(self.id),
                });
            }
            let session = self.io.child_token();
            *scope = Some(session.clone());
            session
        };
        debug!("Read session started");

        match self.read_loop(&session, &cancel).await {
            Ok(()) => debug!("Read session ended"),
            Err(e) if e.is_transport_error() => debug!(error = %e, "Read session ended by peer"),
            Err(e) => {
                counter!("lineserve.errors.read").increment(1);
                warn!(error = %e, "Read session failed");
            }
        }

        self.read_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.dispose().await;
        Ok(())
    }

    async fn read_loop(&self, session: &CancellationToken, cancel: &CancellationToken) -> Result<()> {
        let mut guard = self.reader.lock().await;
        let result = match guard.as_mut() {
            Some(reader) => self.receive_messages(reader, session, cancel).await,
            None => Ok(()),
        };
        // The session owns the read half from here on; nothing reads it again
        guard.take();
        result
    }

    async fn receive_messages(
        &self,
        reader: &mut Reader,
        session: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                () = session.cancelled() => return Ok(()),
                () = cancel.cancelled() => return Ok(()),
                next = reader.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!("Peer closed the connection");
                    return Ok(());
                }
            };

            let length = bytes.len() as u64;
            self.messages_received.fetch_add(1, Ordering::Relaxed);
            self.bytes_received.fetch_add(length, Ordering::Relaxed);
            counter!("lineserve.messages.received").increment(1);
            counter!("lineserve.bytes.received").increment(length);
            trace!(length, "Message received");

            let message = Message::with_format(bytes, self.config.payload_format);
            for listener in self.listeners.snapshot() {
                listener.on_received(self, &message).await;
            }
        }
    }

    /// Signal the active read session to stop
    ///
    /// Returns immediately; the session ends (and the connection is disposed)
    /// asynchronously. Does nothing when no session is active.
    pub fn stop_listening(&self) {
        let scope = self
            .read_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(scope) = scope {
            debug!(connection_id = %self.id, "Stopping read session");
            scope.cancel();
        }
    }

    /// Write bytes verbatim
    ///
    /// Writes are serialized: each one is flushed completely before the next
    /// begins. Listeners are notified with the exact bytes once the write has
    /// completed. A failed write disposes the connection.
    #[instrument(skip(self, bytes), fields(connection_id = %self.id))]
    pub async fn write(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes = bytes.into();
        if self.is_disposed() {
            return Err(ServiceError::ConnectionDisposed(self.id));
        }

        let start = Instant::now();
        let outcome = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => self.send(writer, bytes.clone()).await,
                None => Err(ServiceError::ConnectionDisposed(self.id)),
            }
        };

        match outcome {
            Ok(()) => {
                let length = bytes.len() as u64;
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(length, Ordering::Relaxed);
                counter!("lineserve.messages.sent").increment(1);
                counter!("lineserve.bytes.sent").increment(length);
                histogram!("lineserve.write.duration").record(start.elapsed().as_secs_f64());
                trace!(length, "Write completed");

                for listener in self.listeners.snapshot() {
                    listener.on_sent(self, &bytes).await;
                }
                Ok(())
            }
            Err(ServiceError::ConnectionDisposed(id)) => Err(ServiceError::ConnectionDisposed(id)),
            Err(e) => {
                counter!("lineserve.errors.write").increment(1);
                if matches!(e, ServiceError::Timeout) {
                    counter!("lineserve.errors.timeout").increment(1);
                }
                if e.is_transport_error() {
                    debug!(error = %e, "Write failed, peer is gone");
                } else {
                    warn!(error = %e, "Write failed");
                }
                self.dispose().await;
                Err(e)
            }
        }
    }

    async fn send(&self, writer: &mut Writer, bytes: Bytes) -> Result<()> {
        let scope = self.io.child_token();
        tokio::select! {
            () = scope.cancelled() => Err(ServiceError::ConnectionDisposed(self.id)),
            result = time::timeout(self.config.write_timeout, SinkExt::<Bytes>::send(writer, bytes)) => {
                match result {
                    Ok(sent) => sent.map_err(ServiceError::from),
                    Err(_) => Err(ServiceError::Timeout),
                }
            }
        }
    }

    /// Write `text` followed by `\r\n`
    pub async fn write_line(&self, text: &str) -> Result<()> {
        let mut line = BytesMut::with_capacity(text.len() + TERMINATOR.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(TERMINATOR);
        self.write(line.freeze()).await
    }

    /// Serialize `value` with the connection's payload format and write it as
    /// a single line
    pub async fn write_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let payload = self.config.payload_format.encode(value)?;
        self.write_payload(payload).await
    }

    /// Serialize `value` with an explicit payload codec and write it as a line
    pub async fn write_value_with<C: PayloadCodec, T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<()> {
        self.write_payload(C::encode(value)?).await
    }

    /// Payload format used by `write_value` and for received messages
    pub fn payload_format(&self) -> PayloadFormat {
        self.config.payload_format
    }

    async fn write_payload(&self, payload: Bytes) -> Result<()> {
        let mut line = BytesMut::with_capacity(payload.len() + TERMINATOR.len());
        line.extend_from_slice(&payload);
        line.extend_from_slice(TERMINATOR);
        self.write(line.freeze()).await
    }

    /// Dispose the connection
    ///
    /// Removes the connection from its registry (if any), cancels the read
    /// session, any in-flight write and the keep-alive task, then closes the
    /// socket. Safe to call any number of times from any task; concurrent
    /// callers wait for the single disposal to finish. Never fails.
    pub async fn dispose(&self) {
        let registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(registry) = registry {
            registry.remove(self.id).await;
        }
        self.close().await;
    }

    /// Release the socket without touching the registry
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub(crate) async fn close(&self) {
        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ConnectionState::from_u8(current).is_terminal())
                    .then_some(ConnectionState::Disposing.as_u8())
            })
            .is_ok();
        if !claimed {
            self.disposed.cancelled().await;
            return;
        }

        debug!("Disposing connection");

        // Read session and write scopes
        let scope = self
            .read_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scope) = scope {
            scope.cancel();
        }
        self.io.cancel();

        self.keep_alive.cancel();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.get_mut().shutdown().await
        {
            debug!(error = %e, "Socket shutdown failed");
        }
        // An active session drops the read half itself when it unwinds
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        self.state
            .store(ConnectionState::Disposed.as_u8(), Ordering::Release);
        gauge!("lineserve.connections.active").decrement(1.0);
        info!(
            duration = ?self.created_at.elapsed(),
            bytes_sent = self.bytes_sent(),
            bytes_received = self.bytes_received(),
            "Connection disposed"
        );
        self.disposed.cancel();

        for listener in self.listeners.snapshot() {
            listener.on_disposed(self).await;
        }
    }

    /// Wait until the connection has been disposed
    pub async fn closed(&self) {
        self.disposed.cancelled().await;
    }

    /// Check whether the peer is still connected
    ///
    /// Returns `false` if the socket is closed or reports not-connected.
    /// Otherwise writes the configured keep-alive bytes (skipped if empty) and reports
    /// the connected state after the write.
    pub async fn check_alive(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        // Without an active session nobody else would notice an orderly close
        if let Ok(mut guard) = self.reader.try_lock()
            && let Some(reader) = guard.as_mut()
        {
            let mut buf = [0u8; 1];
            if let Some(Ok(0) | Err(_)) = reader.get_mut().peek(&mut buf).now_or_never() {
                return false;
            }
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        if writer.get_ref().peer_addr().is_err() {
            return false;
        }
        if self.config.keep_alive_probe.is_empty() {
            return true;
        }

        let bytes = self.config.keep_alive_probe.clone();
        match self.send(writer, bytes).await {
            Ok(()) => writer.get_ref().peer_addr().is_ok(),
            Err(e) => {
                trace!(connection_id = %self.id, error = %e, "Keep-alive write failed");
                false
            }
        }
    }

    pub(crate) fn attach(&self, registry: Weak<ConnectionRegistry>) {
        *self.registry.lock().unwrap_or_else(PoisonError::into_inner) = Some(registry);
    }

    pub(crate) fn detach(&self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.io.cancel();
        self.keep_alive.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .field("created_at", &self.created_at)
            .finish()
    }
}
