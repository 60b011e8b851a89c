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

//! Registry of live connections
//!
//! The registry is responsible for:
//! - Tracking every live connection by ID
//! - Tying membership to lifecycle: a removed connection is always disposed,
//!   and a disposed connection always removes itself
//! - Calling the [`RegistryObserver`] hooks after each membership change
//!
//! All mutations go through one mutex, which is never held across an await.

use crate::{Connection, ConnectionId, ConnectionInfo, Result, ServiceError};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

/// Lifecycle hooks called after registry membership changes
#[async_trait]
pub trait RegistryObserver: Send + Sync + 'static {
    /// Called after a connection has been inserted
    async fn on_added(&self, _connection: &Arc<Connection>) {}

    /// Called after a connection has been removed and disposed
    async fn on_removed(&self, _connection: &Arc<Connection>) {}
}

/// The set of live connections, keyed by ID
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    observer: Option<Weak<dyn RegistryObserver>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry without an observer
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    /// Create an empty registry that reports changes to `observer`
    pub fn with_observer(observer: Weak<dyn RegistryObserver>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            observer: Some(observer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn observer(&self) -> Option<Arc<dyn RegistryObserver>> {
        self.observer.as_ref().and_then(Weak::upgrade)
    }

    /// Insert a connection
    ///
    /// The connection is bound to this registry, so disposing it later removes
    /// it again.
    ///
    /// # Errors
    ///
    /// `DuplicateConnection` if the ID is already registered,
    /// `ConnectionDisposed` if the connection is already disposed.
    pub async fn add(self: &Arc<Self>, connection: Arc<Connection>) -> Result<()> {
        let id = connection.id();
        {
            let mut connections = self.lock();
            if connections.contains_key(&id) {
                return Err(ServiceError::DuplicateConnection(id));
            }
            if connection.is_disposed() {
                return Err(ServiceError::ConnectionDisposed(id));
            }
            connection.attach(Arc::downgrade(self));
            connections.insert(id, connection.clone());
        }
        trace!(connection_id = %id, "Connection registered");

        // Disposed between the check and the attach; it could not remove itself
        if connection.is_disposed() {
            self.remove(id).await;
            return Err(ServiceError::ConnectionDisposed(id));
        }

        if let Some(observer) = self.observer() {
            observer.on_added(&connection).await;
        }
        Ok(())
    }

    /// Remove a connection and dispose it
    ///
    /// Returns the removed connection, or `None` if the ID was not registered.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let connection = self.lock().remove(&id)?;
        self.release(&connection).await;
        Some(connection)
    }

    /// Remove and dispose every connection
    ///
    /// Connections are disposed concurrently. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().map(|(_, conn)| conn).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Clearing connection registry");
        }
        join_all(drained.iter().map(|conn| self.release(conn))).await;
        drained.len()
    }

    async fn release(&self, connection: &Arc<Connection>) {
        connection.detach();
        connection.close().await;
        trace!(connection_id = %connection.id(), "Connection unregistered");
        if let Some(observer) = self.observer() {
            observer.on_removed(connection).await;
        }
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().get(&id).cloned()
    }

    /// Check whether an ID is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Get all registered IDs
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().keys().copied().collect()
    }

    /// Get all registered connections
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    /// Get info for all registered connections
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.lock().values().map(|conn| conn.info()).collect()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no connections are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionConfig, ConnectionState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpStream};

    async fn connection() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let config = ConnectionConfig::default().with_keep_alive_interval(None);
        let conn = Connection::wrap(socket, ConnectionId::next(), config).unwrap();
        (conn, client)
    }

    #[derive(Default)]
    struct Counting {
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    #[async_trait]
    impl RegistryObserver for Counting {
        async fn on_added(&self, _connection: &Arc<Connection>) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_removed(&self, connection: &Arc<Connection>) {
            assert_eq!(connection.state(), ConnectionState::Disposed);
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _client) = connection().await;
        let id = conn.id();

        registry.add(conn.clone()).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
        assert_eq!(registry.ids(), vec![id]);

        let removed = registry.remove(id).await.unwrap();
        assert_eq!(removed.id(), id);
        assert_eq!(conn.state(), ConnectionState::Disposed);
        assert!(registry.is_empty());
        assert!(registry.remove(id).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _client) = connection().await;

        registry.add(conn.clone()).await.unwrap();
        let err = registry.add(conn).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateConnection(_)));
    }

    #[tokio::test]
    async fn test_dispose_removes_from_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _client) = connection().await;

        registry.add(conn.clone()).await.unwrap();
        conn.dispose().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_disposed_connection_rejected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _client) = connection().await;
        conn.dispose().await;

        let err = registry.add(conn).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConnectionDisposed(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_observer_hooks() {
        let observer = Arc::new(Counting::default());
        let weak = Arc::downgrade(&observer);
        let weak: Weak<dyn RegistryObserver> = weak;
        let registry = Arc::new(ConnectionRegistry::with_observer(weak));

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (conn, client) = connection().await;
            registry.add(conn).await.unwrap();
            clients.push(client);
        }
        assert_eq!(observer.added.load(Ordering::SeqCst), 3);

        assert_eq!(registry.clear().await, 3);
        assert_eq!(observer.removed.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }
}
