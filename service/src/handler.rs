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

//! Event handler traits
//!
//! [`ConnectionListener`] observes a single [`Connection`]; [`ServerHandler`]
//! observes every connection a [`LineServer`](crate::LineServer) accepts plus the
//! server's own state. Every method has a no-op default, so implementors only
//! override what they need.

use crate::{Connection, ConnectionId, Message, ServerState};
use async_trait::async_trait;
use bytes::Bytes;

/// Observer of a single connection's traffic
///
/// Callbacks run on the connection's own tasks. `on_received` is awaited before
/// the read loop continues, so messages are observed in arrival order.
#[async_trait]
pub trait ConnectionListener: Send + Sync + 'static {
    /// Called for every complete inbound message
    async fn on_received(&self, _conn: &Connection, _message: &Message) {}

    /// Called after a write has been flushed, with the exact bytes written
    async fn on_sent(&self, _conn: &Connection, _bytes: &Bytes) {}

    /// Called once when the connection has been disposed
    async fn on_disposed(&self, _conn: &Connection) {}
}

/// Observer of all connections managed by a server
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Called when a connection has been added to the registry
    ///
    /// This is called before the connection starts listening.
    async fn on_connect(&self, _id: ConnectionId, _conn: &Connection) {}

    /// Called for every complete message received on any connection
    async fn on_message(&self, _id: ConnectionId, _conn: &Connection, _message: &Message) {}

    /// Called after bytes have been written to a connection
    async fn on_sent(&self, _id: ConnectionId, _conn: &Connection, _bytes: &Bytes) {}

    /// Called when a connection has been removed from the registry and disposed
    async fn on_disconnect(&self, _id: ConnectionId, _conn: &Connection) {}

    /// Called whenever the server changes lifecycle state
    async fn on_state_changed(&self, _state: ServerState) {}
}

type ConnectFn = Box<dyn Fn(ConnectionId, &Connection) + Send + Sync + 'static>;
type MessageFn = Box<dyn Fn(ConnectionId, &Connection, &Message) + Send + Sync + 'static>;
type SentFn = Box<dyn Fn(ConnectionId, &Connection, &Bytes) + Send + Sync + 'static>;
type StateFn = Box<dyn Fn(ServerState) + Send + Sync + 'static>;

/// Closure-based [`ServerHandler`]
///
/// # Example
/// ```
/// use lineserve_service::CallbackHandler;
///
/// let handler = CallbackHandler::default()
///     .on_message(|id, _conn, message| println!("{id}: {}", message.text()))
///     .on_state_changed(|state| println!("server is {state}"));
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    on_connect: Option<ConnectFn>,
    on_message: Option<MessageFn>,
    on_sent: Option<SentFn>,
    on_disconnect: Option<ConnectFn>,
    on_state_changed: Option<StateFn>,
}

impl CallbackHandler {
    /// Set the connection added callback
    pub fn on_connect(
        mut self,
        f: impl Fn(ConnectionId, &Connection) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Box::new(f));
        self
    }

    /// Set the message received callback
    pub fn on_message(
        mut self,
        f: impl Fn(ConnectionId, &Connection, &Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// Set the bytes sent callback
    pub fn on_sent(
        mut self,
        f: impl Fn(ConnectionId, &Connection, &Bytes) + Send + Sync + 'static,
    ) -> Self {
        self.on_sent = Some(Box::new(f));
        self
    }

    /// Set the connection removed callback
    pub fn on_disconnect(
        mut self,
        f: impl Fn(ConnectionId, &Connection) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    /// Set the server state callback
    pub fn on_state_changed(mut self, f: impl Fn(ServerState) + Send + Sync + 'static) -> Self {
        self.on_state_changed = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl ServerHandler for CallbackHandler {
    async fn on_connect(&self, id: ConnectionId, conn: &Connection) {
        if let Some(ref f) = self.on_connect {
            f(id, conn);
        }
    }

    async fn on_message(&self, id: ConnectionId, conn: &Connection, message: &Message) {
        if let Some(ref f) = self.on_message {
            f(id, conn, message);
        }
    }

    async fn on_sent(&self, id: ConnectionId, conn: &Connection, bytes: &Bytes) {
        if let Some(ref f) = self.on_sent {
            f(id, conn, bytes);
        }
    }

    async fn on_disconnect(&self, id: ConnectionId, conn: &Connection) {
        if let Some(ref f) = self.on_disconnect {
            f(id, conn);
        }
    }

    async fn on_state_changed(&self, state: ServerState) {
        if let Some(ref f) = self.on_state_changed {
            f(state);
        }
    }
}
