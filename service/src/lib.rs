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

//! Line-Oriented TCP Server
//!
//! This crate provides an async TCP server whose peers exchange messages
//! terminated by `\r\n`:
//!
//! - Framing of arbitrarily chunked input into whole messages
//! - Serialized, atomic writes per connection
//! - Idempotent disposal that is safe from any task at any time
//! - Periodic keep-alive checks that dispose silently dropped peers
//! - A registry that ties connection membership to connection lifecycle
//! - Lock-free metrics and monitoring
//!
//! # Architecture
//!
//! ```text
//! LineServer ── accept loop ── ConnectionFactory
//!     ↓                              ↓
//! ConnectionRegistry ◀── add ── Connection ── read session → LineCodec → Message
//!     ↓                              ↓
//! ServerHandler ◀── republish ── ConnectionListener
//! ```
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use lineserve_service::{
//!     CancellationToken, Connection, ConnectionId, LineServer, Message, ServerConfig,
//!     ServerHandler,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ServerHandler for Echo {
//!     async fn on_message(&self, _id: ConnectionId, conn: &Connection, message: &Message) {
//!         let _ = conn.write(message.as_bytes().clone()).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = LineServer::new(ServerConfig::on_port(2323));
//!     server.subscribe(Arc::new(Echo));
//!     server.start(CancellationToken::new()).await?;
//!     server.stopped().await;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod error;
mod factory;
mod handler;
mod keepalive;
mod message;
mod metrics;
mod payload;
mod registry;
mod server;
mod subscribers;
mod types;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::Connection;
pub use error::{Result, ServiceError};
pub use factory::{ConnectionFactory, DefaultConnectionFactory};
pub use handler::{CallbackHandler, ConnectionListener, ServerHandler};
pub use message::Message;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use payload::{JsonCodec, PayloadCodec, PayloadFormat};
pub use registry::{ConnectionRegistry, RegistryObserver};
pub use server::{BroadcastResult, LineServer};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot, ServerState, SubscriptionId,
};
