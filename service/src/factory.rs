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

//! Connection construction for accepted sockets

use crate::{Connection, ConnectionConfig, ConnectionId, Result};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Turns an accepted socket into a [`Connection`]
///
/// The server calls `create` once per accepted socket. An error drops the
/// socket and is counted as a connection error; the accept loop continues.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Wrap `socket` using `config`
    fn create(&self, socket: TcpStream, config: &ConnectionConfig) -> Result<Arc<Connection>>;
}

/// Factory that wraps sockets as-is with process-unique IDs
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnectionFactory;

impl ConnectionFactory for DefaultConnectionFactory {
    fn create(&self, socket: TcpStream, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        Connection::wrap(socket, ConnectionId::next(), config.clone())
    }
}

impl<F> ConnectionFactory for F
where
    F: Fn(TcpStream, &ConnectionConfig) -> Result<Arc<Connection>> + Send + Sync + 'static,
{
    fn create(&self, socket: TcpStream, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        self(socket, config)
    }
}
