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

//! Server and connection configuration types and builders
//!
//! # Examples
//!
//! ```
//! use lineserve_service::{ConnectionConfig, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::on_port(2323)
//!     .with_max_connections(100)
//!     .with_connection(
//!         ConnectionConfig::default()
//!             .with_keep_alive_interval(Some(Duration::from_secs(5)))
//!             .with_max_message_length(4096),
//!     );
//! assert!(config.validate().is_ok());
//! ```

use crate::{PayloadCodec, PayloadFormat, Result, ServiceError};
use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Per-connection settings applied by the connection factory
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum unterminated message length in bytes (0 for no limit)
    pub max_message_length: usize,

    /// Timeout for a single write, including its flush
    pub write_timeout: Duration,

    /// Interval between liveness checks (`None` disables the check)
    pub keep_alive_interval: Option<Duration>,

    /// Bytes written by each liveness check
    ///
    /// Empty by default, which leaves the wire untouched and only performs the
    /// passive socket check. Non-empty bytes are written verbatim and will be
    /// seen by the peer, so only use bytes the peer is known to ignore.
    pub keep_alive_probe: Bytes,

    /// Codec used by `write_value` and by `Message::decode` on received messages
    pub payload_format: PayloadFormat,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_length: 64 * 1024,
            write_timeout: Duration::from_secs(10),
            keep_alive_interval: Some(Duration::from_millis(1000)),
            keep_alive_probe: Bytes::new(),
            payload_format: PayloadFormat::default(),
        }
    }
}

impl ConnectionConfig {
    /// Set the maximum message length
    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    /// Set the write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the liveness check interval
    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the bytes written by each liveness check
    pub fn with_keep_alive_probe(mut self, bytes: impl Into<Bytes>) -> Self {
        self.keep_alive_probe = bytes.into();
        self
    }

    /// Set the payload codec used by default on the connection
    pub fn with_payload_codec<C: PayloadCodec>(mut self) -> Self {
        self.payload_format = PayloadFormat::of::<C>();
        self
    }

    /// Set the payload format used by default on the connection
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.write_timeout.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "write_timeout must be greater than 0".to_string(),
            ));
        }
        if self.keep_alive_interval.is_some_and(|i| i.is_zero()) {
            return Err(ServiceError::InvalidConfig(
                "keep_alive_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// How long `stop()` waits for the accept loop to exit
    pub shutdown_timeout: Duration,

    /// Delay after a transient accept failure
    pub accept_backoff: Duration,

    /// Settings for each accepted connection
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 23)),
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(30),
            accept_backoff: Duration::from_millis(100),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Create a configuration listening on all local IPv4 interfaces
    pub fn on_port(port: u16) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the delay applied after a transient accept failure
    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// Set the per-connection configuration
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ServiceError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        self.connection.validate()
    }
}
