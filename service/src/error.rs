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

//! Error types for the line server

use crate::types::ConnectionId;
use std::io::ErrorKind;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Line server error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error from the codec layer
    #[error("Codec error: {0}")]
    Codec(#[from] lineserve_codec::CodecError),

    /// A value could not be serialized or deserialized
    #[error("Payload error: {0}")]
    Payload(String),

    /// The connection already has an active listening session
    #[error("Connection {0} is already listening")]
    AlreadyListening(ConnectionId),

    /// The connection has been disposed
    #[error("Connection {0} has been disposed")]
    ConnectionDisposed(ConnectionId),

    /// The server is already running
    #[error("Server already running")]
    AlreadyRunning,

    /// Connection with the given ID was not found
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// A connection with the same ID is already registered
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// The listening socket could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address the server attempted to bind
        address: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Maximum number of connections reached
    #[error("Maximum connections ({0}) reached")]
    MaxConnectionsReached(usize),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Check if the error is caused by programmer misuse
    ///
    /// Usage errors are surfaced immediately and never retried.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ServiceError::AlreadyListening(_)
                | ServiceError::AlreadyRunning
                | ServiceError::ConnectionDisposed(_)
                | ServiceError::InvalidConfig(_)
        )
    }

    /// Check if the error was caused by the remote peer
    ///
    /// Transport errors end a read or write session and lead to disposal of the
    /// connection; they are logged at low severity.
    pub fn is_transport_error(&self) -> bool {
        match self {
            ServiceError::Io(err) => is_peer_closed(err.kind()),
            ServiceError::Codec(err) => err.io_kind().is_some_and(is_peer_closed),
            _ => false,
        }
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those that don't indicate a fatal condition
    /// and where retrying the operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout | ServiceError::Io(_) | ServiceError::MaxConnectionsReached(_)
        )
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Payload(err.to_string())
    }
}

/// Returns true for I/O error kinds produced by an orderly or abrupt peer close.
pub(crate) fn is_peer_closed(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}
