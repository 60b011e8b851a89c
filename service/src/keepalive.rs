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

//! Periodic liveness check for a connection

use crate::Connection;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Why the keep-alive loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepAliveOutcome {
    /// The peer failed a liveness check and the connection was disposed
    PeerGone,
    /// The connection was disposed elsewhere
    Cancelled,
    /// The connection was dropped
    Dropped,
}

/// Check the connection every `interval` until it fails a check or `cancel` fires
///
/// Holds only a weak reference, so an otherwise unused connection can still be
/// dropped. The first check happens one full interval after the call.
pub(crate) async fn run_keep_alive(
    connection: Weak<Connection>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepAliveOutcome {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepAliveOutcome::Cancelled,
            _ = ticker.tick() => {
                let Some(connection) = connection.upgrade() else {
                    return KeepAliveOutcome::Dropped;
                };
                if connection.check_alive().await {
                    trace!(connection_id = %connection.id(), "Keep-alive check passed");
                    continue;
                }
                if cancel.is_cancelled() {
                    return KeepAliveOutcome::Cancelled;
                }
                debug!(connection_id = %connection.id(), "Keep-alive check failed, disposing");
                connection.dispose().await;
                return KeepAliveOutcome::PeerGone;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionConfig, ConnectionId, ConnectionState};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn accepted() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        (socket, client)
    }

    #[tokio::test]
    async fn keep_alive_cancelled() {
        let (socket, _client) = accepted().await;
        let conn = Connection::wrap(
            socket,
            ConnectionId::next(),
            ConnectionConfig::default().with_keep_alive_interval(None),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_keep_alive(
            Arc::downgrade(&conn),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        cancel.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, KeepAliveOutcome::Cancelled);
        assert_eq!(conn.state(), ConnectionState::Created);
    }

    #[tokio::test]
    async fn keep_alive_dropped_connection() {
        let (socket, _client) = accepted().await;
        let conn = Connection::wrap(
            socket,
            ConnectionId::next(),
            ConnectionConfig::default().with_keep_alive_interval(None),
        )
        .unwrap();
        let weak = Arc::downgrade(&conn);
        drop(conn);

        let outcome = run_keep_alive(weak, Duration::from_millis(10), CancellationToken::new()).await;
        assert_eq!(outcome, KeepAliveOutcome::Dropped);
    }

    #[tokio::test]
    async fn keep_alive_disposes_when_peer_closes() {
        let (socket, client) = accepted().await;
        let conn = Connection::wrap(
            socket,
            ConnectionId::next(),
            ConnectionConfig::default().with_keep_alive_interval(None),
        )
        .unwrap();
        drop(client);

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run_keep_alive(
                Arc::downgrade(&conn),
                Duration::from_millis(20),
                CancellationToken::new(),
            ),
        )
        .await
        .unwrap();
        assert_eq!(outcome, KeepAliveOutcome::PeerGone);
        assert_eq!(conn.state(), ConnectionState::Disposed);
    }
}
