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

//! Tests for Connection read sessions, writes and disposal

use async_trait::async_trait;
use bytes::Bytes;
use lineserve_service::{
    CancellationToken, Connection, ConnectionConfig, ConnectionId, ConnectionListener,
    ConnectionState, JsonCodec, Message, PayloadCodec, ServiceError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

/// Helper to create a connection and the peer socket connected to it
async fn create_test_connection(config: ConnectionConfig) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (socket, _) = listener.accept().await.unwrap();
    let conn = Connection::wrap(socket, ConnectionId::next(), config).unwrap();
    (conn, client)
}

/// Config without keep-alive checks, so the peer only sees bytes we write
fn quiet_config() -> ConnectionConfig {
    ConnectionConfig::default().with_keep_alive_interval(None)
}

/// Listener forwarding every event into channels
struct Recorder {
    received: mpsc::UnboundedSender<Message>,
    sent: mpsc::UnboundedSender<Bytes>,
    disposed: Arc<AtomicUsize>,
}

struct Recorded {
    received: mpsc::UnboundedReceiver<Message>,
    sent: mpsc::UnboundedReceiver<Bytes>,
    disposed: Arc<AtomicUsize>,
}

fn recorder() -> (Arc<Recorder>, Recorded) {
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let disposed = Arc::new(AtomicUsize::new(0));
    (
        Arc::new(Recorder {
            received: received_tx,
            sent: sent_tx,
            disposed: disposed.clone(),
        }),
        Recorded {
            received: received_rx,
            sent: sent_rx,
            disposed,
        },
    )
}

#[async_trait]
impl ConnectionListener for Recorder {
    async fn on_received(&self, _conn: &Connection, message: &Message) {
        let _ = self.received.send(message.clone());
    }

    async fn on_sent(&self, _conn: &Connection, bytes: &Bytes) {
        let _ = self.sent.send(bytes.clone());
    }

    async fn on_disposed(&self, _conn: &Connection) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn listen(conn: &Arc<Connection>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let conn = conn.clone();
    tokio::spawn(async move {
        conn.start_listening(cancel).await.unwrap();
    })
}

#[tokio::test]
async fn test_connection_creation() {
    let (conn, client) = create_test_connection(quiet_config()).await;

    assert_eq!(conn.state(), ConnectionState::Created);
    assert_eq!(conn.peer_addr(), Some(client.local_addr().unwrap()));
    assert_eq!(conn.messages_received(), 0);
    assert_eq!(conn.messages_sent(), 0);
    assert!(conn.id().to_string().starts_with("conn-"));
}

#[tokio::test]
async fn test_receive_messages_in_order() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);
    let session = listen(&conn, CancellationToken::new());

    client.write_all(b"first\r\nsec").await.unwrap();
    client.write_all(b"ond\r").await.unwrap();
    client.write_all(b"\nthird\r\n").await.unwrap();

    for expected in ["first\r\n", "second\r\n", "third\r\n"] {
        let message = timeout(Duration::from_secs(2), recorded.received.recv())
            .await
            .expect("Timeout waiting for message")
            .unwrap();
        assert_eq!(message.as_bytes(), expected);
    }
    assert_eq!(conn.messages_received(), 3);

    conn.dispose().await;
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_empty_message_is_delivered() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);
    let _session = listen(&conn, CancellationToken::new());

    client.write_all(b"\r\n").await.unwrap();
    let message = timeout(Duration::from_secs(2), recorded.received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.as_bytes(), "\r\n");
    assert!(message.payload().is_empty());
}

#[tokio::test]
async fn test_start_listening_twice_fails() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    let _session = listen(&conn, CancellationToken::new());

    timeout(Duration::from_secs(2), async {
        while conn.state() != ConnectionState::Listening {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = conn
        .start_listening(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyListening(id) if id == conn.id()));
    assert!(err.is_usage_error());
}

#[tokio::test]
async fn test_start_listening_after_dispose_fails() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    conn.dispose().await;

    let err = conn
        .start_listening(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConnectionDisposed(_)));
}

#[tokio::test]
async fn test_peer_close_ends_session_and_disposes() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);
    let session = listen(&conn, CancellationToken::new());

    // The partial message must never be delivered
    client.write_all(b"complete\r\npartial").await.unwrap();
    let message = timeout(Duration::from_secs(2), recorded.received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.text(), "complete");
    drop(client);

    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Disposed);
    assert!(recorded.received.try_recv().is_err());
    assert_eq!(recorded.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_listening_without_session_is_noop() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    conn.stop_listening();
    conn.stop_listening();
    assert_eq!(conn.state(), ConnectionState::Created);
}

#[tokio::test]
async fn test_stop_listening_ends_session() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    let session = listen(&conn, CancellationToken::new());

    timeout(Duration::from_secs(2), async {
        while conn.state() == ConnectionState::Created {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    conn.stop_listening();
    conn.stop_listening();
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Disposed);
}

#[tokio::test]
async fn test_cancelling_one_session_leaves_others() {
    let (first, _first_client) = create_test_connection(quiet_config()).await;
    let (second, _second_client) = create_test_connection(quiet_config()).await;

    let first_cancel = CancellationToken::new();
    let first_session = listen(&first, first_cancel.clone());
    let _second_session = listen(&second, CancellationToken::new());

    first_cancel.cancel();
    timeout(Duration::from_secs(2), first_session)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.state(), ConnectionState::Disposed);
    assert_ne!(second.state(), ConnectionState::Disposed);
    second.dispose().await;
}

#[tokio::test]
async fn test_write_notifies_sent_with_exact_bytes() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);

    conn.write_line("hello").await.unwrap();
    conn.write(Bytes::from_static(b"raw")).await.unwrap();

    assert_eq!(recorded.sent.recv().await.unwrap(), "hello\r\n");
    assert_eq!(recorded.sent.recv().await.unwrap(), "raw");

    let mut buf = [0u8; 10];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello\r\nraw");
    assert_eq!(conn.bytes_sent(), 10);
}

#[tokio::test]
async fn test_unsubscribe_stops_notifications() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    let (listener, mut recorded) = recorder();
    let subscription = conn.subscribe(listener);

    assert!(conn.unsubscribe(subscription));
    assert!(!conn.unsubscribe(subscription));

    conn.write_line("unseen").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert!(recorded.sent.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_writes_do_not_interleave() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;

    const WRITERS: usize = 8;
    const LINE_LEN: usize = 16 * 1024;

    let mut tasks = Vec::new();
    for writer in 0..WRITERS {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let byte = b'a' + writer as u8;
            let mut line = vec![byte; LINE_LEN];
            line.extend_from_slice(b"\r\n");
            conn.write(line).await.unwrap();
        }));
    }

    let mut received = vec![0u8; WRITERS * (LINE_LEN + 2)];
    let reader = tokio::spawn(async move {
        client.read_exact(&mut received).await.unwrap();
        received
    });

    for task in tasks {
        task.await.unwrap();
    }
    let received = timeout(Duration::from_secs(5), reader)
        .await
        .unwrap()
        .unwrap();

    for chunk in received.chunks(LINE_LEN + 2) {
        let first = chunk[0];
        assert!(chunk[..LINE_LEN].iter().all(|&b| b == first));
        assert_eq!(&chunk[LINE_LEN..], b"\r\n");
    }
}

#[tokio::test]
async fn test_write_after_dispose_fails() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    conn.dispose().await;

    let err = conn.write_line("late").await.unwrap_err();
    assert!(matches!(err, ServiceError::ConnectionDisposed(_)));
}

#[tokio::test]
async fn test_concurrent_dispose_is_coalesced() {
    let (conn, _client) = create_test_connection(quiet_config()).await;
    let (listener, recorded) = recorder();
    conn.subscribe(listener);
    let _session = listen(&conn, CancellationToken::new());

    let disposers: Vec<_> = (0..10)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.dispose().await })
        })
        .collect();
    for disposer in disposers {
        disposer.await.unwrap();
    }

    // Every caller returns only after disposal completed
    assert_eq!(conn.state(), ConnectionState::Disposed);
    conn.dispose().await;
    assert_eq!(recorded.disposed.load(Ordering::SeqCst), 1);
    assert!(conn.peer_addr().is_none());
}

#[tokio::test]
async fn test_dispose_closes_socket() {
    let (conn, mut client) = create_test_connection(quiet_config()).await;
    conn.dispose().await;

    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_dispose_during_listener_callback() {
    struct DisposeOnMessage;

    #[async_trait]
    impl ConnectionListener for DisposeOnMessage {
        async fn on_received(&self, conn: &Connection, _message: &Message) {
            conn.dispose().await;
        }
    }

    let (conn, mut client) = create_test_connection(quiet_config()).await;
    conn.subscribe(Arc::new(DisposeOnMessage));
    let session = listen(&conn, CancellationToken::new());

    client.write_all(b"bye\r\n").await.unwrap();
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
    assert_eq!(conn.state(), ConnectionState::Disposed);
}

#[tokio::test]
async fn test_write_value_as_json_line() {
    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Greeting {
        text: String,
        count: u32,
    }

    let (conn, client) = create_test_connection(quiet_config()).await;
    let value = Greeting {
        text: "hi".to_string(),
        count: 2,
    };
    conn.write_value(&value).await.unwrap();

    let mut reader = tokio::io::BufReader::new(client);
    let mut line = String::new();
    tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
        .await
        .unwrap();
    assert!(line.ends_with("\r\n"));

    let decoded: Greeting = Message::new(line).decode().unwrap();
    assert_eq!(decoded, value);
}

/// JSON behind a version tag, so payloads are not valid JSON on their own
struct TaggedCodec;

impl PayloadCodec for TaggedCodec {
    fn encode<T: Serialize + ?Sized>(value: &T) -> lineserve_service::Result<Bytes> {
        let mut payload = b"v1:".to_vec();
        payload.extend_from_slice(&serde_json::to_vec(value)?);
        Ok(Bytes::from(payload))
    }

    fn decode<T: DeserializeOwned>(payload: &[u8]) -> lineserve_service::Result<T> {
        let json = payload
            .strip_prefix(b"v1:")
            .ok_or_else(|| ServiceError::Payload("missing v1 tag".to_string()))?;
        Ok(serde_json::from_slice(json)?)
    }
}

#[tokio::test]
async fn test_write_value_uses_configured_codec() {
    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Move {
        x: i32,
        y: i32,
    }

    let (conn, mut client) =
        create_test_connection(quiet_config().with_payload_codec::<TaggedCodec>()).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);
    let session = listen(&conn, CancellationToken::new());

    conn.write_value(&Move { x: 1, y: -2 }).await.unwrap();

    let expected = b"v1:{\"x\":1,\"y\":-2}\r\n";
    let mut written = vec![0u8; expected.len()];
    timeout(Duration::from_secs(2), client.read_exact(&mut written))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&written[..], &expected[..]);

    // Received messages decode with the same codec
    client.write_all(b"v1:{\"x\":3,\"y\":4}\r\n").await.unwrap();
    let message = timeout(Duration::from_secs(2), recorded.received.recv())
        .await
        .expect("Timeout waiting for message")
        .unwrap();
    assert_eq!(message.decode::<Move>().unwrap(), Move { x: 3, y: 4 });
    assert!(message.decode_with::<JsonCodec, Move>().is_err());

    conn.dispose().await;
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_message_disposes_connection() {
    let config = quiet_config().with_max_message_length(16);
    let (conn, mut client) = create_test_connection(config).await;
    let (listener, mut recorded) = recorder();
    conn.subscribe(listener);
    let session = listen(&conn, CancellationToken::new());

    client.write_all(&[b'x'; 64]).await.unwrap();
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();

    assert_eq!(conn.state(), ConnectionState::Disposed);
    assert!(recorded.received.try_recv().is_err());
}

#[tokio::test]
async fn test_keep_alive_detects_closed_peer() {
    let config = ConnectionConfig::default().with_keep_alive_interval(Some(Duration::from_millis(50)));
    let (conn, client) = create_test_connection(config).await;
    drop(client);

    timeout(Duration::from_secs(5), conn.closed())
        .await
        .expect("keep-alive did not dispose the connection");
    assert_eq!(conn.state(), ConnectionState::Disposed);
}

#[tokio::test]
async fn test_keep_alive_keeps_live_peer_without_touching_the_wire() {
    let config = ConnectionConfig::default().with_keep_alive_interval(Some(Duration::from_millis(20)));
    let (conn, mut client) = create_test_connection(config).await;

    // Many check intervals pass without the peer seeing a single byte
    let mut buf = [0u8; 16];
    let idle = timeout(Duration::from_millis(300), client.read(&mut buf)).await;
    assert!(idle.is_err(), "keep-alive wrote to the peer");
    assert!(conn.check_alive().await);
    assert_ne!(conn.state(), ConnectionState::Disposed);

    conn.write_line("still here").await.unwrap();
    let mut line = [0u8; 12];
    client.read_exact(&mut line).await.unwrap();
    assert_eq!(&line, b"still here\r\n");

    conn.dispose().await;
}

#[tokio::test]
async fn test_keep_alive_writes_configured_bytes() {
    let config = ConnectionConfig::default()
        .with_keep_alive_interval(Some(Duration::from_millis(20)))
        .with_keep_alive_probe("\0");
    let (conn, mut client) = create_test_connection(config).await;

    // Keep draining keep-alive bytes so the peer stays healthy
    let mut buf = [0u8; 3];
    timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, [0, 0, 0]);
    assert_ne!(conn.state(), ConnectionState::Disposed);

    conn.dispose().await;
}
