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

//! JSON Chat Broadcast Example
//!
//! Every line a client sends is decoded as a JSON chat message, stamped with the
//! sender's connection id and rebroadcast to all connected clients.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example json_broadcast
//! ```
//!
//! Then from two or more terminals:
//! ```bash
//! nc -C localhost 2324
//! {"text":"hello everyone"}
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use lineserve_codec::TERMINATOR;
use lineserve_service::{
    CancellationToken, Connection, ConnectionId, JsonCodec, LineServer, Message, PayloadCodec,
    ServerConfig, ServerHandler, ServerState,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message sent by clients
#[derive(Debug, Deserialize)]
struct Inbound {
    text: String,
}

/// Message relayed to every client
#[derive(Debug, Serialize)]
struct Outbound {
    from: u64,
    text: String,
}

struct ChatHandler {
    relay: mpsc::UnboundedSender<Outbound>,
}

#[async_trait]
impl ServerHandler for ChatHandler {
    async fn on_connect(&self, id: ConnectionId, conn: &Connection) {
        let _ = conn
            .write_value(&Outbound {
                from: 0,
                text: format!("welcome, you are #{id}"),
            })
            .await;
    }

    async fn on_message(&self, id: ConnectionId, conn: &Connection, message: &Message) {
        match message.decode::<Inbound>() {
            Ok(inbound) => {
                let _ = self.relay.send(Outbound {
                    from: id.as_u64(),
                    text: inbound.text,
                });
            }
            Err(e) => {
                tracing::warn!("Client {} sent malformed JSON: {}", id, e);
                let _ = conn.write_line(r#"{"error":"expected {\"text\":...}"}"#).await;
            }
        }
    }

    async fn on_state_changed(&self, state: ServerState) {
        tracing::info!("Server is {:?}", state);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (relay, mut outbound) = mpsc::unbounded_channel();
    let server = Arc::new(LineServer::new(ServerConfig::new("127.0.0.1:2324".parse()?)));
    server.subscribe(Arc::new(ChatHandler { relay }));

    let shutdown = CancellationToken::new();
    let address = server.start(shutdown.clone()).await?;
    println!("JSON chat listening on {address}, press Ctrl+C to stop");

    // Broadcasting from a separate task keeps read sessions from waiting on peers
    let broadcaster = {
        let server = server.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let mut line = match JsonCodec::encode(&message) {
                    Ok(payload) => payload.to_vec(),
                    Err(e) => {
                        tracing::error!("Failed to encode chat message: {}", e);
                        continue;
                    }
                };
                line.extend_from_slice(TERMINATOR);

                let result = server.broadcast(Bytes::from(line)).await;
                if !result.all_succeeded() {
                    tracing::warn!(
                        "Broadcast reached {}/{} clients",
                        result.succeeded,
                        result.total
                    );
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    shutdown.cancel();
    server.stop().await;
    broadcaster.abort();

    Ok(())
}
