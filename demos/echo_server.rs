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

//! Simple Echo Server Example
//!
//! This example demonstrates a basic line echo server that:
//! - Accepts connections on port 2323
//! - Echoes back every `\r\n` terminated line received from clients
//! - Disconnects clients that send `quit`
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Connect with a telnet client:
//! ```bash
//! telnet localhost 2323
//! ```

use lineserve_service::{
    CancellationToken, Connection, ConnectionConfig, ConnectionId, LineServer, Message,
    ServerConfig, ServerHandler,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    println!("Starting Line Echo Server on 127.0.0.1:2323");
    println!("Connect with: telnet localhost 2323");
    println!("Press Ctrl+C to stop the server\n");

    let config = ServerConfig::new("127.0.0.1:2323".parse()?)
        .with_max_connections(100)
        .with_connection(
            ConnectionConfig::default()
                .with_max_message_length(4096)
                .with_keep_alive_interval(Some(Duration::from_secs(5))),
        );

    let server = LineServer::new(config);
    server.subscribe(Arc::new(EchoHandler));

    let shutdown = CancellationToken::new();
    server.start(shutdown.clone()).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nShutting down server...");
            shutdown.cancel();
        }
        _ = server.stopped() => {}
    }

    server.stop().await;
    let metrics = server.metrics().snapshot();
    println!(
        "Server stopped after {} connections and {} messages",
        metrics.total_connections, metrics.messages_received
    );

    Ok(())
}

/// Echoes each line back to its sender
struct EchoHandler;

#[async_trait::async_trait]
impl ServerHandler for EchoHandler {
    async fn on_connect(&self, id: ConnectionId, conn: &Connection) {
        tracing::info!("Client {} connected", id);
        if let Err(e) = conn
            .write_line("Welcome! Every line is echoed back, 'quit' disconnects.")
            .await
        {
            tracing::error!("Failed to send welcome message to {}: {}", id, e);
        }
    }

    async fn on_message(&self, id: ConnectionId, conn: &Connection, message: &Message) {
        let text = message.text();
        tracing::debug!("Client {} sent line: {}", id, text);

        if text.trim().eq_ignore_ascii_case("quit") {
            let _ = conn.write_line("Goodbye!").await;
            conn.dispose().await;
            return;
        }

        if let Err(e) = conn.write(message.as_bytes().clone()).await {
            tracing::error!("Failed to echo to {}: {}", id, e);
        }
    }

    async fn on_disconnect(&self, id: ConnectionId, conn: &Connection) {
        tracing::info!(
            "Client {} disconnected after {:?}",
            id,
            conn.created_at().elapsed()
        );
    }
}
