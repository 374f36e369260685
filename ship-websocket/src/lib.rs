// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! WebSocket transport for SHIP
//!
//! Thin wrapper around `tokio-tungstenite` implementing the
//! [`ship_network::MessageWriter`] seam: a writer pump serialises all
//! socket writes with a per-write deadline and a ping ticker, a reader
//! pump validates frames (binary, at least two bytes) and enforces the
//! pong deadline, and close is idempotent with a recorded cause.
//!
//! The connection is generic over the underlying stream at construction
//! only; server-TLS and client-TLS connections share the one concrete
//! [`WebsocketConnection`] type via boxed split halves.

mod connection;

pub use connection::WebsocketConnection;

use std::time::Duration;

/// Per-write deadline on the socket
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed to read the next pong message from the peer (SHIP 4.2:
/// ping interval + pong timeout)
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval (SHIP 4.2); must be less than [`PONG_WAIT`]
pub const PING_PERIOD: Duration = Duration::from_secs(50);

/// SHIP 9.2: maximum fragment length, used to size the write buffer
pub const MAX_FRAGMENT_SIZE: usize = 1024;

/// Websocket config sized for SHIP's small control frames
pub fn websocket_config() -> tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
    let mut config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
    config.write_buffer_size = MAX_FRAGMENT_SIZE;
    config
}
