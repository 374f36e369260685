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

//! Seam traits between connection, transport, hub and SPINE engine

use crate::connection::ShipConnection;
use ship_model::{ShipError, ShipStateDetail};
use std::sync::Arc;

/// Websocket subprotocol required by SHIP 10.2
pub const SHIP_WEBSOCKET_SUB_PROTOCOL: &str = "ship";

/// Outgoing side of the message transport.
///
/// Implemented by the websocket connection, used by [`ShipConnection`].
/// Writes are queued, never blocking the caller; close is idempotent.
pub trait MessageWriter: Send + Sync {
    /// Register the reader and start message processing.
    fn init_message_handling(&self, reader: Arc<dyn MessageReader>);

    /// Queue a complete binary message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::TransportClosed`] when the transport is gone.
    fn write_message(&self, message: Vec<u8>) -> Result<(), ShipError>;

    /// Close the transport. A non-empty reason is sent as a close frame
    /// with the given code first.
    fn close(&self, close_code: u16, reason: &str);

    /// Whether the transport is closed, and the cause if one was recorded.
    fn is_closed(&self) -> (bool, Option<ShipError>);
}

/// Incoming side of the message transport.
///
/// Implemented by [`ShipConnection`], used by the websocket connection.
pub trait MessageReader: Send + Sync {
    /// Called for each received binary message, in receive order.
    fn handle_incoming_message(&self, message: Vec<u8>);

    /// Called when the transport failed (read error, missed pong, remote
    /// close without the SHIP close protocol).
    fn report_connection_error(&self, error: ShipError);
}

/// Outbound SPINE hand-off: wraps payload bytes into SHIP `DATA` frames.
///
/// Implemented by [`ShipConnection`], used by the SPINE engine.
pub trait PayloadWriter: Send + Sync {
    fn write_ship_payload(&self, payload: &[u8]);
}

/// Inbound SPINE hand-off.
///
/// Implemented by the SPINE engine's remote-device handle, used by
/// [`ShipConnection`] once the handshake completed.
pub trait PayloadReader: Send + Sync {
    fn handle_ship_payload(&self, payload: Vec<u8>);
}

/// Service-wide information and reporting surface.
///
/// Implemented by the connection hub, used by [`ShipConnection`].
pub trait ConnectionInfoProvider: Send + Sync {
    /// Whether the SKI has been granted trust.
    fn is_remote_service_paired(&self, ski: &str) -> bool;

    /// A connection ended; `handshake_completed` tells whether it got past
    /// the handshake (completed or definitively aborted) rather than being
    /// cut off.
    fn handle_connection_closed(&self, connection: &ShipConnection, handshake_completed: bool);

    /// The SHIP ID the peer reported during access-methods.
    fn report_service_ship_id(&self, ski: &str, ship_id: &str);

    /// Whether the user can still be waited on to trust this SKI. Consulted
    /// on every prolongation decision, so the answer may change over time.
    fn allow_waiting_for_trust(&self, ski: &str) -> bool;

    /// A handshake state change, with the error for terminal failures.
    fn handle_handshake_state_update(&self, ski: &str, detail: ShipStateDetail);

    /// The handshake was approved; hands the payload writer to the SPINE
    /// engine and returns the engine's inbound reader.
    fn setup_remote_device(
        &self,
        ski: &str,
        writer: Arc<dyn PayloadWriter>,
    ) -> Arc<dyn PayloadReader>;
}
