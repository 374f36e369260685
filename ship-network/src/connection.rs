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

//! SHIP connection
//!
//! Coordinates SHIP and SPINE message i/o over one transport. Handshake
//! state handling lives in [`crate::handshake`]; this module owns the
//! connection's data plumbing: message encode/decode, SPINE buffering and
//! routing, close handling and the external API surface.

use crate::api::{
    ConnectionInfoProvider, MessageReader, MessageWriter, PayloadReader, PayloadWriter,
};
use crate::timer::HandshakeTimer;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use ship_model::codec::{decode_ship_frame, decode_ship_model, encode_ship_model};
use ship_model::message::wrap_spine_payload;
use ship_model::{
    ConnectionClose, ConnectionClosePhase, MsgType, ShipData, ShipError, ShipHandshakeState,
    ShipStateDetail,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Which side of the TLS connection this node is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipRole {
    Client,
    Server,
}

/// Upper bound for SPINE payloads buffered before handshake completion.
///
/// The buffer exists because a peer may start sending data the moment it
/// considers the handshake complete, slightly before we do. It must never
/// grow without bound on a misbehaving peer.
pub const SPINE_BUFFER_CAPACITY: usize = 64;

pub(crate) struct SmeState {
    pub(crate) state: ShipHandshakeState,
    pub(crate) error: Option<ShipError>,
}

/// A SHIP connection over one transport.
///
/// Created by the hub when a transport was accepted or successfully
/// dialled; destroyed on transport close. Exactly one state machine
/// advances it.
pub struct ShipConnection {
    pub(crate) role: ShipRole,
    pub(crate) local_ship_id: String,
    remote_ski: String,

    pub(crate) info_provider: Arc<dyn ConnectionInfoProvider>,
    pub(crate) data_writer: Arc<dyn MessageWriter>,

    pub(crate) sme: Mutex<SmeState>,
    /// Serialises handshake processing across transport, timer and API
    /// entry points
    process_lock: Mutex<()>,

    pub(crate) remote_ship_id: Mutex<String>,
    pub(crate) last_received_waiting: Mutex<Option<u64>>,

    spine_buffer: Mutex<VecDeque<Vec<u8>>>,
    data_reader: Mutex<Option<Arc<dyn PayloadReader>>>,

    timer: HandshakeTimer,
    closed: AtomicBool,

    pub(crate) me: Weak<ShipConnection>,
}

impl ShipConnection {
    /// Create a connection over an initialised transport and register for
    /// its messages. The handshake does not start until [`run`] is called.
    ///
    /// [`run`]: ShipConnection::run
    pub fn new(
        info_provider: Arc<dyn ConnectionInfoProvider>,
        data_writer: Arc<dyn MessageWriter>,
        role: ShipRole,
        local_ship_id: &str,
        remote_ski: &str,
        remote_ship_id: &str,
    ) -> Arc<Self> {
        let connection = Arc::new_cyclic(|me| Self {
            role,
            local_ship_id: local_ship_id.to_string(),
            remote_ski: ship_model::normalize_ski(remote_ski),
            info_provider,
            data_writer,
            sme: Mutex::new(SmeState {
                state: ShipHandshakeState::CmiInitStart,
                error: None,
            }),
            process_lock: Mutex::new(()),
            remote_ship_id: Mutex::new(remote_ship_id.to_string()),
            last_received_waiting: Mutex::new(None),
            spine_buffer: Mutex::new(VecDeque::new()),
            data_reader: Mutex::new(None),
            timer: HandshakeTimer::new(),
            closed: AtomicBool::new(false),
            me: me.clone(),
        });

        connection
            .timer
            .spawn_scheduler(Arc::downgrade(&connection));
        connection
            .data_writer
            .init_message_handling(connection.clone());

        connection
    }

    /// Start SHIP communication.
    pub fn run(&self) {
        self.handle_ship_message(false, None);
    }

    pub fn remote_ski(&self) -> &str {
        &self.remote_ski
    }

    /// The transport this connection writes to. The hub uses handle
    /// identity to tell double connections apart.
    pub fn data_handler(&self) -> Arc<dyn MessageWriter> {
        self.data_writer.clone()
    }

    /// Current handshake state and the error value if the state is an
    /// error.
    pub fn ship_handshake_state(&self) -> ShipStateDetail {
        let sme = self.sme.lock();
        ShipStateDetail::new(sme.state, sme.error.clone())
    }

    pub(crate) fn timer(&self) -> &HandshakeTimer {
        &self.timer
    }

    /// Invoked when pairing for a pending request is approved. Only valid
    /// in the pending-listen hello state; a no-op otherwise.
    pub fn approve_pending_handshake(&self) {
        let _guard = self.process_lock.lock();

        if self.state() != ShipHandshakeState::HelloPendingListen {
            return;
        }

        self.stop_handshake_timer();
        self.set_and_handle_state(ShipHandshakeState::HelloReadyInit);
        self.set_and_handle_state(ShipHandshakeState::HelloOk);
    }

    /// Invoked when pairing for a pending request is denied. Valid in the
    /// pending- and ready-listen hello states; a no-op otherwise.
    pub fn abort_pending_handshake(&self) {
        let _guard = self.process_lock.lock();

        let state = self.state();
        if state != ShipHandshakeState::HelloPendingListen
            && state != ShipHandshakeState::HelloReadyListen
        {
            return;
        }

        self.stop_handshake_timer();
        self.set_and_handle_state(ShipHandshakeState::HelloAbort);
    }

    /// Close this connection. A safe close from the completed state runs
    /// the SHIP termination-announce protocol; any other state drops the
    /// transport with `close_code` (default 4001). Idempotent.
    pub fn close_connection(&self, safe: bool, close_code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_handshake_timer();

        let state = self.state();
        let handshake_end = state.is_handshake_end();

        if safe && state == ShipHandshakeState::Complete {
            // SHIP 13.4.7: Connection Termination Announce
            let close_message = ConnectionClose::announce(500, reason);
            let _ = self.send_ship_model(MsgType::END, &close_message);

            if let Some(connection) = self.me.upgrade() {
                tokio::spawn(async move {
                    // give the announce a moment on the wire
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    connection.data_writer.close(4001, "close");
                    connection
                        .info_provider
                        .handle_connection_closed(&connection, handshake_end);
                });
            }
            return;
        }

        let close_code = if close_code != 0 { close_code } else { 4001 };
        self.data_writer.close(close_code, reason);
        self.info_provider.handle_connection_closed(self, handshake_end);
    }

    /* state plumbing, used by the handshake modules */

    pub(crate) fn state(&self) -> ShipHandshakeState {
        self.sme.lock().state
    }

    pub(crate) fn set_and_handle_state(&self, state: ShipHandshakeState) {
        self.set_state(state, None);
        self.handle_state(false, None);
    }

    /// Entry point for received SHIP messages and timer expiries.
    pub(crate) fn handle_ship_message(&self, timeout: bool, message: Option<&[u8]>) {
        let _guard = self.process_lock.lock();

        if let Some(message) = message {
            if message.len() > 2 && self.try_handle_close_message(message) {
                return;
            }
        }

        self.handle_state(timeout, message);
    }

    /// Handle `connectionClose` regardless of handshake state. Returns
    /// `true` when the message was a close message.
    fn try_handle_close_message(&self, message: &[u8]) -> bool {
        let Ok(close) = decode_ship_model::<ConnectionClose>(message) else {
            return false;
        };

        let completed = self.state() == ShipHandshakeState::Complete;

        match close.connection_close.phase {
            ConnectionClosePhase::Announce => {
                // SHIP 13.4.7: Connection Termination Confirm
                let _ = self.send_ship_model(MsgType::END, &ConnectionClose::confirm());

                if let Some(connection) = self.me.upgrade() {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        connection.data_writer.close(4001, "close");
                        connection
                            .info_provider
                            .handle_connection_closed(&connection, completed);
                    });
                }
            }
            ConnectionClosePhase::Confirm => {
                // our announce was confirmed, drop right away
                self.data_writer.close(4001, "close");
                self.info_provider.handle_connection_closed(self, completed);
            }
        }

        true
    }

    /* transport callbacks */

    fn handle_data_message(&self, message: &[u8]) {
        let data = match decode_ship_frame(message)
            .and_then(|(_, value)| {
                serde_json::from_value::<ShipData>(value)
                    .map_err(|e| ShipError::ProtocolViolation(e.to_string()))
            }) {
            Ok(data) => data,
            Err(e) => {
                debug!(ski = %self.remote_ski, "error unmarshalling message: {e}");
                return;
            }
        };

        let payload = match data.payload_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(ski = %self.remote_ski, "{e}");
                return;
            }
        };

        if let Err(e) = self.route_payload(payload) {
            self.end_handshake_with_error(e);
        }
    }

    /// Deliver a payload to the SPINE reader, or buffer it while the
    /// handshake is still running. Buffered payloads drain in FIFO order on
    /// completion.
    fn route_payload(&self, payload: Vec<u8>) -> Result<(), ShipError> {
        let mut buffer = self.spine_buffer.lock();

        if let Some(reader) = self.data_reader.lock().clone() {
            drop(buffer);
            reader.handle_ship_payload(payload);
            return Ok(());
        }

        if buffer.len() >= SPINE_BUFFER_CAPACITY {
            return Err(ShipError::BufferOverflow);
        }
        buffer.push_back(payload);
        Ok(())
    }

    /// Install the SPINE reader and drain everything buffered so far, in
    /// arrival order. New payloads wait on the buffer lock until the drain
    /// finished, preserving order.
    pub(crate) fn attach_payload_reader(&self, reader: Arc<dyn PayloadReader>) {
        let mut buffer = self.spine_buffer.lock();
        *self.data_reader.lock() = Some(reader.clone());
        for payload in buffer.drain(..) {
            reader.handle_ship_payload(payload);
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered_payload_count(&self) -> usize {
        self.spine_buffer.lock().len()
    }

    /* sending */

    fn send_spine_data(&self, payload: &[u8]) -> Result<(), ShipError> {
        let message = wrap_spine_payload(payload)?;

        let (is_closed, error) = self.data_writer.is_closed();
        if is_closed {
            self.close_connection(false, 0, "");
            return Err(error
                .unwrap_or_else(|| ShipError::TransportClosed("connection is closed".to_string())));
        }

        self.data_writer.write_message(message)
    }

    /// Encode a model into a tagged frame, refusing on a closed transport.
    pub(crate) fn ship_message<T: Serialize>(
        &self,
        tag: u8,
        model: &T,
    ) -> Result<Vec<u8>, ShipError> {
        let (is_closed, error) = self.data_writer.is_closed();
        if is_closed {
            self.close_connection(false, 0, "");
            return Err(error
                .unwrap_or_else(|| ShipError::TransportClosed("connection is closed".to_string())));
        }

        encode_ship_model(tag, model)
    }

    /// Send a json message for a provided model.
    pub(crate) fn send_ship_model<T: Serialize>(
        &self,
        tag: u8,
        model: &T,
    ) -> Result<(), ShipError> {
        let message = self.ship_message(tag, model)?;
        trace!(ski = %self.remote_ski, "Send: {}", String::from_utf8_lossy(&message[1..]));
        self.data_writer.write_message(message)
    }

    /// Decode a received control frame into a typed model.
    pub(crate) fn process_ship_json_message<T: DeserializeOwned>(
        &self,
        message: &[u8],
    ) -> Result<T, ShipError> {
        decode_ship_model(message)
    }

    /* timers */

    pub(crate) fn set_handshake_timer(
        &self,
        kind: crate::timer::TimerKind,
        duration: Duration,
    ) {
        self.timer.set(kind, duration);
    }

    pub(crate) fn stop_handshake_timer(&self) {
        self.timer.stop();
    }
}

impl MessageReader for ShipConnection {
    fn handle_incoming_message(&self, message: Vec<u8>) {
        trace!(ski = %self.remote_ski, "Recv: {}", String::from_utf8_lossy(&message));

        match message.first() {
            Some(&MsgType::DATA) => self.handle_data_message(&message),
            _ => self.handle_ship_message(false, Some(&message)),
        }
    }

    fn report_connection_error(&self, error: ShipError) {
        let _guard = self.process_lock.lock();

        // rejections arrive as a pending hello followed by a close with
        // "4452: Node rejected by application"
        match self.state() {
            ShipHandshakeState::HelloReadyListen => {
                self.set_state(ShipHandshakeState::HelloRejected, None);
                self.close_connection(false, 0, "");
            }
            ShipHandshakeState::HelloRemoteAbortDone => {
                self.close_connection(false, 0, "");
            }
            ShipHandshakeState::HelloAbort | ShipHandshakeState::HelloAbortDone => {
                self.close_connection(false, 4452, "Node rejected by application");
            }
            _ => {
                self.set_state(ShipHandshakeState::Error, Some(error.clone()));
                self.close_connection(false, 0, "");
                self.info_provider.handle_handshake_state_update(
                    &self.remote_ski,
                    ShipStateDetail::new(ShipHandshakeState::Error, Some(error)),
                );
            }
        }
    }
}

impl PayloadWriter for ShipConnection {
    fn write_ship_payload(&self, payload: &[u8]) {
        if let Err(e) = self.send_spine_data(payload) {
            debug!(ski = %self.remote_ski, "error sending spine message: {e}");
        }
    }
}
