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

//! Hello phase (SHIP 13.4.4.1)
//!
//! The trust negotiation. A side that already trusts the peer (or dialled
//! it) announces `ready`; an unpaired listener announces `pending` with a
//! waiting window and keeps the window open with prolongation requests for
//! as long as the host allows waiting for the user's decision.

use crate::connection::ShipConnection;
use crate::timer::TimerKind;
use crate::{
    T_HELLO_INIT, T_HELLO_PROLONG_MIN, T_HELLO_PROLONG_THR_INC, T_HELLO_PROLONG_WAITING_GAP,
};
use ship_model::{ConnectionHello, ConnectionHelloPhase, MsgType, ShipError, ShipHandshakeState};
use std::time::Duration;

impl ShipConnection {
    fn handshake_hello_send(
        &self,
        phase: ConnectionHelloPhase,
        waiting: Option<u64>,
        prolongation_request: Option<bool>,
    ) -> Result<(), ShipError> {
        let hello = ConnectionHello::new(phase, waiting, prolongation_request);
        self.send_ship_model(MsgType::CONTROL, &hello)
    }

    /// `HelloReadyInit`: announce ready, no waiting value.
    pub(crate) fn handshake_hello_init(&self) {
        if let Err(e) = self.handshake_hello_send(ConnectionHelloPhase::Ready, None, None) {
            self.end_handshake_with_error(e);
            return;
        }
        self.set_state(ShipHandshakeState::HelloReadyListen, None);
    }

    /// `HelloPendingInit`: announce pending with the full waiting window,
    /// then check whether waiting is allowed at all.
    pub(crate) fn handshake_hello_pending_init(&self) {
        if let Err(e) = self.handshake_hello_send(
            ConnectionHelloPhase::Pending,
            Some(T_HELLO_INIT.as_millis() as u64),
            None,
        ) {
            self.end_handshake_with_error(e);
            return;
        }
        self.set_state(ShipHandshakeState::HelloPendingListen, None);

        if !self
            .info_provider
            .allow_waiting_for_trust(self.remote_ski())
        {
            self.set_and_handle_state(ShipHandshakeState::HelloAbort);
        }
    }

    /// `HelloReadyListen`: we are ready, the peer must get there too.
    pub(crate) fn handshake_hello_ready_listen(&self, timeout: bool, message: Option<&[u8]>) {
        if timeout {
            self.set_and_handle_state(ShipHandshakeState::HelloReadyTimeout);
            return;
        }

        let hello: ConnectionHello = match message
            .ok_or_else(|| ShipError::ProtocolViolation("received no hello message".to_string()))
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(hello) => hello,
            Err(e) => {
                self.end_handshake_with_error(e);
                return;
            }
        };

        let hello = hello.connection_hello;
        match hello.phase {
            ConnectionHelloPhase::Ready => {
                // HELLO_OK
                self.set_and_handle_state(ShipHandshakeState::HelloOk);
            }
            ConnectionHelloPhase::Pending => {
                if hello.prolongation_request != Some(true) {
                    // peer is merely pending, keep listening
                    return;
                }
                if self
                    .info_provider
                    .allow_waiting_for_trust(self.remote_ski())
                {
                    // grant the prolongation: fresh window, re-announce it
                    self.set_handshake_timer(TimerKind::WaitForReady, T_HELLO_INIT);
                    if let Err(e) = self.handshake_hello_send(
                        ConnectionHelloPhase::Ready,
                        Some(T_HELLO_INIT.as_millis() as u64),
                        None,
                    ) {
                        self.end_handshake_with_error(e);
                    }
                } else {
                    self.set_and_handle_state(ShipHandshakeState::HelloAbort);
                }
            }
            ConnectionHelloPhase::Aborted => {
                self.set_and_handle_state(ShipHandshakeState::HelloRemoteAbortDone);
            }
            ConnectionHelloPhase::Unknown => {
                self.end_handshake_with_error(ShipError::ProtocolViolation(
                    "received an unknown hello phase".to_string(),
                ));
            }
        }
    }

    /// `HelloPendingListen`: we wait for the user, the peer waits for us.
    pub(crate) fn handshake_hello_pending_listen(&self, timeout: bool, message: Option<&[u8]>) {
        if timeout {
            self.handshake_hello_pending_timeout();
            return;
        }

        let hello: ConnectionHello = match message
            .ok_or_else(|| ShipError::ProtocolViolation("received no hello message".to_string()))
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(hello) => hello,
            Err(e) => {
                self.end_handshake_with_error(e);
                return;
            }
        };

        let hello = hello.connection_hello;
        match hello.phase {
            ConnectionHelloPhase::Ready => match hello.waiting {
                // the peer is ready and (still) grants us time
                Some(waiting) => self.set_waiting_timer(waiting),
                // the peer expects us ready, but we are not trusted yet
                None => self.set_and_handle_state(ShipHandshakeState::HelloAbort),
            },
            ConnectionHelloPhase::Pending => {
                if hello.prolongation_request == Some(true) {
                    // answer with our own current window
                    if let Err(e) = self.handshake_hello_send(
                        ConnectionHelloPhase::Pending,
                        Some(T_HELLO_INIT.as_millis() as u64),
                        None,
                    ) {
                        self.end_handshake_with_error(e);
                    }
                    return;
                }
                if let Some(waiting) = hello.waiting {
                    self.set_waiting_timer(waiting);
                }
            }
            ConnectionHelloPhase::Aborted => {
                self.set_and_handle_state(ShipHandshakeState::HelloRemoteAbortDone);
            }
            ConnectionHelloPhase::Unknown => {
                self.set_and_handle_state(ShipHandshakeState::HelloAbort);
            }
        }
    }

    /// A hello timer fired while pending.
    fn handshake_hello_pending_timeout(&self) {
        // no answer to our prolongation request: give up
        if self.timer().kind() == TimerKind::ProlongRequestReply {
            self.set_and_handle_state(ShipHandshakeState::HelloPendingTimeout);
            return;
        }

        if self
            .info_provider
            .allow_waiting_for_trust(self.remote_ski())
        {
            self.handshake_hello_prolongation_request();
        } else {
            self.set_and_handle_state(ShipHandshakeState::HelloPendingTimeout);
        }
    }

    /// Ask the peer for more time before its wait-for-ready window closes.
    fn handshake_hello_prolongation_request(&self) {
        if let Err(e) =
            self.handshake_hello_send(ConnectionHelloPhase::Pending, None, Some(true))
        {
            self.end_handshake_with_error(e);
            return;
        }

        // the answer must arrive within what is left of the peer's window
        let reply_window = match *self.last_received_waiting.lock() {
            Some(waiting_ms) => Duration::from_millis(waiting_ms)
                .min(T_HELLO_PROLONG_WAITING_GAP)
                .max(T_HELLO_PROLONG_MIN),
            None => T_HELLO_PROLONG_WAITING_GAP,
        };
        self.set_handshake_timer(TimerKind::ProlongRequestReply, reply_window);
    }

    /// Arm the timer from a waiting value the peer granted. Long windows
    /// get a send-prolongation timer that fires before the peer's window
    /// closes; short ones are taken as-is.
    fn set_waiting_timer(&self, waiting_ms: u64) {
        *self.last_received_waiting.lock() = Some(waiting_ms);

        let waiting = Duration::from_millis(waiting_ms);
        if waiting >= T_HELLO_PROLONG_THR_INC {
            self.set_handshake_timer(
                TimerKind::SendProlongationRequest,
                waiting - T_HELLO_PROLONG_WAITING_GAP,
            );
        } else {
            self.set_handshake_timer(
                TimerKind::WaitForReady,
                waiting.max(T_HELLO_PROLONG_MIN),
            );
        }
    }

    /// `HelloAbort`: tell the peer and enter the terminal abort state.
    pub(crate) fn handshake_hello_abort(&self) {
        self.stop_handshake_timer();

        if let Err(e) = self.handshake_hello_send(ConnectionHelloPhase::Aborted, None, None) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_and_handle_state(ShipHandshakeState::HelloAbortDone);
    }
}
