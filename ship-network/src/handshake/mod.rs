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

//! Handshake state coordination
//!
//! [`ShipConnection::handle_state`] dispatches a received message or timer
//! expiry to the handler of the current state; the per-phase handlers live
//! in the sibling modules. [`ShipConnection::set_state`] owns the timer
//! side effects of entering a state and reports every actual state change
//! upstream.

mod access;
mod hello;
mod init;
mod pin;
mod protocol;

use crate::connection::{ShipConnection, ShipRole};
use crate::timer::TimerKind;
use crate::{CMI_TIMEOUT, T_HELLO_INIT};
use ship_model::{ShipError, ShipHandshakeState, ShipStateDetail};
use std::time::Duration;
use tracing::{debug, trace};

impl ShipConnection {
    /// Set a new handshake state, handle entry timers, and report the
    /// change upstream if the state actually changed.
    pub(crate) fn set_state(&self, new_state: ShipHandshakeState, error: Option<ShipError>) {
        let old_state;
        {
            let mut sme = self.sme.lock();
            old_state = sme.state;
            sme.state = new_state;
            trace!(ski = %self.remote_ski(), "SHIP state changed to: {new_state:?}");

            sme.error = None;
            if old_state != new_state {
                sme.error = error.clone();
            }
        }

        match new_state {
            ShipHandshakeState::HelloReadyInit | ShipHandshakeState::HelloPendingInit => {
                self.set_handshake_timer(TimerKind::WaitForReady, T_HELLO_INIT);
            }
            ShipHandshakeState::HelloOk
            | ShipHandshakeState::HelloAbort
            | ShipHandshakeState::HelloAbortDone
            | ShipHandshakeState::HelloRemoteAbortDone
            | ShipHandshakeState::HelloRejected => {
                self.stop_handshake_timer();
            }
            ShipHandshakeState::ProtHClientListenChoice => {
                self.set_handshake_timer(TimerKind::WaitForReady, CMI_TIMEOUT);
            }
            ShipHandshakeState::ProtHClientOk => {
                self.stop_handshake_timer();
            }
            _ => {}
        }

        if old_state != new_state {
            self.info_provider.handle_handshake_state_update(
                self.remote_ski(),
                ShipStateDetail::new(new_state, error),
            );
        }
    }

    /// Handle handshake state transitions.
    pub(crate) fn handle_state(&self, timeout: bool, message: Option<&[u8]>) {
        match self.state() {
            ShipHandshakeState::Error => {
                debug!(ski = %self.remote_ski(), "connection is in error state");
            }

            // cmi
            ShipHandshakeState::CmiInitStart => self.handshake_init_start(),
            ShipHandshakeState::CmiClientWait => {
                if timeout {
                    self.end_handshake_with_error(ShipError::HandshakeTimeout(
                        "ship client handshake timeout".to_string(),
                    ));
                    return;
                }
                self.handshake_init_client_wait(message);
            }
            ShipHandshakeState::CmiServerWait => {
                if timeout {
                    self.end_handshake_with_error(ShipError::HandshakeTimeout(
                        "ship server handshake timeout".to_string(),
                    ));
                    return;
                }
                self.handshake_init_server_wait(message);
            }

            // hello
            ShipHandshakeState::Hello => {
                // already trusted, or this side initiated the connection:
                // announce ready; otherwise wait pending for the user
                if self.info_provider.is_remote_service_paired(self.remote_ski())
                    || self.role == ShipRole::Client
                {
                    self.set_state(ShipHandshakeState::HelloReadyInit, None);
                } else {
                    self.set_state(ShipHandshakeState::HelloPendingInit, None);
                }
                self.handle_state(timeout, message);
            }
            ShipHandshakeState::HelloReadyInit => self.handshake_hello_init(),
            ShipHandshakeState::HelloReadyListen => {
                self.handshake_hello_ready_listen(timeout, message);
            }
            ShipHandshakeState::HelloReadyTimeout | ShipHandshakeState::HelloPendingTimeout => {
                self.set_and_handle_state(ShipHandshakeState::HelloAbort);
            }
            ShipHandshakeState::HelloPendingInit => self.handshake_hello_pending_init(),
            ShipHandshakeState::HelloPendingListen => {
                self.handshake_hello_pending_listen(timeout, message);
            }
            ShipHandshakeState::HelloOk => self.handshake_protocol_init(),
            ShipHandshakeState::HelloAbort => self.handshake_hello_abort(),
            ShipHandshakeState::HelloAbortDone | ShipHandshakeState::HelloRemoteAbortDone => {
                // leave the peer a moment to read the abort before dropping
                if let Some(connection) = self.me.upgrade() {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        connection.close_connection(false, 4452, "Node rejected by application");
                    });
                }
            }

            // protocol handshake
            ShipHandshakeState::ProtHServerListenProposal => {
                self.handshake_protocol_server_listen_proposal(timeout, message);
            }
            ShipHandshakeState::ProtHServerListenConfirm => {
                self.handshake_protocol_server_listen_confirm(timeout, message);
            }
            ShipHandshakeState::ProtHClientListenChoice => {
                self.stop_handshake_timer();
                self.handshake_protocol_client_listen_choice(timeout, message);
            }
            ShipHandshakeState::ProtHClientOk | ShipHandshakeState::ProtHServerOk => {
                self.set_and_handle_state(ShipHandshakeState::PinCheckInit);
            }

            // pin
            ShipHandshakeState::PinCheckInit => self.handshake_pin_init(),
            ShipHandshakeState::PinCheckListen => self.handshake_pin_check_listen(message),
            ShipHandshakeState::PinCheckOk => self.handshake_access_methods_init(),

            // access methods
            ShipHandshakeState::AccessMethodsRequest => {
                self.handshake_access_methods_request(message);
            }

            _ => {}
        }
    }

    /// The SHIP handshake is approved: wire up the SPINE engine, enter the
    /// completed state and drain payloads that arrived early.
    pub(crate) fn approve_handshake(&self) {
        let Some(connection) = self.me.upgrade() else {
            return;
        };

        let reader = self
            .info_provider
            .setup_remote_device(self.remote_ski(), connection);

        self.stop_handshake_timer();
        self.set_state(ShipHandshakeState::Complete, None);
        self.attach_payload_reader(reader);
    }

    /// End the handshake process because of an error.
    pub(crate) fn end_handshake_with_error(&self, error: ShipError) {
        self.stop_handshake_timer();

        self.set_state(ShipHandshakeState::Error, Some(error.clone()));

        debug!(ski = %self.remote_ski(), "SHIP handshake error: {error}");

        self.close_connection(true, 0, &error.to_string());

        self.info_provider.handle_handshake_state_update(
            self.remote_ski(),
            ShipStateDetail::new(ShipHandshakeState::Error, Some(error)),
        );
    }
}
