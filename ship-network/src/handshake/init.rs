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

//! Connection Mode Initialisation (SHIP 13.4.3)
//!
//! The first exchange on every connection: both sides send the two bytes
//! `[INIT, 0x00]`. Any other first frame is a hard error.

use crate::connection::{ShipConnection, ShipRole};
use crate::timer::TimerKind;
use crate::CMI_TIMEOUT;
use ship_model::{ShipError, ShipHandshakeState, SHIP_INIT};

impl ShipConnection {
    pub(crate) fn handshake_init_start(&self) {
        match self.role {
            ShipRole::Client => {
                self.set_state(ShipHandshakeState::CmiClientSend, None);
                if let Err(e) = self.data_writer.write_message(SHIP_INIT.to_vec()) {
                    self.end_handshake_with_error(e);
                    return;
                }
                self.set_state(ShipHandshakeState::CmiClientWait, None);
            }
            ShipRole::Server => {
                self.set_state(ShipHandshakeState::CmiServerWait, None);
            }
        }

        self.set_handshake_timer(TimerKind::WaitForReady, CMI_TIMEOUT);
    }

    pub(crate) fn handshake_init_client_wait(&self, message: Option<&[u8]>) {
        self.set_state(ShipHandshakeState::CmiClientEvaluate, None);

        if message != Some(&SHIP_INIT[..]) {
            self.end_handshake_with_error(ShipError::InvalidFrame(
                "invalid CMI message".to_string(),
            ));
            return;
        }

        self.set_and_handle_state(ShipHandshakeState::Hello);
    }

    pub(crate) fn handshake_init_server_wait(&self, message: Option<&[u8]>) {
        self.set_state(ShipHandshakeState::CmiServerEvaluate, None);

        if message != Some(&SHIP_INIT[..]) {
            self.end_handshake_with_error(ShipError::InvalidFrame(
                "invalid CMI message".to_string(),
            ));
            return;
        }

        if let Err(e) = self.data_writer.write_message(SHIP_INIT.to_vec()) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_and_handle_state(ShipHandshakeState::Hello);
    }
}
