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

//! Protocol handshake (SHIP 13.4.4.2)
//!
//! The client announces its maximum supported version and formats; the
//! server answers with a matching selection which the client confirms.
//! Only version 1.0 with JSON-UTF8 exists.

use crate::connection::{ShipConnection, ShipRole};
use crate::timer::TimerKind;
use crate::CMI_TIMEOUT;
use ship_model::message::handshake_error;
use ship_model::{
    MessageProtocolHandshake, MessageProtocolHandshakeError, MsgType, ProtocolHandshakeType,
    ShipError, ShipHandshakeState,
};

impl ShipConnection {
    pub(crate) fn handshake_protocol_init(&self) {
        match self.role {
            ShipRole::Server => {
                self.set_state(ShipHandshakeState::ProtHServerInit, None);
                self.set_handshake_timer(TimerKind::WaitForReady, CMI_TIMEOUT);
                self.set_state(ShipHandshakeState::ProtHServerListenProposal, None);
            }
            ShipRole::Client => {
                self.set_state(ShipHandshakeState::ProtHClientInit, None);

                let announce =
                    MessageProtocolHandshake::new(ProtocolHandshakeType::AnnounceMax);
                if let Err(e) = self.send_ship_model(MsgType::CONTROL, &announce) {
                    self.end_handshake_with_error(e);
                    return;
                }

                self.set_state(ShipHandshakeState::ProtHClientListenChoice, None);
            }
        }
    }

    /// Send the handshake error answer and terminate.
    fn abort_protocol_handshake(&self, error_code: u8, error: ShipError) {
        let message = MessageProtocolHandshakeError::new(error_code);
        let _ = self.send_ship_model(MsgType::CONTROL, &message);

        self.stop_handshake_timer();
        self.end_handshake_with_error(error);
    }

    pub(crate) fn handshake_protocol_server_listen_proposal(
        &self,
        timeout: bool,
        message: Option<&[u8]>,
    ) {
        if timeout {
            self.abort_protocol_handshake(
                handshake_error::TIMEOUT,
                ShipError::HandshakeTimeout("ship protocol proposal timeout".to_string()),
            );
            return;
        }

        let handshake: MessageProtocolHandshake = match message
            .ok_or_else(|| {
                ShipError::ProtocolViolation("received no handshake message".to_string())
            })
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(handshake) => handshake,
            Err(_) => {
                self.abort_protocol_handshake(
                    handshake_error::UNEXPECTED_MESSAGE,
                    ShipError::ProtocolViolation(
                        "expected a protocol handshake announcement".to_string(),
                    ),
                );
                return;
            }
        };

        if handshake.message_protocol_handshake.handshake_type
            != ProtocolHandshakeType::AnnounceMax
            || !handshake.is_supported_selection()
        {
            self.abort_protocol_handshake(
                handshake_error::SELECTION_MISMATCH,
                ShipError::ProtocolViolation(
                    "the provided protocol handshake is not supported".to_string(),
                ),
            );
            return;
        }

        let select = MessageProtocolHandshake::new(ProtocolHandshakeType::Select);
        if let Err(e) = self.send_ship_model(MsgType::CONTROL, &select) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_state(ShipHandshakeState::ProtHServerListenConfirm, None);
    }

    pub(crate) fn handshake_protocol_server_listen_confirm(
        &self,
        timeout: bool,
        message: Option<&[u8]>,
    ) {
        if timeout {
            self.abort_protocol_handshake(
                handshake_error::TIMEOUT,
                ShipError::HandshakeTimeout("ship protocol confirmation timeout".to_string()),
            );
            return;
        }

        let handshake: MessageProtocolHandshake = match message
            .ok_or_else(|| {
                ShipError::ProtocolViolation("received no handshake message".to_string())
            })
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(handshake) => handshake,
            Err(_) => {
                self.abort_protocol_handshake(
                    handshake_error::UNEXPECTED_MESSAGE,
                    ShipError::ProtocolViolation(
                        "expected a protocol handshake confirmation".to_string(),
                    ),
                );
                return;
            }
        };

        if handshake.message_protocol_handshake.handshake_type != ProtocolHandshakeType::Select
            || !handshake.is_supported_selection()
        {
            self.abort_protocol_handshake(
                handshake_error::SELECTION_MISMATCH,
                ShipError::ProtocolViolation(
                    "the selected protocol was not confirmed".to_string(),
                ),
            );
            return;
        }

        self.stop_handshake_timer();
        self.set_and_handle_state(ShipHandshakeState::ProtHServerOk);
    }

    pub(crate) fn handshake_protocol_client_listen_choice(
        &self,
        timeout: bool,
        message: Option<&[u8]>,
    ) {
        if timeout {
            self.abort_protocol_handshake(
                handshake_error::TIMEOUT,
                ShipError::HandshakeTimeout("ship protocol selection timeout".to_string()),
            );
            return;
        }

        let handshake: MessageProtocolHandshake = match message
            .ok_or_else(|| {
                ShipError::ProtocolViolation("received no handshake message".to_string())
            })
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(handshake) => handshake,
            Err(_) => {
                self.abort_protocol_handshake(
                    handshake_error::UNEXPECTED_MESSAGE,
                    ShipError::ProtocolViolation(
                        "expected the server's protocol selection".to_string(),
                    ),
                );
                return;
            }
        };

        if handshake.message_protocol_handshake.handshake_type != ProtocolHandshakeType::Select
            || !handshake.is_supported_selection()
        {
            self.abort_protocol_handshake(
                handshake_error::SELECTION_MISMATCH,
                ShipError::ProtocolViolation(
                    "the server selected an unsupported protocol".to_string(),
                ),
            );
            return;
        }

        // confirm the selection back to the server
        let confirm = MessageProtocolHandshake::new(ProtocolHandshakeType::Select);
        if let Err(e) = self.send_ship_model(MsgType::CONTROL, &confirm) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_and_handle_state(ShipHandshakeState::ProtHClientOk);
    }
}
