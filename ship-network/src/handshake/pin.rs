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

//! PIN phase (SHIP 13.4.5)
//!
//! This implementation requires no PIN and accepts peers that require
//! none: `none` and `pinOk` pass, `required` and `optional` terminate the
//! handshake. The full PIN-entry sub-protocol is a known follow-up.

use crate::connection::ShipConnection;
use ship_model::{ConnectionPinState, MsgType, PinState, ShipError, ShipHandshakeState};

impl ShipConnection {
    pub(crate) fn handshake_pin_init(&self) {
        let pin_state = ConnectionPinState::new(PinState::None);
        if let Err(e) = self.send_ship_model(MsgType::CONTROL, &pin_state) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_state(ShipHandshakeState::PinCheckListen, None);
    }

    pub(crate) fn handshake_pin_check_listen(&self, message: Option<&[u8]>) {
        let pin_state: ConnectionPinState = match message
            .ok_or_else(|| ShipError::ProtocolViolation("received no pin message".to_string()))
            .and_then(|m| self.process_ship_json_message(m))
        {
            Ok(pin_state) => pin_state,
            Err(e) => {
                self.end_handshake_with_error(e);
                return;
            }
        };

        match pin_state.connection_pin_state.pin_state {
            PinState::None | PinState::PinOk => {
                self.set_and_handle_state(ShipHandshakeState::PinCheckOk);
            }
            PinState::Required => {
                self.end_handshake_with_error(ShipError::ProtocolViolation(
                    "pin state required is not supported".to_string(),
                ));
            }
            PinState::Optional => {
                self.end_handshake_with_error(ShipError::ProtocolViolation(
                    "pin state optional is not supported".to_string(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::{ShipConnection, ShipRole};
    use crate::test_support::{TestInfoProvider, TestWriter};
    use ship_model::codec::encode_ship_model;
    use ship_model::{ConnectionPinState, MsgType, PinState, ShipHandshakeState};
    use std::sync::Arc;

    fn setup() -> (Arc<ShipConnection>, Arc<TestWriter>, Arc<TestInfoProvider>) {
        let writer = TestWriter::new();
        let info = TestInfoProvider::new();
        let connection = ShipConnection::new(
            info.clone(),
            writer.clone(),
            ShipRole::Server,
            "LocalShipID",
            &"aa".repeat(20),
            "RemoteShipID",
        );
        (connection, writer, info)
    }

    fn pin_frame(pin_state: PinState) -> Vec<u8> {
        let message = ConnectionPinState::new(pin_state);
        encode_ship_model(MsgType::CONTROL, &message).unwrap()
    }

    #[tokio::test]
    async fn test_pin_init_sends_none() {
        let (connection, writer, _) = setup();

        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        assert_eq!(connection.state(), ShipHandshakeState::PinCheckListen);
        let text = String::from_utf8_lossy(&writer.last_message().unwrap()[1..]).to_string();
        assert!(text.contains(r#""pinState":"none""#));
    }

    #[tokio::test]
    async fn test_pin_none_accepted() {
        let (connection, _, _) = setup();
        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        let msg = pin_frame(PinState::None);
        connection.handle_state(false, Some(&msg));

        // access methods start right away
        assert_eq!(connection.state(), ShipHandshakeState::AccessMethodsRequest);
    }

    #[tokio::test]
    async fn test_pin_ok_accepted() {
        let (connection, _, _) = setup();
        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        let msg = pin_frame(PinState::PinOk);
        connection.handle_state(false, Some(&msg));

        assert_eq!(connection.state(), ShipHandshakeState::AccessMethodsRequest);
    }

    #[tokio::test]
    async fn test_pin_required_rejected() {
        let (connection, _, _) = setup();
        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        let msg = pin_frame(PinState::Required);
        connection.handle_state(false, Some(&msg));

        let detail = connection.ship_handshake_state();
        assert_eq!(detail.state, ShipHandshakeState::Error);
        assert!(detail.error.is_some());
    }

    #[tokio::test]
    async fn test_pin_optional_rejected() {
        let (connection, _, _) = setup();
        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        let msg = pin_frame(PinState::Optional);
        connection.handle_state(false, Some(&msg));

        assert_eq!(connection.state(), ShipHandshakeState::Error);
    }

    #[tokio::test]
    async fn test_pin_unknown_value_rejected() {
        let (connection, _, _) = setup();
        connection.set_state(ShipHandshakeState::PinCheckInit, None);
        connection.handle_state(false, None);

        let mut msg = vec![MsgType::CONTROL];
        msg.extend_from_slice(br#"[{"connectionPinState":[{"pinState":"maybe"}]}]"#);
        connection.handle_state(false, Some(&msg));

        assert_eq!(connection.state(), ShipHandshakeState::Error);
    }
}
