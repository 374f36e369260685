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

//! Access-methods identification (SHIP 13.4.6)
//!
//! The last handshake step: both sides exchange their SHIP IDs. The ID the
//! peer reports is pinned against the one persisted from a previous
//! pairing; a changed ID means a different identity behind a known SKI.

use crate::connection::ShipConnection;
use ship_model::codec::decode_ship_frame;
use ship_model::{AccessMethods, MsgType, ShipError, ShipHandshakeState};

impl ShipConnection {
    pub(crate) fn handshake_access_methods_init(&self) {
        let methods = AccessMethods::new(&self.local_ship_id);
        if let Err(e) = self.send_ship_model(MsgType::CONTROL, &methods) {
            self.end_handshake_with_error(e);
            return;
        }

        self.set_state(ShipHandshakeState::AccessMethodsRequest, None);
    }

    pub(crate) fn handshake_access_methods_request(&self, message: Option<&[u8]>) {
        let value = match message
            .ok_or_else(|| {
                ShipError::ProtocolViolation("received no access methods message".to_string())
            })
            .and_then(|m| decode_ship_frame(m).map(|(_, value)| value))
        {
            Ok(value) => value,
            Err(e) => {
                self.end_handshake_with_error(e);
                return;
            }
        };

        if value.get("accessMethodsRequest").is_some() {
            // answer the explicit request with our own id and keep waiting
            let methods = AccessMethods::new(&self.local_ship_id);
            if let Err(e) = self.send_ship_model(MsgType::CONTROL, &methods) {
                self.end_handshake_with_error(e);
            }
            return;
        }

        if value.get("accessMethods").is_none() {
            self.end_handshake_with_error(ShipError::ProtocolViolation(
                "expected an access methods message".to_string(),
            ));
            return;
        }

        let methods: AccessMethods = match serde_json::from_value(value)
            .map_err(|e| ShipError::ProtocolViolation(e.to_string()))
        {
            Ok(methods) => methods,
            Err(e) => {
                self.end_handshake_with_error(e);
                return;
            }
        };

        let Some(ship_id) = methods.access_methods.id else {
            self.end_handshake_with_error(ShipError::ProtocolViolation(
                "access methods contained no id".to_string(),
            ));
            return;
        };

        {
            let mut remote_ship_id = self.remote_ship_id.lock();
            if !remote_ship_id.is_empty() && *remote_ship_id != ship_id {
                drop(remote_ship_id);
                self.end_handshake_with_error(ShipError::ProtocolViolation(
                    "the remote SHIP id does not match the stored one".to_string(),
                ));
                return;
            }
            *remote_ship_id = ship_id.clone();
        }

        self.info_provider
            .report_service_ship_id(self.remote_ski(), &ship_id);

        self.approve_handshake();
    }
}
