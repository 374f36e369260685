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

//! The hub as seen from its SHIP connections

use crate::api::{ConnectionState, ConnectionStateDetail};
use crate::hub::Hub;
use crate::pairing::map_ship_state;
use ship_model::{ShipHandshakeState, ShipStateDetail};
use ship_network::{ConnectionInfoProvider, PayloadReader, PayloadWriter, ShipConnection};
use std::sync::Arc;
use std::time::Duration;

/// Host reports wait this long after a state change, so the peer observes
/// the corresponding SHIP frame before the host acts on the new state.
const STATE_REPORT_DELAY: Duration = Duration::from_millis(500);

impl ConnectionInfoProvider for Hub {
    fn is_remote_service_paired(&self, ski: &str) -> bool {
        self.service_for_ski(ski).trusted()
    }

    fn handle_connection_closed(&self, connection: &ShipConnection, handshake_completed: bool) {
        let ski = connection.remote_ski();

        // only remove the connection if it is the registered one for the
        // ski; a lost double connection must not unregister the winner
        if let Some(existing) = self.connection_for_ski(ski) {
            if Arc::ptr_eq(&existing.data_handler(), &connection.data_handler()) {
                self.connections.lock().remove(ski);
            }

            // a close after a completed handshake resets the retry ladder
            if handshake_completed {
                self.remove_connection_attempt_counter(ski);
            }
        }

        self.reader.remote_ski_disconnected(ski);

        // do not reconnect when the handshake failed on an unpaired peer
        let service = self.service_for_ski(ski);
        if !handshake_completed && !service.trusted() {
            return;
        }

        self.check_auto_reannounce();
    }

    fn report_service_ship_id(&self, ski: &str, ship_id: &str) {
        self.reader.remote_ski_connected(ski);
        self.reader.service_ship_id_update(ski, ship_id);
    }

    fn allow_waiting_for_trust(&self, ski: &str) -> bool {
        if self.service_for_ski(ski).trusted() {
            return true;
        }

        self.reader.allow_waiting_for_trust(ski)
    }

    fn handle_handshake_state_update(&self, ski: &str, detail: ShipStateDetail) {
        let service = self.service_for_ski(ski);

        // reaching the hello-ok state means both sides granted trust
        if detail.state == ShipHandshakeState::HelloOk {
            service.set_trusted(true);
        }

        // a completed handshake resets the retry ladder
        if detail.state == ShipHandshakeState::Complete {
            self.remove_connection_attempt_counter(service.ski());
        }

        let mut pairing_state = map_ship_state(detail.state);
        if detail.error.is_some() {
            pairing_state = ConnectionState::Error;
        }

        let pairing_detail = ConnectionStateDetail::new(pairing_state, detail.error);

        if service.connection_state_detail() == pairing_detail {
            return;
        }
        service.set_connection_state_detail(pairing_detail.clone());

        let reader = self.reader.clone();
        let ski = ski.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(STATE_REPORT_DELAY).await;
            reader.service_pairing_detail_update(&ski, pairing_detail);
        });
    }

    fn setup_remote_device(
        &self,
        ski: &str,
        writer: Arc<dyn PayloadWriter>,
    ) -> Arc<dyn PayloadReader> {
        self.reader.setup_remote_device(ski, writer)
    }
}
