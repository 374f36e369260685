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

//! Pairing API and state projection
//!
//! Projects the fine-grained SHIP handshake states onto the coarse
//! [`ConnectionState`] the host sees, and implements the host's pairing
//! surface: register/unregister trust, initiate or approve a pairing,
//! cancel it, disconnect.

use crate::api::{ConnectionState, ConnectionStateDetail};
use crate::hub::Hub;
use ship_model::ShipHandshakeState;
use std::sync::atomic::Ordering;
use tracing::error;

/// Map a SHIP message-exchange state to the public connection state.
pub(crate) fn map_ship_state(state: ShipHandshakeState) -> ConnectionState {
    use ShipHandshakeState as S;

    match state {
        S::CmiInitStart => ConnectionState::Queued,
        S::CmiClientSend | S::CmiClientWait | S::CmiClientEvaluate | S::CmiServerWait
        | S::CmiServerEvaluate => ConnectionState::Initiated,
        S::HelloReadyInit | S::HelloReadyListen | S::HelloReadyTimeout | S::HelloPendingInit
        | S::HelloPendingTimeout => ConnectionState::InProgress,
        S::HelloPendingListen => ConnectionState::ReceivedPairingRequest,
        S::HelloOk => ConnectionState::Trusted,
        S::HelloAbort | S::HelloAbortDone => ConnectionState::None,
        S::HelloRemoteAbortDone | S::HelloRejected => ConnectionState::RemoteDeniedTrust,
        S::PinCheckInit | S::PinCheckListen | S::PinCheckError | S::PinCheckBusyInit
        | S::PinCheckBusyWait | S::PinCheckOk | S::PinAskInit | S::PinAskProcess
        | S::PinAskRestricted | S::PinAskOk => ConnectionState::Pin,
        S::AccessMethodsRequest | S::Approved => ConnectionState::InProgress,
        S::Complete => ConnectionState::Completed,
        S::Error => ConnectionState::Error,
        // remaining transitional states (hello entry, protocol handshake)
        _ => ConnectionState::InProgress,
    }
}

impl Hub {
    /// The current pairing state for an SKI: the live connection's state
    /// if one exists, the stored record otherwise.
    pub fn pairing_detail_for_ski(&self, ski: &str) -> ConnectionStateDetail {
        let service = self.service_for_ski(ski);

        if let Some(connection) = self.connection_for_ski(service.ski()) {
            let detail = connection.ship_handshake_state();
            let state = map_ship_state(detail.state);
            return ConnectionStateDetail::new(state, detail.error);
        }

        service.connection_state_detail()
    }

    /// Mark the SKI as trusted, typically re-fed from persistence on
    /// startup. Must be called before [`Hub::start`]; afterwards it is a
    /// logged no-op; use [`Hub::initiate_or_approve_pairing`] at runtime.
    pub fn register_remote_ski(&self, ski: &str) {
        if self.has_started.load(Ordering::SeqCst) {
            error!("register_remote_ski should only be called before the service started");
            return;
        }

        let service = self.service_for_ski(ski);
        service.set_trusted(true);

        self.check_auto_reannounce();
    }

    /// Withdraw trust from the SKI and close an existing connection.
    pub fn unregister_remote_ski(&self, ski: &str) {
        let service = self.service_for_ski(ski);
        service.set_trusted(false);

        self.remove_connection_attempt_counter(service.ski());

        service.set_connection_state(ConnectionState::None);
        self.reader
            .service_pairing_detail_update(service.ski(), service.connection_state_detail());

        if let Some(connection) = self.connection_for_ski(service.ski()) {
            connection.close_connection(true, 4500, "User close");
        }
    }

    /// Trigger the pairing process for an SKI: approve a remotely
    /// initiated pending handshake if one is live, otherwise queue a
    /// local connection attempt and replay the known mDNS entries.
    pub fn initiate_or_approve_pairing(&self, ski: &str) {
        if let Some(connection) = self.connection_for_ski(&ship_model::normalize_ski(ski)) {
            // remotely initiated
            connection.approve_pending_handshake();
            return;
        }

        // locally initiated
        let service = self.service_for_ski(ski);
        service.set_connection_state(ConnectionState::Queued);

        self.reader
            .service_pairing_detail_update(service.ski(), service.connection_state_detail());

        self.mdns.request_entries();
    }

    /// Cancel the pairing process for an SKI.
    pub fn cancel_pairing(&self, ski: &str) {
        let service = self.service_for_ski(ski);

        self.remove_connection_attempt_counter(service.ski());

        if let Some(connection) = self.connection_for_ski(service.ski()) {
            connection.abort_pending_handshake();
        }

        service.set_connection_state(ConnectionState::None);
        service.set_trusted(false);

        self.reader
            .service_pairing_detail_update(service.ski(), service.connection_state_detail());
    }

    /// Close the connection to an SKI with a reason, e.g. on failing
    /// heartbeats in the layer above.
    pub fn disconnect_ski(&self, ski: &str, reason: &str) {
        let Some(connection) = self.connection_for_ski(&ship_model::normalize_ski(ski)) else {
            return;
        };

        connection.close_connection(true, 0, reason);
    }
}
