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

//! Host-facing types and callbacks

use parking_lot::Mutex;
use ship_model::{normalize_ski, ShipError};
use ship_network::{PayloadReader, PayloadWriter};
use std::sync::Arc;

/// Pairing-facing connection state of a remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected, not queued
    #[default]
    None,
    /// Queued for a connection attempt
    Queued,
    /// A connection attempt is starting
    Initiated,
    /// The handshake is running
    InProgress,
    /// The remote service asked for pairing and waits for local approval
    ReceivedPairingRequest,
    /// PIN verification phase
    Pin,
    /// Both sides granted trust
    Trusted,
    /// The remote service denied trust
    RemoteDeniedTrust,
    /// The handshake failed
    Error,
    /// The handshake completed, data flows
    Completed,
}

/// `(state, error)` as reported to the host
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionStateDetail {
    pub state: ConnectionState,
    pub error: Option<ShipError>,
}

impl ConnectionStateDetail {
    pub fn new(state: ConnectionState, error: Option<ShipError>) -> Self {
        Self { state, error }
    }
}

#[derive(Default)]
struct ServiceDetailsInner {
    /// Optional IPv4 override for resolvers that miss the A record
    ipv4: String,
    /// SHIP identifier of the service; persisted by the host
    ship_id: String,
    /// EEBUS device type
    device_type: String,
    /// The service auto-accepts pairing requests (its `register` TXT)
    auto_accept: bool,
    /// The host granted trust; reconnects happen silently
    trusted: bool,
    connection_state_detail: ConnectionStateDetail,
}

/// Details about the local or a remote service, keyed by SKI.
///
/// Created lazily on first reference and alive for the process lifetime;
/// the host persists `(ski, ship_id, trusted)` and re-registers on start.
pub struct ServiceDetails {
    ski: String,
    inner: Mutex<ServiceDetailsInner>,
}

impl ServiceDetails {
    pub fn new(ski: &str) -> Self {
        Self {
            ski: normalize_ski(ski),
            inner: Mutex::new(ServiceDetailsInner::default()),
        }
    }

    pub fn ski(&self) -> &str {
        &self.ski
    }

    pub fn ipv4(&self) -> String {
        self.inner.lock().ipv4.clone()
    }

    pub fn set_ipv4(&self, ipv4: &str) {
        self.inner.lock().ipv4 = ipv4.to_string();
    }

    pub fn ship_id(&self) -> String {
        self.inner.lock().ship_id.clone()
    }

    pub fn set_ship_id(&self, ship_id: &str) {
        self.inner.lock().ship_id = ship_id.to_string();
    }

    pub fn device_type(&self) -> String {
        self.inner.lock().device_type.clone()
    }

    pub fn set_device_type(&self, device_type: &str) {
        self.inner.lock().device_type = device_type.to_string();
    }

    pub fn auto_accept(&self) -> bool {
        self.inner.lock().auto_accept
    }

    pub fn set_auto_accept(&self, auto_accept: bool) {
        self.inner.lock().auto_accept = auto_accept;
    }

    pub fn trusted(&self) -> bool {
        self.inner.lock().trusted
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.inner.lock().trusted = trusted;
    }

    pub fn connection_state_detail(&self) -> ConnectionStateDetail {
        self.inner.lock().connection_state_detail.clone()
    }

    pub fn set_connection_state_detail(&self, detail: ConnectionStateDetail) {
        self.inner.lock().connection_state_detail = detail;
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.inner.lock().connection_state_detail = ConnectionStateDetail::new(state, None);
    }
}

/// A remote service as shown to the user while browsing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteService {
    pub name: String,
    pub ski: String,
    pub identifier: String,
    pub brand: String,
    pub device_type: String,
    pub model: String,
    pub serial: String,
    pub categories: Vec<u32>,
}

/// Callbacks into the host application.
///
/// Implemented by the EEBUS service layer, used by the hub. Calls for one
/// SKI arrive in FIFO order.
pub trait HubReader: Send + Sync {
    /// The set of visible remote services changed
    fn visible_remote_services_updated(&self, services: Vec<RemoteService>);

    /// A SHIP connection to the SKI was established
    fn remote_ski_connected(&self, ski: &str);

    /// The SHIP connection to the SKI ended
    fn remote_ski_disconnected(&self, ski: &str);

    /// The SHIP ID the peer provided; persist it and feed it back in on
    /// the next start so identity changes are detected
    fn service_ship_id_update(&self, ski: &str, ship_id: &str);

    /// The pairing state of the SKI changed
    fn service_pairing_detail_update(&self, ski: &str, detail: ConnectionStateDetail);

    /// A handshake completed: wire the SPINE engine to the writer and
    /// return the engine's inbound reader
    fn setup_remote_device(&self, ski: &str, writer: Arc<dyn PayloadWriter>)
        -> Arc<dyn PayloadReader>;

    /// Whether the user can still decide to trust the SKI
    fn allow_waiting_for_trust(&self, ski: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_details_normalizes_ski() {
        let service = ServiceDetails::new("AB-CD 12");
        assert_eq!(service.ski(), "abcd12");
    }

    #[test]
    fn test_service_details_defaults() {
        let service = ServiceDetails::new("abcd");
        assert!(!service.trusted());
        assert!(!service.auto_accept());
        assert_eq!(
            service.connection_state_detail().state,
            ConnectionState::None
        );
    }

    #[test]
    fn test_service_details_state_round_trip() {
        let service = ServiceDetails::new("abcd");
        service.set_connection_state(ConnectionState::Queued);
        assert_eq!(
            service.connection_state_detail(),
            ConnectionStateDetail::new(ConnectionState::Queued, None)
        );

        service.set_trusted(true);
        service.set_ship_id("Remote-01");
        assert!(service.trusted());
        assert_eq!(service.ship_id(), "Remote-01");
    }
}
