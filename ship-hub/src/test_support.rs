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

//! Hub test fixtures

use crate::api::{ConnectionStateDetail, HubReader, RemoteService, ServiceDetails};
use crate::hub::Hub;
use parking_lot::Mutex;
use ship_cert::CertificateKey;
use ship_discovery::{MdnsConfig, MdnsManager};
use ship_discovery_mock::MockMdnsProvider;
use ship_network::{PayloadReader, PayloadWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct StubPayloadReader;

impl PayloadReader for StubPayloadReader {
    fn handle_ship_payload(&self, _payload: Vec<u8>) {}
}

/// Host stub recording every callback
pub(crate) struct StubReader {
    visible: Mutex<Vec<Vec<RemoteService>>>,
    pairing_details: Mutex<Vec<(String, ConnectionStateDetail)>>,
    connected: Mutex<Vec<String>>,
    disconnected: Mutex<Vec<String>>,
    ship_ids: Mutex<Vec<(String, String)>>,
    allow_waiting: AtomicBool,
}

impl StubReader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            visible: Mutex::new(Vec::new()),
            pairing_details: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            disconnected: Mutex::new(Vec::new()),
            ship_ids: Mutex::new(Vec::new()),
            allow_waiting: AtomicBool::new(true),
        })
    }

    pub(crate) fn set_allow_waiting(&self, allow: bool) {
        self.allow_waiting.store(allow, Ordering::SeqCst);
    }

    pub(crate) fn visible_services(&self) -> Vec<Vec<RemoteService>> {
        self.visible.lock().clone()
    }

    pub(crate) fn pairing_details(&self) -> Vec<(String, ConnectionStateDetail)> {
        self.pairing_details.lock().clone()
    }

    pub(crate) fn connected_skis(&self) -> Vec<String> {
        self.connected.lock().clone()
    }

    pub(crate) fn disconnected_skis(&self) -> Vec<String> {
        self.disconnected.lock().clone()
    }

    pub(crate) fn ship_ids(&self) -> Vec<(String, String)> {
        self.ship_ids.lock().clone()
    }
}

impl HubReader for StubReader {
    fn visible_remote_services_updated(&self, services: Vec<RemoteService>) {
        self.visible.lock().push(services);
    }

    fn remote_ski_connected(&self, ski: &str) {
        self.connected.lock().push(ski.to_string());
    }

    fn remote_ski_disconnected(&self, ski: &str) {
        self.disconnected.lock().push(ski.to_string());
    }

    fn service_ship_id_update(&self, ski: &str, ship_id: &str) {
        self.ship_ids
            .lock()
            .push((ski.to_string(), ship_id.to_string()));
    }

    fn service_pairing_detail_update(&self, ski: &str, detail: ConnectionStateDetail) {
        self.pairing_details
            .lock()
            .push((ski.to_string(), detail));
    }

    fn setup_remote_device(
        &self,
        _ski: &str,
        _writer: Arc<dyn PayloadWriter>,
    ) -> Arc<dyn PayloadReader> {
        Arc::new(StubPayloadReader)
    }

    fn allow_waiting_for_trust(&self, _ski: &str) -> bool {
        self.allow_waiting.load(Ordering::SeqCst)
    }
}

/// A hub over an in-memory mDNS backend with a freshly generated identity.
pub(crate) async fn test_hub() -> (Arc<Hub>, Arc<StubReader>, Arc<MockMdnsProvider>) {
    let certificate =
        CertificateKey::generate("Test", "Test", "DE", "Test-Unit-01").expect("certificate");

    let provider = MockMdnsProvider::new();
    let mdns = MdnsManager::new(
        provider.clone(),
        MdnsConfig {
            ski: certificate.ski.clone(),
            device_brand: "Test".to_string(),
            device_model: "Unit".to_string(),
            device_type: "EnergyManagementSystem".to_string(),
            device_serial: "01".to_string(),
            device_categories: vec![2],
            ship_identifier: "Test-Unit-01".to_string(),
            service_name: "Test-Unit".to_string(),
            port: 0,
        },
    );

    let reader = StubReader::new();

    let local_service = Arc::new(ServiceDetails::new(&certificate.ski));
    local_service.set_ship_id("Test-Unit-01");

    let hub = Hub::new(reader.clone(), mdns, 0, certificate, local_service);

    (hub, reader, provider)
}
