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

//! The connection hub
//!
//! Owns the set of live SHIP connections keyed by remote SKI, the lazily
//! populated registry of known services, the TLS-terminated websocket
//! server and the mDNS manager. At most one *registered* connection exists
//! per SKI; transient double connections are resolved by arbitration in
//! [`crate::connections`].

use crate::api::{ConnectionState, HubReader, ServiceDetails};
use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use ship_cert::{CertificateKey, SkiClientCertVerifier, SkiServerCertVerifier};
use ship_discovery::MdnsManager;
use ship_model::normalize_ski;
use ship_network::ShipConnection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Errors surfaced by the hub's server and dial paths
#[derive(Debug, Error)]
pub enum HubError {
    #[error("TLS configuration failed: {0}")]
    Tls(String),

    #[error("starting the websocket server failed: {0}")]
    ServerStart(String),

    #[error("connecting to {0} failed: {1}")]
    Dial(String, String),

    #[error("certificate of {0} is not usable: {1}")]
    PeerCertificate(String, String),

    #[error("lost connection arbitration for {0}")]
    DoubleConnection(String),
}

pub(crate) struct AttemptBookkeeping {
    pub(crate) counters: HashMap<String, usize>,
    pub(crate) running: HashMap<String, bool>,
}

/// Handles the server and all connections to remote services
pub struct Hub {
    pub(crate) connections: Mutex<HashMap<String, Arc<ShipConnection>>>,
    pub(crate) attempts: Mutex<AttemptBookkeeping>,
    pub(crate) remote_services: Mutex<HashMap<String, Arc<ServiceDetails>>>,

    pub(crate) port: u16,
    pub(crate) certificate: CertificateKey,
    pub(crate) local_service: Arc<ServiceDetails>,
    pub(crate) reader: Arc<dyn HubReader>,
    pub(crate) mdns: Arc<MdnsManager>,

    pub(crate) has_started: AtomicBool,
    pub(crate) server_shutdown: Arc<Notify>,
    pub(crate) me: Weak<Hub>,
}

impl Hub {
    /// Create a hub serving `port` with the given certificate. The local
    /// service record carries the local SKI and SHIP ID.
    pub fn new(
        reader: Arc<dyn HubReader>,
        mdns: Arc<MdnsManager>,
        port: u16,
        certificate: CertificateKey,
        local_service: Arc<ServiceDetails>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            connections: Mutex::new(HashMap::new()),
            attempts: Mutex::new(AttemptBookkeeping {
                counters: HashMap::new(),
                running: HashMap::new(),
            }),
            remote_services: Mutex::new(HashMap::new()),
            port,
            certificate,
            local_service,
            reader,
            mdns,
            has_started: AtomicBool::new(false),
            server_shutdown: Arc::new(Notify::new()),
            me: me.clone(),
        })
    }

    /// Start the websocket server and mDNS. Failures are logged, matching
    /// a long-running service that keeps retrying through re-announces.
    pub async fn start(&self) {
        self.has_started.store(true, Ordering::SeqCst);

        if let Err(e) = self.start_websocket_server().await {
            debug!("error during websocket server starting: {e}");
        }

        let Some(hub) = self.me.upgrade() else {
            return;
        };
        if let Err(e) = self.mdns.start(hub).await {
            debug!("error during mdns setup: {e}");
        }
    }

    /// Stop mDNS, close all connections and shut the server down.
    pub async fn shutdown(&self) {
        self.mdns.shutdown().await;

        let connections: Vec<_> = self.connections.lock().values().cloned().collect();
        for connection in connections {
            connection.close_connection(false, 0, "");
        }

        self.server_shutdown.notify_waiters();
    }

    /// The service record for an SKI, created on first reference.
    pub fn service_for_ski(&self, ski: &str) -> Arc<ServiceDetails> {
        let ski = normalize_ski(ski);
        let mut services = self.remote_services.lock();
        services
            .entry(ski.clone())
            .or_insert_with(|| {
                let service = ServiceDetails::new(&ski);
                service.set_connection_state(ConnectionState::None);
                Arc::new(service)
            })
            .clone()
    }

    pub(crate) fn number_paired_services(&self) -> usize {
        self.remote_services
            .lock()
            .values()
            .filter(|service| service.trusted())
            .count()
    }

    /// Re-announce via mDNS while any paired service is not connected, so
    /// it can find us again.
    pub(crate) fn check_auto_reannounce(&self) {
        let paired = self.number_paired_services();
        let connected = self.connections.lock().len();

        if paired > connected {
            let mdns = self.mdns.clone();
            tokio::spawn(async move {
                let _ = mdns.announce_service().await;
            });
        }
    }

    /* connection registry */

    pub(crate) fn register_connection(&self, connection: Arc<ShipConnection>) {
        self.connections
            .lock()
            .insert(connection.remote_ski().to_string(), connection);
    }

    pub(crate) fn connection_for_ski(&self, ski: &str) -> Option<Arc<ShipConnection>> {
        self.connections.lock().get(ski).cloned()
    }

    pub(crate) fn is_ski_connected(&self, ski: &str) -> bool {
        self.connections.lock().contains_key(ski)
    }

    /* TLS */

    pub(crate) fn tls_server_config(&self) -> Result<rustls::ServerConfig, HubError> {
        let provider = Arc::new(ship_cert::restricted_crypto_provider());

        // SHIP 9: TLS 1.2 floor, client authentication required; chain
        // validation is replaced by the SKI checks
        rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| HubError::Tls(e.to_string()))?
            .with_client_cert_verifier(Arc::new(SkiClientCertVerifier::new()))
            .with_single_cert(
                vec![CertificateDer::from(self.certificate.cert_der.clone())],
                PrivateKeyDer::Pkcs8(self.certificate.key_der.clone().into()),
            )
            .map_err(|e| HubError::Tls(e.to_string()))
    }

    pub(crate) fn tls_client_config(
        &self,
        expected_ski: &str,
    ) -> Result<rustls::ClientConfig, HubError> {
        let provider = Arc::new(ship_cert::restricted_crypto_provider());

        rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| HubError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkiServerCertVerifier::with_expected_ski(
                expected_ski,
            )))
            .with_client_auth_cert(
                vec![CertificateDer::from(self.certificate.cert_der.clone())],
                PrivateKeyDer::Pkcs8(self.certificate.key_der.clone().into()),
            )
            .map_err(|e| HubError::Tls(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_hub;
    use crate::ConnectionState;

    #[tokio::test]
    async fn test_service_for_ski_creates_lazily() {
        let (hub, _, _) = test_hub().await;

        let service = hub.service_for_ski("AA-BB");
        assert_eq!(service.ski(), "aabb");
        assert_eq!(
            service.connection_state_detail().state,
            ConnectionState::None
        );

        // the same record comes back
        service.set_trusted(true);
        assert!(hub.service_for_ski("aabb").trusted());
    }

    #[tokio::test]
    async fn test_number_paired_services() {
        let (hub, _, _) = test_hub().await;

        hub.service_for_ski("aa").set_trusted(true);
        hub.service_for_ski("bb");
        hub.service_for_ski("cc").set_trusted(true);

        assert_eq!(hub.number_paired_services(), 2);
    }

    #[tokio::test]
    async fn test_tls_configs_build() {
        let (hub, _, _) = test_hub().await;

        assert!(hub.tls_server_config().is_ok());
        assert!(hub.tls_client_config(&"aa".repeat(20)).is_ok());
    }
}
