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

//! Websocket connection handling
//!
//! The TLS-terminated listener for incoming SHIP connections, the dialer
//! for outgoing ones, double-connection arbitration (SHIP 12.2.2) and the
//! randomised connection-attempt scheduling that keeps both sides from
//! dialling each other simultaneously.

use crate::api::ConnectionState;
use crate::hub::{Hub, HubError};
use futures::SinkExt;
use rand::Rng;
use ship_discovery::MdnsEntry;
use ship_network::{ShipConnection, ShipRole, SHIP_WEBSOCKET_SUB_PROTOCOL};
use ship_websocket::{websocket_config, WebsocketConnection};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error};

/// Dial/upgrade deadline for outgoing connections
const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hold-off before dropping the losing side of a double connection, so the
/// close frame gets out
const DOUBLE_CONNECTION_CLOSE_DELAY: Duration = Duration::from_millis(100);

/// Delay ladder for connection attempts, in seconds. Each attempt draws a
/// uniform delay from its range; the last range repeats for all further
/// attempts.
pub(crate) const CONNECTION_INITIATION_DELAY_RANGES: [(u64, u64); 3] =
    [(0, 3), (3, 10), (10, 20)];

/// SHIP 12.2.2 refinement: the connection *initiated by* the node with the
/// higher SKI is the one to keep.
pub(crate) fn should_keep_new_connection(
    incoming_request: bool,
    local_ski: &str,
    remote_ski: &str,
) -> bool {
    if incoming_request {
        remote_ski > local_ski
    } else {
        local_ski > remote_ski
    }
}

/// Bracket IPv6 literals for URL and dial syntax.
fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

async fn send_ws_close_message<S>(mut ws: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "double connection".into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
    tokio::time::sleep(DOUBLE_CONNECTION_CLOSE_DELAY).await;
    let _ = ws.close(None).await;
}

fn subprotocol_callback(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    // SHIP 10.2: the "ship" sub protocol is required
    let supports_ship = request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok())
        .map(|protocols| {
            protocols
                .split(',')
                .any(|protocol| protocol.trim() == SHIP_WEBSOCKET_SUB_PROTOCOL)
        })
        .unwrap_or(false);

    if !supports_ship {
        let mut refusal = ErrorResponse::new(None);
        *refusal.status_mut() = StatusCode::BAD_REQUEST;
        return Err(refusal);
    }

    response.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(SHIP_WEBSOCKET_SUB_PROTOCOL),
    );
    Ok(response)
}

impl Hub {
    /// Start the TLS websocket server task.
    pub(crate) async fn start_websocket_server(&self) -> Result<(), HubError> {
        let config = self.tls_server_config()?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| HubError::ServerStart(e.to_string()))?;

        debug!("starting websocket server on :{}", self.port);

        let Some(hub) = self.me.upgrade() else {
            return Ok(());
        };
        let shutdown = self.server_shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => return,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let hub = hub.clone();
                                let acceptor = acceptor.clone();
                                tokio::spawn(async move {
                                    hub.handle_incoming_connection(stream, acceptor).await;
                                });
                            }
                            Err(e) => {
                                error!("websocket server accept error: {e}");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Serve one incoming connection request.
    async fn handle_incoming_connection(self: Arc<Self>, stream: TcpStream, acceptor: TlsAcceptor) {
        let tls_stream = match acceptor.accept(stream).await {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                debug!("error during tls accept: {e}");
                return;
            }
        };

        // SHIP 9: the client certificate must carry a usable SKI
        let ski = {
            let (_, connection) = tls_stream.get_ref();
            let Some(cert) = connection.peer_certificates().and_then(|certs| certs.first())
            else {
                debug!("client does not provide a certificate");
                return;
            };
            match ship_cert::ski_from_certificate(cert.as_ref()) {
                Ok(ski) => ski,
                Err(e) => {
                    debug!("{e}");
                    return;
                }
            }
        };

        let ws = match tokio_tungstenite::accept_hdr_async_with_config(
            tls_stream,
            subprotocol_callback,
            Some(websocket_config()),
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                debug!("error during connection upgrading: {e}");
                return;
            }
        };

        let service = self.service_for_ski(&ski);
        debug!("incoming connection request from {}", service.ski());

        // an incoming connection while we queued one of our own means the
        // remote asks for pairing
        if service.connection_state_detail().state == ConnectionState::Queued {
            service.set_connection_state(ConnectionState::ReceivedPairingRequest);
            self.reader
                .service_pairing_detail_update(service.ski(), service.connection_state_detail());
        }

        let Some(ws) = self.keep_this_connection(ws, true, service.ski()) else {
            return;
        };

        let data_handler = WebsocketConnection::new(ws, service.ski());
        let ship_connection = ShipConnection::new(
            self.clone(),
            data_handler,
            ShipRole::Server,
            &self.local_service.ship_id(),
            service.ski(),
            &service.ship_id(),
        );
        ship_connection.run();

        self.register_connection(ship_connection);
    }

    /// Prevent double connections: decide whether the new transport for an
    /// already-connected SKI survives. The loser is closed with a normal
    /// close frame after a short delay; the winner replaces the registered
    /// connection.
    fn keep_this_connection<S>(
        &self,
        ws: WebSocketStream<S>,
        incoming_request: bool,
        remote_ski: &str,
    ) -> Option<WebSocketStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(existing) = self.connection_for_ski(remote_ski) else {
            return Some(ws);
        };

        if should_keep_new_connection(incoming_request, self.local_service.ski(), remote_ski) {
            debug!("closing existing double connection");
            tokio::spawn(async move {
                existing.close_connection(false, 0, "");
            });
            Some(ws)
        } else {
            let kind = if incoming_request { "incoming" } else { "outgoing" };
            debug!("closing {kind} double connection, as the existing connection will be used");
            tokio::spawn(send_ws_close_message(ws));
            None
        }
    }

    /// Connect to a remote SHIP service at one address.
    pub(crate) async fn connect_found_service(
        self: &Arc<Self>,
        remote_service: &Arc<crate::api::ServiceDetails>,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<(), HubError> {
        if self.is_ski_connected(remote_service.ski()) {
            return Ok(());
        }

        debug!(
            "initiating connection to {} at {}:{}{}",
            remote_service.ski(),
            host,
            port,
            path
        );

        // prefer the announced path, fall back to the bare endpoint
        let ws = match self.dial(remote_service.ski(), host, port, path).await {
            Ok(ws) => ws,
            Err(_) if !path.is_empty() => self.dial(remote_service.ski(), host, port, "").await?,
            Err(e) => return Err(e),
        };

        // SKI equality replaces CA trust
        let remote_ski = {
            let (_, connection) = ws.get_ref().get_ref();
            let Some(cert) = connection.peer_certificates().and_then(|certs| certs.first())
            else {
                return Err(HubError::PeerCertificate(
                    remote_service.ski().to_string(),
                    "could not get the remote SKI from the certificate".to_string(),
                ));
            };
            ship_cert::ski_from_certificate(cert.as_ref()).map_err(|e| {
                HubError::PeerCertificate(remote_service.ski().to_string(), e.to_string())
            })?
        };

        if remote_ski != remote_service.ski() {
            return Err(HubError::PeerCertificate(
                remote_service.ski().to_string(),
                format!("SKI does not match {remote_ski}"),
            ));
        }

        let Some(ws) = self.keep_this_connection(ws, false, remote_service.ski()) else {
            return Err(HubError::DoubleConnection(remote_service.ski().to_string()));
        };

        let data_handler = WebsocketConnection::new(ws, remote_service.ski());
        let ship_connection = ShipConnection::new(
            self.clone(),
            data_handler,
            ShipRole::Client,
            &self.local_service.ship_id(),
            remote_service.ski(),
            &remote_service.ship_id(),
        );
        ship_connection.run();

        self.register_connection(ship_connection);

        Ok(())
    }

    async fn dial(
        &self,
        expected_ski: &str,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>, HubError> {
        let address = format!("wss://{}:{}{}", format_host(host), port, path);

        let config = self.tls_client_config(expected_ski)?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        let tcp = tokio::time::timeout(WS_HANDSHAKE_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| HubError::Dial(address.clone(), "connect timeout".to_string()))?
            .map_err(|e| HubError::Dial(address.clone(), e.to_string()))?;

        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| HubError::Dial(address.clone(), e.to_string()))?;

        let tls = tokio::time::timeout(WS_HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| HubError::Dial(address.clone(), "tls timeout".to_string()))?
            .map_err(|e| HubError::Dial(address.clone(), e.to_string()))?;

        let mut request = address
            .clone()
            .into_client_request()
            .map_err(|e| HubError::Dial(address.clone(), e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SHIP_WEBSOCKET_SUB_PROTOCOL),
        );

        let (ws, _response) = tokio::time::timeout(
            WS_HANDSHAKE_TIMEOUT,
            tokio_tungstenite::client_async_with_config(request, tls, Some(websocket_config())),
        )
        .await
        .map_err(|_| HubError::Dial(address.clone(), "websocket timeout".to_string()))?
        .map_err(|e| HubError::Dial(address, e.to_string()))?;

        Ok(ws)
    }

    /* connection attempt scheduling */

    /// Coordinate connection initiation attempts to a remote service: at
    /// most one scheduled attempt per SKI, delayed by the attempt ladder
    /// to minimise simultaneous dials from both sides. Queued pairings
    /// skip the delay.
    pub(crate) fn coordinate_connection_initiations(self: &Arc<Self>, ski: &str, entry: MdnsEntry) {
        if self.is_connection_attempt_running(ski) {
            return;
        }

        self.set_connection_attempt_running(ski, true);

        let (counter, duration) = self.connection_initiation_delay_time(ski);

        let service = self.service_for_ski(ski);
        let hub = self.clone();
        let ski = ski.to_string();

        if service.connection_state_detail().state == ConnectionState::Queued {
            tokio::spawn(async move {
                hub.prepare_connection_initiation(&ski, counter, entry).await;
            });
            return;
        }

        debug!(
            "delaying connection to {ski} by {duration:?} to minimize double connection probability"
        );

        // the timer just runs out; a superseded attempt discards itself by
        // comparing its counter
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            hub.prepare_connection_initiation(&ski, counter, entry).await;
        });
    }

    async fn prepare_connection_initiation(&self, ski: &str, counter: usize, entry: MdnsEntry) {
        self.set_connection_attempt_running(ski, false);

        // a newer attempt superseded this one
        if self.current_connection_attempt_counter(ski) != Some(counter) {
            return;
        }

        // not relevant if the device is no longer paired nor queued
        let state = self.service_for_ski(ski).connection_state_detail().state;
        if !self.service_for_ski(ski).trusted() && state != ConnectionState::Queued {
            return;
        }

        if self.is_ski_connected(ski) {
            return;
        }

        let Some(hub) = self.me.upgrade() else {
            return;
        };
        let service = self.service_for_ski(ski);
        if !hub.initiate_connection(&service, &entry).await {
            self.check_auto_reannounce();
        }
    }

    /// Attempt to establish a connection: hostname first, then each
    /// discovered address. Returns `true` on the first success.
    async fn initiate_connection(
        self: &Arc<Self>,
        remote_service: &Arc<crate::api::ServiceDetails>,
        entry: &MdnsEntry,
    ) -> bool {
        let state = remote_service.connection_state_detail().state;
        if !remote_service.trusted() && state != ConnectionState::Queued {
            return false;
        }

        if !entry.host.is_empty() {
            let host = entry.host.trim_end_matches('.');
            match self
                .connect_found_service(remote_service, host, entry.port, &entry.path)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    debug!("connection to {} failed: {e}", remote_service.ski());
                }
            }
        }

        for address in &entry.addresses {
            let host = match address {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => v6.to_string(),
            };
            match self
                .connect_found_service(remote_service, &host, entry.port, &entry.path)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    debug!("connection to {} failed: {e}", remote_service.ski());
                }
            }
        }

        // no address was reachable
        false
    }

    /* attempt bookkeeping */

    pub(crate) fn increase_connection_attempt_counter(&self, ski: &str) -> usize {
        let mut attempts = self.attempts.lock();

        let counter = match attempts.counters.get(ski) {
            Some(counter) => (counter + 1).min(CONNECTION_INITIATION_DELAY_RANGES.len() - 1),
            None => 0,
        };
        attempts.counters.insert(ski.to_string(), counter);

        counter
    }

    pub(crate) fn remove_connection_attempt_counter(&self, ski: &str) {
        self.attempts.lock().counters.remove(ski);
    }

    pub(crate) fn current_connection_attempt_counter(&self, ski: &str) -> Option<usize> {
        self.attempts.lock().counters.get(ski).copied()
    }

    /// The attempt counter and a delay drawn uniformly from its range.
    pub(crate) fn connection_initiation_delay_time(&self, ski: &str) -> (usize, Duration) {
        let counter = self.increase_connection_attempt_counter(ski);

        let (min, max) = CONNECTION_INITIATION_DELAY_RANGES[counter];
        let millis = rand::thread_rng().gen_range((min * 1000)..(max * 1000));

        (counter, Duration::from_millis(millis))
    }

    pub(crate) fn set_connection_attempt_running(&self, ski: &str, running: bool) {
        self.attempts
            .lock()
            .running
            .insert(ski.to_string(), running);
    }

    pub(crate) fn is_connection_attempt_running(&self, ski: &str) -> bool {
        self.attempts
            .lock()
            .running
            .get(ski)
            .copied()
            .unwrap_or(false)
    }
}
