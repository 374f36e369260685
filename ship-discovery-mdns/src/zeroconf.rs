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

//! mdns-sd based provider

use crate::service_type;
use async_trait::async_trait;
use parking_lot::Mutex;
use ship_discovery::{
    AnnounceArgs, DiscoveryError, MdnsProvider, ReconnectSupervisor, ResolveCallback,
    ResolveDedup, ResolvedItem, RestartableSession, ServiceKey, INTERFACE_UNSPEC,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};

/// Native zeroconf implementation of the discovery contract
pub struct ZeroconfProvider {
    daemon: Mutex<Option<mdns_sd::ServiceDaemon>>,
    dedup: Arc<ResolveDedup>,
    supervisor: Arc<ReconnectSupervisor>,
    /// Fullname of the registered local service, for unregistering
    registered: Mutex<Option<String>>,
    me: Weak<ZeroconfProvider>,
}

impl ZeroconfProvider {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            daemon: Mutex::new(None),
            dedup: Arc::new(ResolveDedup::new()),
            supervisor: Arc::new(ReconnectSupervisor::new()),
            registered: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Create the daemon and start the browse pump. Returns `false` when
    /// the daemon cannot be created (e.g. no usable network interface).
    fn start_session(&self, callback: ResolveCallback) -> bool {
        let daemon = match mdns_sd::ServiceDaemon::new() {
            Ok(daemon) => daemon,
            Err(e) => {
                log::debug!("mdns: failed to create daemon: {e}");
                return false;
            }
        };

        let receiver = match daemon.browse(&service_type()) {
            Ok(receiver) => receiver,
            Err(e) => {
                log::debug!("mdns: failed to start browsing: {e}");
                return false;
            }
        };

        *self.daemon.lock() = Some(daemon);
        self.dedup.clear();

        let dedup = self.dedup.clone();
        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv_async().await {
                    Ok(event) => {
                        handle_service_event(event, &dedup, &callback);
                    }
                    Err(e) => {
                        log::debug!("mdns: event channel closed: {e}");
                        supervisor.notify_disconnect();
                        return;
                    }
                }
            }
        });

        true
    }

    fn announce_session(
        &self,
        service_name: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<(), DiscoveryError> {
        let daemon = self.daemon.lock();
        let Some(daemon) = daemon.as_ref() else {
            return Err(DiscoveryError::AnnounceFailed("daemon not running".to_string()));
        };

        let properties: HashMap<String, String> = txt.iter().cloned().collect();
        let hostname = format!("{}.local.", sanitize_hostname(service_name));

        let info = mdns_sd::ServiceInfo::new(
            &service_type(),
            service_name,
            &hostname,
            "",
            port,
            properties,
        )
        .map_err(|e| DiscoveryError::AnnounceFailed(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();

        daemon
            .register(info)
            .map_err(|e| DiscoveryError::AnnounceFailed(e.to_string()))?;

        *self.registered.lock() = Some(fullname);
        Ok(())
    }
}

#[async_trait]
impl MdnsProvider for ZeroconfProvider {
    async fn start(&self, auto_reconnect: bool, callback: ResolveCallback) -> bool {
        log::debug!("mdns: using native zeroconf");

        if !self.start_session(callback.clone()) {
            return false;
        }

        self.supervisor.record_start(auto_reconnect, callback);

        if let Some(me) = self.me.upgrade() {
            let supervisor = self.supervisor.clone();
            tokio::spawn(supervisor.run(me as Arc<dyn RestartableSession>));
        }

        true
    }

    async fn shutdown(&self) {
        self.supervisor.record_shutdown();
        self.unannounce().await;

        if let Some(daemon) = self.daemon.lock().take() {
            let _ = daemon.stop_browse(&service_type());
            let _ = daemon.shutdown();
        }
    }

    async fn announce(
        &self,
        service_name: &str,
        port: u16,
        ttl: u32,
        txt: &[(String, String)],
    ) -> Result<(), DiscoveryError> {
        // mdns-sd exposes no TTL control, so the requested TTL only
        // travels with the reconnect arguments
        self.announce_session(service_name, port, txt)?;
        self.supervisor.record_announce(AnnounceArgs {
            service_name: service_name.to_string(),
            port,
            ttl,
            txt: txt.to_vec(),
        });
        Ok(())
    }

    async fn unannounce(&self) {
        self.supervisor.record_unannounce();

        let fullname = self.registered.lock().take();
        let daemon = self.daemon.lock();
        if let (Some(daemon), Some(fullname)) = (daemon.as_ref(), fullname) {
            let _ = daemon.unregister(&fullname);
        }
    }
}

#[async_trait]
impl RestartableSession for ZeroconfProvider {
    async fn restart(&self, callback: ResolveCallback) -> bool {
        if let Some(daemon) = self.daemon.lock().take() {
            let _ = daemon.shutdown();
        }
        self.start_session(callback)
    }

    async fn reannounce(&self, args: &AnnounceArgs) -> Result<(), DiscoveryError> {
        self.announce_session(&args.service_name, args.port, &args.txt)
    }
}

fn handle_service_event(
    event: mdns_sd::ServiceEvent,
    dedup: &ResolveDedup,
    callback: &ResolveCallback,
) {
    match event {
        mdns_sd::ServiceEvent::ServiceResolved(info) => {
            let elements: HashMap<String, String> = info
                .get_properties()
                .iter()
                .map(|property| (property.key().to_string(), property.val_str().to_string()))
                .collect();

            let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();

            let key = record_key(info.get_fullname());
            if !dedup.on_add(key, &elements) {
                return;
            }

            callback(ResolvedItem {
                elements,
                name: info.get_fullname().to_string(),
                host: info.get_hostname().trim_end_matches('.').to_string(),
                addresses,
                port: info.get_port(),
                removed: false,
            });
        }
        mdns_sd::ServiceEvent::ServiceRemoved(_ty, fullname) => {
            let Some(elements) = dedup.on_remove(&record_key(&fullname)) else {
                return;
            };

            callback(ResolvedItem {
                elements,
                name: fullname,
                host: String::new(),
                addresses: Vec::new(),
                port: 0,
                removed: true,
            });
        }
        _ => {
            // SearchStarted, ServiceFound etc. carry no resolved data
        }
    }
}

fn record_key(fullname: &str) -> ServiceKey {
    ServiceKey {
        name: fullname.to_string(),
        service_type: ship_discovery::SHIP_SERVICE_TYPE.to_string(),
        domain: ship_discovery::SHIP_DOMAIN.to_string(),
        protocol: 0,
        // mdns-sd merges interfaces before reporting
        interface: INTERFACE_UNSPEC,
    }
}

/// DNS labels allow `[A-Za-z0-9-]`; everything else becomes a hyphen.
fn sanitize_hostname(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
