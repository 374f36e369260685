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

//! mDNS manager
//!
//! Announces the local SHIP service (TXT set per SHIP 7.3.2) and aggregates
//! resolver callbacks into a stable, SKI-keyed map of [`MdnsEntry`] records.
//! Every accepted change is reported to the hub with a deep copy of the
//! whole map, delivered asynchronously so resolver threads never block on
//! hub locks.

use crate::entry::MdnsEntry;
use crate::error::DiscoveryError;
use crate::provider::{MdnsProvider, ResolveCallback, ResolvedItem};
use crate::{SHIP_ANNOUNCE_TTL, SHIP_WEBSOCKET_PATH};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Receiver of aggregated entry reports; implemented by the connection hub
pub trait MdnsReport: Send + Sync {
    /// Called with a copy of the full entry map after every accepted change,
    /// and on explicit [`MdnsManager::request_entries`] replays.
    fn report_mdns_entries(&self, entries: HashMap<String, MdnsEntry>);
}

/// Local service metadata for announcements
#[derive(Debug, Clone)]
pub struct MdnsConfig {
    /// The certificate's SKI
    pub ski: String,
    /// Brand of the device, max 32 bytes of UTF-8
    pub device_brand: String,
    /// Model of the device, max 32 bytes of UTF-8
    pub device_model: String,
    /// EEBUS device type, max 32 bytes of UTF-8
    pub device_type: String,
    /// Serial number, max 32 bytes of UTF-8, optional
    pub device_serial: String,
    /// Device categories for the `cat` TXT key and the QR code
    pub device_categories: Vec<u32>,
    /// Identifier used for mDNS `id` and as the SHIP ID
    pub ship_identifier: String,
    /// mDNS service instance name
    pub service_name: String,
    /// Port of the websocket server
    pub port: u16,
}

/// Truncate to at most `max` bytes on a UTF-8 character boundary.
fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

pub struct MdnsManager {
    ski: String,
    device_brand: String,
    device_model: String,
    device_type: String,
    device_serial: String,
    device_categories: Vec<u32>,
    identifier: String,
    service_name: String,
    port: u16,

    autoaccept: AtomicBool,
    is_announced: AtomicBool,
    has_shutdown: AtomicBool,

    provider: Arc<dyn MdnsProvider>,
    entries: Mutex<HashMap<String, MdnsEntry>>,
    report: Mutex<Option<Arc<dyn MdnsReport>>>,

    me: Weak<MdnsManager>,
}

impl MdnsManager {
    /// Create a manager over the given backend. Metadata strings are
    /// truncated to the 32-byte limits of SHIP 7.3.2 here, once.
    pub fn new(provider: Arc<dyn MdnsProvider>, config: MdnsConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ski: ship_model::normalize_ski(&config.ski),
            device_brand: truncate_utf8(&config.device_brand, 32),
            device_model: truncate_utf8(&config.device_model, 32),
            device_type: truncate_utf8(&config.device_type, 32),
            device_serial: truncate_utf8(&config.device_serial, 32),
            device_categories: config.device_categories,
            identifier: config.ship_identifier,
            service_name: config.service_name,
            port: config.port,
            autoaccept: AtomicBool::new(false),
            is_announced: AtomicBool::new(false),
            has_shutdown: AtomicBool::new(false),
            provider,
            entries: Mutex::new(HashMap::new()),
            report: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Start the backend, announce the local service and register the hub
    /// as the report receiver.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoProviderAvailable`] when the backend
    /// cannot start and [`DiscoveryError::AnnounceFailed`] when the initial
    /// announcement fails.
    pub async fn start(&self, report: Arc<dyn MdnsReport>) -> Result<(), DiscoveryError> {
        let me = self.me.clone();
        let callback: ResolveCallback = Arc::new(move |item| {
            if let Some(manager) = me.upgrade() {
                manager.process_mdns_entry(item);
            }
        });

        if !self.provider.start(true, callback).await {
            return Err(DiscoveryError::NoProviderAvailable);
        }

        // always announce on startup
        self.announce_service().await?;

        *self.report.lock() = Some(report);

        Ok(())
    }

    /// Shut down announcing and resolving. Idempotent.
    pub async fn shutdown(&self) {
        if self.has_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        self.unannounce_service().await;
        self.provider.shutdown().await;
    }

    /// Announce the local service to the network (SHIP 7.3.2 TXT set).
    pub async fn announce_service(&self) -> Result<(), DiscoveryError> {
        let mut txt: Vec<(String, String)> = vec![
            ("txtvers".to_string(), "1".to_string()),
            ("path".to_string(), SHIP_WEBSOCKET_PATH.to_string()),
            ("id".to_string(), self.identifier.clone()),
            ("ski".to_string(), self.ski.clone()),
            ("brand".to_string(), self.device_brand.clone()),
            ("model".to_string(), self.device_model.clone()),
            ("type".to_string(), self.device_type.clone()),
            (
                "register".to_string(),
                self.autoaccept.load(Ordering::SeqCst).to_string(),
            ),
        ];

        // SHIP Requirements for Installation Process V1.0.0
        if !self.device_serial.is_empty() {
            txt.push(("serial".to_string(), self.device_serial.clone()));
        }
        let categories = self.device_categories_string();
        if !categories.is_empty() {
            txt.push(("cat".to_string(), categories));
        }

        log::debug!("mdns: announce");

        self.provider
            .announce(&self.service_name, self.port, SHIP_ANNOUNCE_TTL, &txt)
            .await?;

        self.is_announced.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Withdraw the announcement.
    pub async fn unannounce_service(&self) {
        if !self.is_announced.load(Ordering::SeqCst) {
            return;
        }

        self.provider.unannounce().await;
        log::debug!("mdns: stop announcement");
        self.is_announced.store(false, Ordering::SeqCst);
    }

    /// Toggle the `register` TXT value; re-announces when currently
    /// announced.
    pub async fn set_auto_accept(&self, accept: bool) {
        self.autoaccept.store(accept, Ordering::SeqCst);

        if !self.is_announced.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.announce_service().await {
            log::debug!("mdns: changing mdns entry failed: {e}");
        }
    }

    /// Replay the current entry set to the hub without waiting for a new
    /// resolver event. Used to drive pairing attempts on demand.
    pub fn request_entries(&self) {
        let Some(report) = self.report.lock().clone() else {
            return;
        };

        let entries = self.entries.lock().clone();
        tokio::spawn(async move {
            report.report_mdns_entries(entries);
        });
    }

    fn device_categories_string(&self) -> String {
        self.device_categories
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn safe_qr_code_key_value(key: &str, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }
        // values must not carry the separator char, keys are uppercase
        let value = value.replace(';', "");
        format!("{}:{};", key.to_uppercase(), value)
    }

    /// The installation QR-code text per SHIP Requirements for Installation
    /// Process V1.0.0.
    pub fn qr_code_text(&self) -> String {
        let mut optionals = String::new();
        optionals += &Self::safe_qr_code_key_value("brand", &self.device_brand);
        optionals += &Self::safe_qr_code_key_value("type", &self.device_type);
        optionals += &Self::safe_qr_code_key_value("model", &self.device_model);
        optionals += &Self::safe_qr_code_key_value("serial", &self.device_serial);
        if !self.device_categories.is_empty() {
            optionals +=
                &Self::safe_qr_code_key_value("cat", &self.device_categories_string());
        }

        format!(
            "SHIP;SKI:{};ID:{};{}ENDSHIP;",
            self.ski, self.identifier, optionals
        )
    }

    /// Process one resolver observation and maintain the entry map.
    ///
    /// Rejects records with missing mandatory TXT keys, a `txtvers` other
    /// than `1` or a non-boolean `register`; ignores the local service's
    /// own record; drops IPv6 link-local addresses; merges new addresses
    /// into existing entries; removes entries immediately on the first
    /// `removed` signal.
    pub fn process_mdns_entry(&self, item: ResolvedItem) {
        let elements = &item.elements;

        for key in ["txtvers", "id", "path", "ski", "register"] {
            if !elements.contains_key(key) {
                log::debug!("mdns: txt - missing mandatory element {key}");
                return;
            }
        }

        // value of mandatory txtvers has to be 1 or the record is ignored: SHIP 7.3.2
        let txtvers = &elements["txtvers"];
        if txtvers != "1" {
            log::debug!("mdns: txt - unknown txtvers {txtvers}");
            return;
        }

        let identifier = elements["id"].clone();
        let path = elements["path"].clone();
        let ski = ship_model::normalize_ski(&elements["ski"]);

        // ignore our own service
        if ski == self.ski {
            return;
        }

        let register = &elements["register"];
        if register != "true" && register != "false" {
            log::debug!("mdns: txt - register value is not a text boolean: {register}");
            return;
        }

        let addresses: Vec<IpAddr> = item
            .addresses
            .iter()
            .copied()
            .filter(|address| !is_ipv6_link_local(address))
            .collect();

        let brand = elements.get("brand").cloned().unwrap_or_default();
        let device_type = elements.get("type").cloned().unwrap_or_default();
        let model = elements.get("model").cloned().unwrap_or_default();
        let serial = elements.get("serial").cloned().unwrap_or_default();

        let mut categories = Vec::new();
        if let Some(value) = elements.get("cat") {
            for part in value.split(',') {
                match part.parse::<u32>() {
                    Ok(category) => categories.push(category),
                    Err(_) => log::debug!("mdns: txt - invalid category {part}"),
                }
            }
        }

        let mut updated = false;
        {
            let mut entries = self.entries.lock();
            let exists = entries.contains_key(&ski);

            if item.removed {
                // resolvers report one removal per interface; drop the
                // entry on the first one
                if exists {
                    entries.remove(&ski);
                    updated = true;
                    log::debug!("mdns: remove - ski: {ski} name: {}", item.name);
                }
            } else if let Some(entry) = entries.get_mut(&ski) {
                for address in &addresses {
                    if !entry.addresses.contains(address) {
                        entry.addresses.push(*address);
                        updated = true;
                    }
                }
                if updated {
                    log::debug!(
                        "mdns: update - ski: {ski} name: {} addresses: {:?}",
                        item.name,
                        entry.addresses
                    );
                }
            } else {
                let entry = MdnsEntry {
                    name: item.name.clone(),
                    ski: ski.clone(),
                    identifier,
                    path,
                    register: register == "true",
                    brand,
                    device_type,
                    model,
                    serial,
                    categories,
                    host: item.host.clone(),
                    port: item.port,
                    addresses,
                };
                log::debug!(
                    "mdns: new - ski: {ski} name: {} host: {} port: {}",
                    item.name,
                    entry.host,
                    entry.port
                );
                entries.insert(ski.clone(), entry);
                updated = true;
            }
        }

        if !updated {
            return;
        }

        let Some(report) = self.report.lock().clone() else {
            return;
        };
        let entries = self.entries.lock().clone();
        tokio::spawn(async move {
            report.report_mdns_entries(entries);
        });
    }
}

fn is_ipv6_link_local(address: &IpAddr) -> bool {
    match address {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubProvider {
        announces: Mutex<Vec<(String, u16, u32, Vec<(String, String)>)>>,
    }

    impl StubProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                announces: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MdnsProvider for StubProvider {
        async fn start(&self, _auto_reconnect: bool, _callback: ResolveCallback) -> bool {
            true
        }

        async fn shutdown(&self) {}

        async fn announce(
            &self,
            service_name: &str,
            port: u16,
            ttl: u32,
            txt: &[(String, String)],
        ) -> Result<(), DiscoveryError> {
            self.announces
                .lock()
                .push((service_name.to_string(), port, ttl, txt.to_vec()));
            Ok(())
        }

        async fn unannounce(&self) {}
    }

    struct RecordingReport {
        reports: Mutex<Vec<HashMap<String, MdnsEntry>>>,
    }

    impl RecordingReport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reports: Mutex::new(Vec::new()),
            })
        }
    }

    impl MdnsReport for RecordingReport {
        fn report_mdns_entries(&self, entries: HashMap<String, MdnsEntry>) {
            self.reports.lock().push(entries);
        }
    }

    fn test_config() -> MdnsConfig {
        MdnsConfig {
            ski: "AA".repeat(20),
            device_brand: "Demo".to_string(),
            device_model: "HEMS".to_string(),
            device_type: "EnergyManagementSystem".to_string(),
            device_serial: "123456789".to_string(),
            device_categories: vec![2],
            ship_identifier: "Demo-HEMS-123456789".to_string(),
            service_name: "Demo-Unit".to_string(),
            port: 4712,
        }
    }

    fn manager() -> Arc<MdnsManager> {
        MdnsManager::new(StubProvider::new(), test_config())
    }

    fn remote_item(ski: &str, address: &str, removed: bool) -> ResolvedItem {
        let mut elements = HashMap::new();
        elements.insert("txtvers".to_string(), "1".to_string());
        elements.insert("id".to_string(), "Remote-Unit-01".to_string());
        elements.insert("path".to_string(), "/ship/".to_string());
        elements.insert("ski".to_string(), ski.to_string());
        elements.insert("register".to_string(), "false".to_string());
        elements.insert("brand".to_string(), "Other".to_string());

        ResolvedItem {
            elements,
            name: "Remote-Unit".to_string(),
            host: "remote.local.".to_string(),
            addresses: vec![address.parse().unwrap()],
            port: 4711,
            removed,
        }
    }

    #[tokio::test]
    async fn test_announce_txt_set() {
        let provider = StubProvider::new();
        let m = MdnsManager::new(provider.clone(), test_config());

        m.announce_service().await.unwrap();

        let announces = provider.announces.lock();
        let (name, port, ttl, txt) = &announces[0];
        assert_eq!(name, "Demo-Unit");
        assert_eq!(*port, 4712);
        assert_eq!(*ttl, crate::SHIP_ANNOUNCE_TTL);

        let get = |key: &str| {
            txt.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("txtvers").as_deref(), Some("1"));
        assert_eq!(get("path").as_deref(), Some("/ship/"));
        assert_eq!(get("ski").as_deref(), Some("aa".repeat(20).as_str()));
        assert_eq!(get("register").as_deref(), Some("false"));
        assert_eq!(get("serial").as_deref(), Some("123456789"));
        assert_eq!(get("cat").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_set_auto_accept_reannounces() {
        let provider = StubProvider::new();
        let m = MdnsManager::new(provider.clone(), test_config());

        m.announce_service().await.unwrap();
        m.set_auto_accept(true).await;

        let announces = provider.announces.lock();
        assert_eq!(announces.len(), 2);
        let (_, _, _, txt) = &announces[1];
        assert!(txt.contains(&("register".to_string(), "true".to_string())));
    }

    #[tokio::test]
    async fn test_set_auto_accept_skips_when_unannounced() {
        let provider = StubProvider::new();
        let m = MdnsManager::new(provider.clone(), test_config());

        m.set_auto_accept(true).await;
        assert!(provider.announces.lock().is_empty());
    }

    #[test]
    fn test_qr_code_text() {
        let m = manager();
        assert_eq!(
            m.qr_code_text(),
            format!(
                "SHIP;SKI:{};ID:Demo-HEMS-123456789;BRAND:Demo;TYPE:EnergyManagementSystem;MODEL:HEMS;SERIAL:123456789;CAT:2;ENDSHIP;",
                "aa".repeat(20)
            )
        );
    }

    #[test]
    fn test_qr_code_strips_semicolons() {
        let mut config = test_config();
        config.device_brand = "Brand;Evil".to_string();
        let m = MdnsManager::new(StubProvider::new(), config);
        assert!(m.qr_code_text().contains("BRAND:BrandEvil;"));
    }

    #[test]
    fn test_truncate_utf8_boundary() {
        let s = "ä".repeat(20); // 40 bytes
        let truncated = truncate_utf8(&s, 33);
        assert_eq!(truncated.len(), 32);
        assert!(truncated.chars().all(|c| c == 'ä'));
    }

    #[tokio::test]
    async fn test_entry_created_and_merged() {
        let m = manager();
        let ski = "ff".repeat(20);

        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        m.process_mdns_entry(remote_item(&ski, "192.0.2.11", false));

        let entries = m.entries.lock().clone();
        let entry = &entries[&ski];
        assert_eq!(
            entry.addresses,
            vec![
                "192.0.2.10".parse::<IpAddr>().unwrap(),
                "192.0.2.11".parse::<IpAddr>().unwrap()
            ]
        );
        assert_eq!(entry.port, 4711);
        assert_eq!(entry.brand, "Other");
    }

    #[tokio::test]
    async fn test_entry_removed_immediately() {
        let m = manager();
        let ski = "ff".repeat(20);

        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", true));

        assert!(m.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_txtvers() {
        let m = manager();
        let mut item = remote_item(&"ff".repeat(20), "192.0.2.10", false);
        item.elements.insert("txtvers".to_string(), "2".to_string());

        m.process_mdns_entry(item);
        assert!(m.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_missing_mandatory_key() {
        let m = manager();
        let mut item = remote_item(&"ff".repeat(20), "192.0.2.10", false);
        item.elements.remove("path");

        m.process_mdns_entry(item);
        assert!(m.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_boolean_register() {
        let m = manager();
        let mut item = remote_item(&"ff".repeat(20), "192.0.2.10", false);
        item.elements
            .insert("register".to_string(), "yes".to_string());

        m.process_mdns_entry(item);
        assert!(m.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_own_ski() {
        let m = manager();
        let item = remote_item(&"AA".repeat(20), "192.0.2.10", false);

        m.process_mdns_entry(item);
        assert!(m.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drops_ipv6_link_local() {
        let m = manager();
        let ski = "ff".repeat(20);
        let mut item = remote_item(&ski, "192.0.2.10", false);
        item.addresses.push("fe80::1".parse().unwrap());
        item.addresses.push("2001:db8::1".parse().unwrap());

        m.process_mdns_entry(item);

        let entries = m.entries.lock().clone();
        let entry = &entries[&ski];
        assert_eq!(entry.addresses.len(), 2);
        assert!(!entry
            .addresses
            .contains(&"fe80::1".parse::<IpAddr>().unwrap()));
    }

    #[tokio::test]
    async fn test_malformed_categories_rejected_individually() {
        let m = manager();
        let ski = "ff".repeat(20);
        let mut item = remote_item(&ski, "192.0.2.10", false);
        item.elements
            .insert("cat".to_string(), "2,banana,7".to_string());

        m.process_mdns_entry(item);

        let entries = m.entries.lock().clone();
        assert_eq!(entries[&ski].categories, vec![2, 7]);
    }

    #[tokio::test]
    async fn test_reports_are_copies() {
        let m = manager();
        let report = RecordingReport::new();
        *m.report.lock() = Some(report.clone());

        let ski = "ff".repeat(20);
        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // mutating the manager's map later must not change the report
        m.process_mdns_entry(remote_item(&ski, "192.0.2.11", false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reports = report.reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0][&ski].addresses.len(), 1);
        assert_eq!(reports[1][&ski].addresses.len(), 2);
    }

    #[tokio::test]
    async fn test_request_entries_replays() {
        let m = manager();
        let report = RecordingReport::new();
        *m.report.lock() = Some(report.clone());

        let ski = "ff".repeat(20);
        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        m.request_entries();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(report.reports.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_address_does_not_report() {
        let m = manager();
        let report = RecordingReport::new();
        *m.report.lock() = Some(report.clone());

        let ski = "ff".repeat(20);
        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        m.process_mdns_entry(remote_item(&ski, "192.0.2.10", false));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(report.reports.lock().len(), 1);
    }
}
