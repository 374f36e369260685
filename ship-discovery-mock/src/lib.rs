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

//! In-memory mDNS backend
//!
//! Implements the [`ship_discovery::MdnsProvider`] contract entirely in
//! memory. Tests drive it by publishing synthetic per-interface records,
//! removals and backend disconnects, which makes it the vehicle for
//! exercising the per-interface dedup cache and the reconnect supervisor
//! that a DBus-backed resolver needs in production.

use async_trait::async_trait;
use parking_lot::Mutex;
use ship_discovery::{
    interface_allowed, AnnounceArgs, DiscoveryError, MdnsProvider, ResolveCallback, ResolveDedup,
    ResolvedItem, RestartableSession, ServiceKey,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub use ship_discovery::ReconnectSupervisor;

/// In-memory backend for the discovery contract
pub struct MockMdnsProvider {
    /// Interface allow-list applied to published records
    allowed_interfaces: Vec<i32>,

    available: AtomicBool,
    started: AtomicBool,
    restarts: AtomicUsize,

    callback: Mutex<Option<ResolveCallback>>,
    dedup: ResolveDedup,
    supervisor: Arc<ReconnectSupervisor>,
    announces: Mutex<Vec<AnnounceArgs>>,
    announced: AtomicBool,

    me: Weak<MockMdnsProvider>,
}

impl MockMdnsProvider {
    /// Backend accepting records from every interface.
    pub fn new() -> Arc<Self> {
        Self::with_interfaces(Vec::new())
    }

    /// Backend with an interface allow-list (empty accepts all).
    pub fn with_interfaces(allowed_interfaces: Vec<i32>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            allowed_interfaces,
            available: AtomicBool::new(true),
            started: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
            callback: Mutex::new(None),
            dedup: ResolveDedup::new(),
            supervisor: Arc::new(ReconnectSupervisor::with_delay(Duration::from_millis(10))),
            announces: Mutex::new(Vec::new()),
            announced: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    /// Make `start`/`restart` fail, simulating an unavailable backend.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Publish a record as observed on one interface. Duplicate records for
    /// the same `(name, type, domain, protocol, interface)` key are
    /// swallowed; interfaces outside the allow-list are filtered.
    pub fn publish(&self, key: ServiceKey, item: ResolvedItem) {
        if !interface_allowed(&self.allowed_interfaces, key.interface) {
            log::debug!(
                "mock mdns: ignoring record on filtered interface {}",
                key.interface
            );
            return;
        }

        if !self.dedup.on_add(key, &item.elements) {
            return;
        }

        if let Some(callback) = self.callback.lock().clone() {
            callback(item);
        }
    }

    /// Withdraw a record for one interface key. The callback receives the
    /// TXT map cached for the key; unknown keys are swallowed.
    pub fn withdraw(&self, key: &ServiceKey, name: &str, host: &str, port: u16) {
        let Some(elements) = self.dedup.on_remove(key) else {
            return;
        };

        if let Some(callback) = self.callback.lock().clone() {
            callback(ResolvedItem {
                elements,
                name: name.to_string(),
                host: host.to_string(),
                addresses: Vec::new(),
                port,
                removed: true,
            });
        }
    }

    /// Simulate a backend session loss (e.g. the DBus daemon going away).
    pub fn inject_disconnect(&self) {
        self.supervisor.notify_disconnect();
    }

    /// How often the reconnect supervisor restarted the session.
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// All announce calls seen so far, including re-announces.
    pub fn announce_log(&self) -> Vec<AnnounceArgs> {
        self.announces.lock().clone()
    }

    /// Whether the service is currently announced.
    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestartableSession for MockMdnsProvider {
    async fn restart(&self, callback: ResolveCallback) -> bool {
        if !self.available.load(Ordering::SeqCst) {
            return false;
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.dedup.clear();
        *self.callback.lock() = Some(callback);
        true
    }

    async fn reannounce(&self, args: &AnnounceArgs) -> Result<(), DiscoveryError> {
        self.announces.lock().push(args.clone());
        self.announced.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MdnsProvider for MockMdnsProvider {
    async fn start(&self, auto_reconnect: bool, callback: ResolveCallback) -> bool {
        if !self.available.load(Ordering::SeqCst) {
            return false;
        }

        *self.callback.lock() = Some(callback.clone());
        self.started.store(true, Ordering::SeqCst);
        self.supervisor.record_start(auto_reconnect, callback);

        if let Some(me) = self.me.upgrade() {
            let supervisor = self.supervisor.clone();
            tokio::spawn(supervisor.run(me as Arc<dyn RestartableSession>));
        }

        true
    }

    async fn shutdown(&self) {
        self.supervisor.record_shutdown();
        self.started.store(false, Ordering::SeqCst);
        *self.callback.lock() = None;
    }

    async fn announce(
        &self,
        service_name: &str,
        port: u16,
        ttl: u32,
        txt: &[(String, String)],
    ) -> Result<(), DiscoveryError> {
        let args = AnnounceArgs {
            service_name: service_name.to_string(),
            port,
            ttl,
            txt: txt.to_vec(),
        };
        self.supervisor.record_announce(args.clone());
        self.announces.lock().push(args);
        self.announced.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unannounce(&self) {
        self.supervisor.record_unannounce();
        self.announced.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn callback_recording(items: Arc<Mutex<Vec<ResolvedItem>>>) -> ResolveCallback {
        Arc::new(move |item| items.lock().push(item))
    }

    fn record_key(interface: i32) -> ServiceKey {
        ServiceKey {
            name: "Remote-Unit".to_string(),
            service_type: "_ship._tcp".to_string(),
            domain: "local".to_string(),
            protocol: 0,
            interface,
        }
    }

    fn record_item(address: &str) -> ResolvedItem {
        let mut elements = HashMap::new();
        elements.insert("txtvers".to_string(), "1".to_string());
        elements.insert("ski".to_string(), "ff".repeat(20));

        ResolvedItem {
            elements,
            name: "Remote-Unit".to_string(),
            host: "remote.local.".to_string(),
            addresses: vec![address.parse().unwrap()],
            port: 4711,
            removed: false,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_callback() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        assert!(provider.start(false, callback_recording(items.clone())).await);

        provider.publish(record_key(1), record_item("192.0.2.10"));
        assert_eq!(items.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_per_interface_duplicates_swallowed() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(false, callback_recording(items.clone())).await;

        provider.publish(record_key(1), record_item("192.0.2.10"));
        provider.publish(record_key(1), record_item("192.0.2.10"));
        provider.publish(record_key(2), record_item("192.0.2.10"));

        assert_eq!(items.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_interface_allow_list_filters() {
        let provider = MockMdnsProvider::with_interfaces(vec![3]);
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(false, callback_recording(items.clone())).await;

        provider.publish(record_key(1), record_item("192.0.2.10"));
        provider.publish(record_key(3), record_item("192.0.2.10"));

        assert_eq!(items.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_carries_cached_txt() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(false, callback_recording(items.clone())).await;

        provider.publish(record_key(1), record_item("192.0.2.10"));
        provider.withdraw(&record_key(1), "Remote-Unit", "remote.local.", 4711);

        let recorded = items.lock();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[1].removed);
        assert_eq!(
            recorded[1].elements.get("ski").map(String::as_str),
            Some("ff".repeat(20).as_str())
        );
    }

    #[tokio::test]
    async fn test_withdraw_of_unknown_key_swallowed() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(false, callback_recording(items.clone())).await;

        provider.withdraw(&record_key(9), "Remote-Unit", "remote.local.", 4711);
        assert!(items.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_restarts_and_reannounces() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(true, callback_recording(items.clone())).await;
        provider
            .announce("Demo-Unit", 4712, 120, &[("txtvers".to_string(), "1".to_string())])
            .await
            .unwrap();

        provider.inject_disconnect();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(provider.restart_count(), 1);
        let announces = provider.announce_log();
        assert_eq!(announces.len(), 2);
        // the re-announce repeats the original arguments, TTL included
        assert_eq!(announces[1].ttl, 120);

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_reconnect() {
        let provider = MockMdnsProvider::new();
        let items = Arc::new(Mutex::new(Vec::new()));
        provider.start(true, callback_recording(items.clone())).await;

        provider.shutdown().await;
        provider.inject_disconnect();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(provider.restart_count(), 0);
    }
}
