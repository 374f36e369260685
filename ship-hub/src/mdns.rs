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

//! mDNS ingestion

use crate::api::{ConnectionState, RemoteService};
use crate::hub::Hub;
use ship_discovery::{MdnsEntry, MdnsReport};
use std::collections::HashMap;
use std::net::IpAddr;

impl MdnsReport for Hub {
    /// Process a reported set of discovered services: schedule connection
    /// attempts for paired or queued SKIs and publish the sorted visible
    /// set to the host.
    fn report_mdns_entries(&self, entries: HashMap<String, MdnsEntry>) {
        for (ski, entry) in &entries {
            if self.is_ski_connected(ski) {
                continue;
            }

            let service = self.service_for_ski(ski);
            if !service.trusted()
                && service.connection_state_detail().state != ConnectionState::Queued
            {
                continue;
            }

            service.set_auto_accept(entry.register);

            // an IPv4 override stands in for resolver backends that miss
            // the A record
            let mut entry = entry.clone();
            let ipv4 = service.ipv4();
            if !ipv4.is_empty() {
                if let Ok(address) = ipv4.parse::<IpAddr>() {
                    entry.addresses = vec![address];
                }
            }

            if let Some(hub) = self.me.upgrade() {
                hub.coordinate_connection_initiations(ski, entry);
            }
        }

        let mut sorted: Vec<&MdnsEntry> = entries.values().collect();
        sorted.sort_by_key(|entry| {
            format!("{}{}{}", entry.brand, entry.model, entry.ski).to_lowercase()
        });

        let services: Vec<RemoteService> = sorted
            .into_iter()
            .map(|entry| RemoteService {
                name: entry.name.clone(),
                ski: entry.ski.clone(),
                identifier: entry.identifier.clone(),
                brand: entry.brand.clone(),
                device_type: entry.device_type.clone(),
                model: entry.model.clone(),
                serial: entry.serial.clone(),
                categories: entry.categories.clone(),
            })
            .collect();

        self.reader.visible_remote_services_updated(services);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_hub;

    fn entry(ski: &str, brand: &str, model: &str) -> MdnsEntry {
        MdnsEntry {
            name: format!("{brand}-{model}"),
            ski: ski.to_string(),
            identifier: format!("id-{ski}"),
            path: "/ship/".to_string(),
            register: false,
            brand: brand.to_string(),
            device_type: "EnergyManagementSystem".to_string(),
            model: model.to_string(),
            serial: String::new(),
            categories: vec![2],
            host: "remote.local".to_string(),
            port: 4711,
            addresses: vec!["192.0.2.10".parse().unwrap()],
        }
    }

    #[tokio::test]
    async fn test_visible_services_sorted() {
        let (hub, reader, _) = test_hub().await;

        let mut entries = HashMap::new();
        entries.insert("bb".to_string(), entry("bb", "Zeta", "Z1"));
        entries.insert("aa".to_string(), entry("aa", "alpha", "A1"));

        hub.report_mdns_entries(entries);

        let reports = reader.visible_services();
        let services = reports.last().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].brand, "alpha");
        assert_eq!(services[1].brand, "Zeta");
    }

    #[tokio::test]
    async fn test_unpaired_services_not_scheduled() {
        let (hub, _, _) = test_hub().await;

        let mut entries = HashMap::new();
        entries.insert("aa".to_string(), entry("aa", "Brand", "M"));
        hub.report_mdns_entries(entries);

        assert!(!hub.is_connection_attempt_running("aa"));
    }

    #[tokio::test]
    async fn test_queued_service_schedules_attempt() {
        let (hub, _, _) = test_hub().await;
        hub.service_for_ski("aa")
            .set_connection_state(ConnectionState::Queued);

        let mut entries = HashMap::new();
        entries.insert("aa".to_string(), entry("aa", "Brand", "M"));
        hub.report_mdns_entries(entries);

        // the attempt counter was drawn for the queued service
        assert_eq!(hub.current_connection_attempt_counter("aa"), Some(0));
    }

    #[tokio::test]
    async fn test_register_flag_copied_to_auto_accept() {
        let (hub, _, _) = test_hub().await;
        hub.service_for_ski("aa")
            .set_connection_state(ConnectionState::Queued);

        let mut item = entry("aa", "Brand", "M");
        item.register = true;

        let mut entries = HashMap::new();
        entries.insert("aa".to_string(), item);
        hub.report_mdns_entries(entries);

        assert!(hub.service_for_ski("aa").auto_accept());
    }
}
