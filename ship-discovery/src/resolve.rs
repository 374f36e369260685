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

//! Per-interface record deduplication
//!
//! Resolvers that browse per interface (Avahi does, per protocol too) emit
//! one record per `(name, type, domain, protocol, interface)` tuple. The
//! dedup cache suppresses identical repeats and remembers the parsed TXT
//! map so a removal can be reported with the data it removes.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Identity of one resolver record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub name: String,
    pub service_type: String,
    pub domain: String,
    pub protocol: i32,
    pub interface: i32,
}

/// Cache of records already seen, keyed by [`ServiceKey`]
#[derive(Default)]
pub struct ResolveDedup {
    seen: Mutex<HashMap<ServiceKey, HashMap<String, String>>>,
}

impl ResolveDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an added service. Returns `false` when the identical record
    /// was already reported for this key (duplicate to be swallowed).
    pub fn on_add(&self, key: ServiceKey, txt: &HashMap<String, String>) -> bool {
        let mut seen = self.seen.lock();
        if seen.get(&key) == Some(txt) {
            return false;
        }
        seen.insert(key, txt.clone());
        true
    }

    /// Record a removal. Returns the TXT map cached for this key, or `None`
    /// when the key was never reported (removal to be swallowed).
    pub fn on_remove(&self, key: &ServiceKey) -> Option<HashMap<String, String>> {
        self.seen.lock().remove(key)
    }

    /// Drop everything, e.g. after a backend reconnect.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// Parse `key=value` TXT strings into a map.
///
/// Records without `=` are skipped; a later duplicate key wins, matching
/// resolver behaviour.
pub fn parse_txt(records: &[String]) -> HashMap<String, String> {
    let mut elements = HashMap::new();
    for record in records {
        if let Some((key, value)) = record.split_once('=') {
            elements.insert(key.to_string(), value.to_string());
        }
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(interface: i32) -> ServiceKey {
        ServiceKey {
            name: "Demo-Unit".to_string(),
            service_type: "_ship._tcp".to_string(),
            domain: "local".to_string(),
            protocol: 0,
            interface,
        }
    }

    fn txt() -> HashMap<String, String> {
        parse_txt(&["txtvers=1".to_string(), "ski=abcd".to_string()])
    }

    #[test]
    fn test_duplicate_add_swallowed() {
        let dedup = ResolveDedup::new();
        assert!(dedup.on_add(key(1), &txt()));
        assert!(!dedup.on_add(key(1), &txt()));
    }

    #[test]
    fn test_distinct_interface_passes() {
        let dedup = ResolveDedup::new();
        assert!(dedup.on_add(key(1), &txt()));
        assert!(dedup.on_add(key(2), &txt()));
    }

    #[test]
    fn test_changed_txt_passes() {
        let dedup = ResolveDedup::new();
        assert!(dedup.on_add(key(1), &txt()));

        let mut changed = txt();
        changed.insert("register".to_string(), "true".to_string());
        assert!(dedup.on_add(key(1), &changed));
    }

    #[test]
    fn test_remove_returns_cached_txt() {
        let dedup = ResolveDedup::new();
        dedup.on_add(key(1), &txt());

        let cached = dedup.on_remove(&key(1)).unwrap();
        assert_eq!(cached.get("ski").map(String::as_str), Some("abcd"));

        // second removal for the same key has nothing to report
        assert!(dedup.on_remove(&key(1)).is_none());
    }

    #[test]
    fn test_parse_txt_skips_malformed() {
        let parsed = parse_txt(&[
            "txtvers=1".to_string(),
            "noequals".to_string(),
            "path=/ship/".to_string(),
        ]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("path").map(String::as_str), Some("/ship/"));
    }
}
