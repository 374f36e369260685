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

//! Native zeroconf backend
//!
//! Implements the [`ship_discovery::MdnsProvider`] contract with the
//! `mdns-sd` crate. One `ServiceDaemon` handles both browsing and the
//! local announcement; a pump task converts daemon events into resolve
//! callbacks. A daemon channel failure counts as a session loss and is
//! handed to the reconnect supervisor.
//!
//! `mdns-sd` merges per-interface records internally and exposes no
//! interface index per event, so records pass the dedup cache under the
//! wildcard interface; the per-interface behaviour of DBus-style resolvers
//! is covered by the mock backend.

mod zeroconf;

pub use zeroconf::ZeroconfProvider;

/// Full service type string as `mdns-sd` expects it
pub(crate) fn service_type() -> String {
    format!(
        "{}.{}.",
        ship_discovery::SHIP_SERVICE_TYPE,
        ship_discovery::SHIP_DOMAIN
    )
}
