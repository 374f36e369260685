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

//! SHIP mDNS discovery
//!
//! This crate defines the discovery layer without being tied to a specific
//! mDNS implementation:
//!
//! - **Adapter contract**: [`MdnsProvider`] with a uniform resolve callback,
//!   implemented by pluggable backends (`ship-discovery-mdns` for native
//!   zeroconf, `ship-discovery-mock` for tests)
//! - **Per-interface dedup**: [`resolve::ResolveDedup`] collapses the
//!   duplicate records resolvers emit per network interface
//! - **Reconnect supervision**: [`provider::ReconnectSupervisor`] restarts a
//!   backend session that disconnected, re-announcing with the previously
//!   supplied arguments
//! - **The manager**: [`MdnsManager`] announces the local service per
//!   SHIP 7.3.2 and aggregates resolver callbacks into a stable, SKI-keyed
//!   set of remote-service records for the connection hub

pub mod entry;
pub mod error;
pub mod manager;
pub mod provider;
pub mod resolve;

pub use entry::{DeviceCategory, MdnsEntry};
pub use error::DiscoveryError;
pub use manager::{MdnsConfig, MdnsManager, MdnsReport};
pub use provider::{
    interface_allowed, AnnounceArgs, MdnsProvider, ReconnectSupervisor, ResolveCallback,
    ResolvedItem, RestartableSession, INTERFACE_UNSPEC,
};
pub use resolve::{ResolveDedup, ServiceKey};

/// mDNS service type for SHIP nodes (SHIP 7)
pub const SHIP_SERVICE_TYPE: &str = "_ship._tcp";

/// mDNS domain
pub const SHIP_DOMAIN: &str = "local";

/// Well-known websocket endpoint path (SHIP 7.3.2)
pub const SHIP_WEBSOCKET_PATH: &str = "/ship/";

/// Announcement record TTL in seconds (SHIP 7); handed to the backend on
/// every announce
pub const SHIP_ANNOUNCE_TTL: u32 = 120;
