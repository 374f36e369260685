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

//! SHIP connection hub
//!
//! The root of the connection layer: owns all live [`ship_network`]
//! connections keyed by remote SKI, runs the TLS-terminated websocket
//! server and the outgoing dialer, arbitrates double connections
//! (SHIP 12.2.2), schedules randomised connection retries, reconciles
//! discovered mDNS records against the desired pairing state and surfaces
//! everything to the host through the [`HubReader`] callbacks.
//!
//! ## Wiring
//!
//! ```text
//! mDNS backend -> MdnsManager -> Hub (MdnsReport)
//!                                 |-- dial / accept -> WebsocketConnection
//!                                 |-- ShipConnection (ConnectionInfoProvider)
//!                                 `-- HubReader (host application)
//! ```

pub mod api;
pub(crate) mod connections;
pub(crate) mod hub;
pub(crate) mod mdns;
pub(crate) mod pairing;
pub(crate) mod provider;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{
    ConnectionState, ConnectionStateDetail, HubReader, RemoteService, ServiceDetails,
};
pub use hub::{Hub, HubError};
