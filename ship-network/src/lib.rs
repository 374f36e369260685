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

//! SHIP connection state machine
//!
//! One [`ShipConnection`] drives the complete SHIP handshake over an
//! abstract message transport: CMI init, HELLO trust negotiation with
//! prolongation, protocol handshake, PIN check, access-methods exchange,
//! and finally the data phase carrying opaque SPINE payloads. The close
//! protocol (announce/confirm) and unsafe teardown paths are handled here
//! as well.
//!
//! The connection talks to its surroundings exclusively through the traits
//! in [`api`]: the transport implements [`api::MessageWriter`], the hub
//! implements [`api::ConnectionInfoProvider`], and the SPINE engine is
//! reached through the [`api::PayloadReader`] obtained on handshake
//! completion.
//!
//! All state transitions run under a single per-connection lock; the
//! handshake timer is a single scheduler task fed through a watch channel,
//! and every firing carries an epoch that is re-checked so a cancel racing
//! a fire loses cleanly.

pub mod api;
pub mod connection;
pub(crate) mod handshake;
pub(crate) mod timer;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{
    ConnectionInfoProvider, MessageReader, MessageWriter, PayloadReader, PayloadWriter,
    SHIP_WEBSOCKET_SUB_PROTOCOL,
};
pub use connection::{ShipConnection, ShipRole, SPINE_BUFFER_CAPACITY};

use std::time::Duration;

// Handshake timing (SHIP 4.2, 13.4.4.1.3)

/// CMI exchange must complete within this window
pub(crate) const CMI_TIMEOUT: Duration = Duration::from_secs(10);
/// Initial wait-for-ready window in the hello phase
pub(crate) const T_HELLO_INIT: Duration = Duration::from_secs(60);
/// Waiting values at or above this get a send-prolongation timer
pub(crate) const T_HELLO_PROLONG_THR_INC: Duration = Duration::from_secs(30);
/// Prolongation requests go out this long before the peer's window closes
pub(crate) const T_HELLO_PROLONG_WAITING_GAP: Duration = Duration::from_secs(15);
/// Lower bound for any hello timer derived from a peer waiting value
pub(crate) const T_HELLO_PROLONG_MIN: Duration = Duration::from_secs(1);
