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

//! SHIP data model
//!
//! This crate defines the wire-level building blocks shared by the rest of
//! the stack, without being tied to any transport:
//!
//! - **Frame tags**: the single leading byte of every SHIP binary message
//! - **EEBUS JSON codec**: the lossless swap between standard JSON and the
//!   EEBUS representation (objects rendered as arrays of single-key objects)
//! - **Control messages**: serde models for `connectionHello`,
//!   `messageProtocolHandshake`, `connectionPinState`, `accessMethods` and
//!   `connectionClose`
//! - **Handshake states**: the full SHIP message-exchange state set
//! - **SKI handling**: normalisation of Subject Key Identifier strings

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod ski;
pub mod state;

pub use codec::{from_eebus, to_eebus};
pub use error::ShipError;
pub use frame::{MsgType, SHIP_INIT};
pub use message::{
    AccessMethods, AccessMethodsRequest, ConnectionClose, ConnectionClosePhase, ConnectionHello,
    ConnectionHelloPhase, MessageProtocolFormat, MessageProtocolHandshake,
    MessageProtocolHandshakeError, ConnectionPinState, PinState, ProtocolHandshakeType, ShipData,
    Version, SHIP_PROTOCOL_ID,
};
pub use ski::normalize_ski;
pub use state::{ShipHandshakeState, ShipStateDetail};
