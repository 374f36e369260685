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

//! Shared error type for the SHIP connection layer

use thiserror::Error;

/// Errors surfaced by the connection layer.
///
/// The variants correspond to the externally-observable failure classes: a
/// handshake ends with exactly one of these, reported alongside the terminal
/// connection state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShipError {
    /// Malformed byte framing, short frame, or a non-binary websocket message
    #[error("invalid ship message frame: {0}")]
    InvalidFrame(String),

    /// A handshake-phase timer expired and led to a terminal abort
    #[error("handshake timeout: {0}")]
    HandshakeTimeout(String),

    /// Unexpected SHIP message for the current state, or unsupported content
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer aborted the handshake or rejected the connection by closing
    #[error("remote aborted: {0}")]
    RemoteAbort(String),

    /// TLS/WebSocket failure or local shutdown
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// The local user refused trust, or the peer is unknown and waiting for
    /// trust is not allowed
    #[error("pairing denied: {0}")]
    PairingDenied(String),

    /// Double-connection arbitration decided to drop this instance
    #[error("lost double connection arbitration")]
    DoubleConnectionLost,

    /// A request referenced an SKI with no registry entry
    #[error("no connection found for SKI")]
    ConnectionNotFound,

    /// The pre-handshake SPINE buffer exceeded its capacity
    #[error("spine message buffer overflow")]
    BufferOverflow,
}
