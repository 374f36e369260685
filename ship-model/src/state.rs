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

//! SHIP message-exchange states
//!
//! The full labelled state set of the handshake state machine. States are
//! reported externally as a `(state, error)` pair; the hub projects them
//! onto its coarser pairing states.

use crate::error::ShipError;

/// SHIP message exchange state (SHIP 13.4.3 - 13.4.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipHandshakeState {
    // Connection Mode Initialisation (CMI), SHIP 13.4.3
    CmiInitStart,
    CmiClientSend,
    CmiClientWait,
    CmiClientEvaluate,
    CmiServerWait,
    CmiServerEvaluate,

    // Connection Data Preparation, SHIP 13.4.4
    Hello,
    HelloReadyInit,
    HelloReadyListen,
    HelloReadyTimeout,
    HelloPendingInit,
    HelloPendingListen,
    HelloPendingTimeout,
    HelloOk,
    /// Sent abort to the remote
    HelloAbort,
    /// Sending abort to the remote is done
    HelloAbortDone,
    /// Received abort from the remote
    HelloRemoteAbortDone,
    /// Connection closed by the remote while we were ready:
    /// "4452: Node rejected by application"
    HelloRejected,

    // Protocol Handshake, SHIP 13.4.4.2
    ProtHServerInit,
    ProtHClientInit,
    ProtHServerListenProposal,
    ProtHServerListenConfirm,
    ProtHClientListenChoice,
    ProtHTimeout,
    ProtHClientOk,
    ProtHServerOk,

    // Connection PIN State, SHIP 13.4.5
    PinCheckInit,
    PinCheckListen,
    PinCheckError,
    PinCheckBusyInit,
    PinCheckBusyWait,
    PinCheckOk,
    PinAskInit,
    PinAskProcess,
    PinAskRestricted,
    PinAskOk,

    // Access Methods Identification, SHIP 13.4.6
    AccessMethodsRequest,

    /// Handshake approved on both ends
    Approved,
    /// Handshake completed, the connection carries data
    Complete,
    /// Handshake ended with an error
    Error,
}

impl ShipHandshakeState {
    /// States in which the handshake has come to a definite end, successful
    /// or not, as opposed to being cut off midway.
    pub fn is_handshake_end(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::HelloAbortDone | Self::HelloRemoteAbortDone | Self::HelloRejected
        )
    }
}

/// The externally reported `(state, error)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipStateDetail {
    pub state: ShipHandshakeState,
    pub error: Option<ShipError>,
}

impl ShipStateDetail {
    pub fn new(state: ShipHandshakeState, error: Option<ShipError>) -> Self {
        Self { state, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_end_states() {
        assert!(ShipHandshakeState::Complete.is_handshake_end());
        assert!(ShipHandshakeState::HelloAbortDone.is_handshake_end());
        assert!(ShipHandshakeState::HelloRemoteAbortDone.is_handshake_end());
        assert!(ShipHandshakeState::HelloRejected.is_handshake_end());

        assert!(!ShipHandshakeState::CmiInitStart.is_handshake_end());
        assert!(!ShipHandshakeState::Error.is_handshake_end());
        assert!(!ShipHandshakeState::HelloPendingListen.is_handshake_end());
    }
}
