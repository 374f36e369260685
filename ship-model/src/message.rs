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

//! SHIP control message models
//!
//! Serde models for every control message exchanged during the handshake
//! and the data phase. All of these are carried as `CONTROL` (or `END` for
//! `connectionClose`, `DATA` for `ShipData`) frames in EEBUS JSON form; see
//! [`crate::codec`] for the representation swap.

use crate::codec::to_eebus;
use crate::error::ShipError;
use crate::frame::MsgType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol id carried in every SHIP data header (SHIP 13.4.6)
pub const SHIP_PROTOCOL_ID: &str = "ee1.0";

/* Connection Hello (SHIP 13.4.4.1) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHello {
    #[serde(rename = "connectionHello")]
    pub connection_hello: ConnectionHelloType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHelloType {
    pub phase: ConnectionHelloPhase,
    /// Remaining waiting time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prolongation_request: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionHelloPhase {
    Pending,
    Ready,
    Aborted,
    /// Unrecognised phase value from a peer; never sent
    #[serde(other)]
    Unknown,
}

impl ConnectionHello {
    pub fn new(
        phase: ConnectionHelloPhase,
        waiting: Option<u64>,
        prolongation_request: Option<bool>,
    ) -> Self {
        Self {
            connection_hello: ConnectionHelloType {
                phase,
                waiting,
                prolongation_request,
            },
        }
    }
}

/* Message Protocol Handshake (SHIP 13.4.4.2) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProtocolHandshake {
    #[serde(rename = "messageProtocolHandshake")]
    pub message_protocol_handshake: MessageProtocolHandshakeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProtocolHandshakeType {
    pub handshake_type: ProtocolHandshakeType,
    pub version: Version,
    pub formats: MessageProtocolFormats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolHandshakeType {
    AnnounceMax,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// SHIP 13.4.4.2: version 1.0 is the only published protocol version
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProtocolFormats {
    pub format: Vec<MessageProtocolFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageProtocolFormat {
    #[serde(rename = "JSON-UTF8")]
    JsonUtf8,
    #[serde(rename = "JSON-UTF16")]
    JsonUtf16,
}

impl MessageProtocolHandshake {
    /// The handshake message this implementation announces and selects:
    /// version 1.0, JSON-UTF8.
    pub fn new(handshake_type: ProtocolHandshakeType) -> Self {
        Self {
            message_protocol_handshake: MessageProtocolHandshakeType {
                handshake_type,
                version: PROTOCOL_VERSION,
                formats: MessageProtocolFormats {
                    format: vec![MessageProtocolFormat::JsonUtf8],
                },
            },
        }
    }

    /// Whether the carried version and formats match what this
    /// implementation supports.
    pub fn is_supported_selection(&self) -> bool {
        let hs = &self.message_protocol_handshake;
        hs.version == PROTOCOL_VERSION
            && hs
                .formats
                .format
                .contains(&MessageProtocolFormat::JsonUtf8)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProtocolHandshakeError {
    #[serde(rename = "messageProtocolHandshakeError")]
    pub message_protocol_handshake_error: MessageProtocolHandshakeErrorType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageProtocolHandshakeErrorType {
    pub error: u8,
}

/// Error values of `messageProtocolHandshakeError` (SHIP 13.4.4.2)
pub mod handshake_error {
    pub const RFU: u8 = 0;
    pub const TIMEOUT: u8 = 1;
    pub const UNEXPECTED_MESSAGE: u8 = 2;
    pub const SELECTION_MISMATCH: u8 = 3;
}

impl MessageProtocolHandshakeError {
    pub fn new(error: u8) -> Self {
        Self {
            message_protocol_handshake_error: MessageProtocolHandshakeErrorType { error },
        }
    }
}

/* Connection PIN State (SHIP 13.4.5) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPinState {
    #[serde(rename = "connectionPinState")]
    pub connection_pin_state: ConnectionPinStateType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPinStateType {
    pub pin_state: PinState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_permission: Option<PinInputPermission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinState {
    Required,
    Optional,
    PinOk,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PinInputPermission {
    Busy,
    Ok,
}

impl ConnectionPinState {
    pub fn new(pin_state: PinState) -> Self {
        Self {
            connection_pin_state: ConnectionPinStateType {
                pin_state,
                input_permission: None,
            },
        }
    }
}

/* Access Methods (SHIP 13.4.6) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessMethodsRequest {
    #[serde(rename = "accessMethodsRequest")]
    pub access_methods_request: AccessMethodsRequestType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessMethodsRequestType {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessMethods {
    #[serde(rename = "accessMethods")]
    pub access_methods: AccessMethodsType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessMethodsType {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AccessMethods {
    pub fn new(id: &str) -> Self {
        Self {
            access_methods: AccessMethodsType {
                id: Some(id.to_string()),
            },
        }
    }
}

/* Connection Close (SHIP 13.4.7) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionClose {
    #[serde(rename = "connectionClose")]
    pub connection_close: ConnectionCloseType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCloseType {
    pub phase: ConnectionClosePhase,
    /// Milliseconds the peer should wait before dropping the transport
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionClosePhase {
    Announce,
    Confirm,
}

impl ConnectionClose {
    pub fn announce(max_time: u32, reason: &str) -> Self {
        Self {
            connection_close: ConnectionCloseType {
                phase: ConnectionClosePhase::Announce,
                max_time: Some(max_time),
                reason: if reason.is_empty() {
                    None
                } else {
                    Some(reason.to_string())
                },
            },
        }
    }

    pub fn confirm() -> Self {
        Self {
            connection_close: ConnectionCloseType {
                phase: ConnectionClosePhase::Confirm,
                max_time: None,
                reason: None,
            },
        }
    }
}

/* SHIP Data (SHIP 13.4.6) */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipData {
    pub data: ShipDataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipDataType {
    pub header: ShipDataHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipDataHeader {
    pub protocol_id: String,
}

/// Placeholder substituted for the payload while the outer SHIP structure
/// is encoded. The already-EEBUS-encoded payload must not be transformed a
/// second time, so it is spliced into the encoded text afterwards.
const PAYLOAD_PLACEHOLDER: &str = r#"{"place":"holder"}"#;

/// Wrap SPINE payload bytes into a tagged `DATA` wire frame.
///
/// The payload is independently converted to EEBUS form and then substituted
/// verbatim for the placeholder inside the encoded outer structure.
///
/// # Errors
///
/// Returns [`ShipError::ProtocolViolation`] if the payload is not valid
/// JSON.
pub fn wrap_spine_payload(payload: &[u8]) -> Result<Vec<u8>, ShipError> {
    let payload_value: Value = serde_json::from_slice(payload)
        .map_err(|e| ShipError::ProtocolViolation(format!("parsing spine payload: {e}")))?;
    let eebus_payload = serde_json::to_string(&to_eebus(&payload_value))
        .map_err(|e| ShipError::ProtocolViolation(format!("encoding spine payload: {e}")))?;

    let placeholder: Value = serde_json::from_str(PAYLOAD_PLACEHOLDER)
        .map_err(|e| ShipError::ProtocolViolation(e.to_string()))?;
    let message = ShipData {
        data: ShipDataType {
            header: ShipDataHeader {
                protocol_id: SHIP_PROTOCOL_ID.to_string(),
            },
            payload: Some(placeholder),
        },
    };

    let outer = serde_json::to_value(&message)
        .map_err(|e| ShipError::ProtocolViolation(e.to_string()))?;
    let encoded = serde_json::to_string(&to_eebus(&outer))
        .map_err(|e| ShipError::ProtocolViolation(e.to_string()))?;

    let eebus_placeholder = format!("[{PAYLOAD_PLACEHOLDER}]");
    let encoded = encoded.replace(&eebus_placeholder, &eebus_payload);

    let mut frame = Vec::with_capacity(encoded.len() + 1);
    frame.push(MsgType::DATA);
    frame.extend_from_slice(encoded.as_bytes());
    Ok(frame)
}

impl ShipData {
    /// Extract the SPINE payload as standard-form JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::ProtocolViolation`] when no payload is present.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, ShipError> {
        let payload = self
            .data
            .payload
            .as_ref()
            .ok_or_else(|| ShipError::ProtocolViolation("received no valid payload".to_string()))?;
        serde_json::to_vec(payload)
            .map_err(|e| ShipError::ProtocolViolation(format!("encoding payload: {e}")))
    }
}
