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

//! EEBUS JSON codec
//!
//! EEBUS JSON is structurally equivalent to standard JSON but renders every
//! object as a JSON array of single-key objects:
//!
//! ```text
//! {"a": 1, "b": {"c": 2}}   ->   [{"a": 1}, {"b": [{"c": 2}]}]
//! ```
//!
//! Both directions are provided. [`from_eebus`] also accepts standard-form
//! input unchanged, so incoming messages parse regardless of which form the
//! peer chose; all emission is EEBUS form.
//!
//! The byte-level helpers additionally handle the frame tag and the known
//! peer quirk of a trailing `0x00` byte on received messages.

use crate::error::ShipError;
use crate::frame::split_frame;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Convert standard JSON into the EEBUS representation.
///
/// Every object becomes an array of single-key objects, recursively. Field
/// order is preserved (EEBUS arrays are order-significant). An empty object
/// becomes an empty array.
pub fn to_eebus(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Array(
            map.iter()
                .map(|(key, inner)| {
                    let mut entry = Map::new();
                    entry.insert(key.clone(), to_eebus(inner));
                    Value::Object(entry)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_eebus).collect()),
        other => other.clone(),
    }
}

/// Convert EEBUS JSON back into standard JSON.
///
/// An array whose elements are all single-key objects is merged back into
/// one object (keys are unique within an object per the SHIP data model).
/// Standard-form objects pass through with their values converted, so mixed
/// input is tolerated. An empty array maps to an empty object: SHIP control
/// messages contain empty objects (`accessMethodsRequest`) but never empty
/// data arrays, and SPINE payloads bypass this codec entirely.
pub fn from_eebus(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Value::Object(Map::new());
            }
            if items.iter().all(is_single_key_object) {
                let mut merged = Map::new();
                for item in items {
                    if let Value::Object(map) = item {
                        for (key, inner) in map {
                            merged.insert(key.clone(), from_eebus(inner));
                        }
                    }
                }
                Value::Object(merged)
            } else {
                Value::Array(items.iter().map(from_eebus).collect())
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| (key.clone(), from_eebus(inner)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_single_key_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1)
}

/// Encode a SHIP model into a tagged wire frame.
///
/// The model is serialised to JSON, swapped into EEBUS form and prefixed
/// with the tag byte.
///
/// # Errors
///
/// Returns [`ShipError::ProtocolViolation`] if the model cannot be
/// serialised.
pub fn encode_ship_model<T: Serialize>(tag: u8, model: &T) -> Result<Vec<u8>, ShipError> {
    let value = serde_json::to_value(model)
        .map_err(|e| ShipError::ProtocolViolation(format!("serializing message: {e}")))?;
    let eebus = to_eebus(&value);
    let body = serde_json::to_vec(&eebus)
        .map_err(|e| ShipError::ProtocolViolation(format!("encoding message: {e}")))?;

    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(tag);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Split a wire frame into its tag and the standard-form JSON body.
///
/// Tolerates a single trailing `0x00` byte, a known quirk of some peers.
///
/// # Errors
///
/// Returns [`ShipError::InvalidFrame`] for an empty message and
/// [`ShipError::ProtocolViolation`] for a body that is not JSON.
pub fn decode_ship_frame(msg: &[u8]) -> Result<(u8, Value), ShipError> {
    let (tag, body) = split_frame(msg)
        .ok_or_else(|| ShipError::InvalidFrame("empty message".to_string()))?;

    let body = match body.split_last() {
        Some((&0x00, rest)) => rest,
        _ => body,
    };

    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| ShipError::ProtocolViolation(format!("parsing message body: {e}")))?;

    Ok((tag, from_eebus(&raw)))
}

/// Decode a wire frame directly into a typed SHIP model.
pub fn decode_ship_model<T: DeserializeOwned>(msg: &[u8]) -> Result<T, ShipError> {
    let (_, value) = decode_ship_frame(msg)?;
    serde_json::from_value(value)
        .map_err(|e| ShipError::ProtocolViolation(format!("unexpected message shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_eebus_object() {
        let value = json!({"a": 1, "b": 2});
        assert_eq!(to_eebus(&value), json!([{"a": 1}, {"b": 2}]));
    }

    #[test]
    fn test_to_eebus_nested() {
        let value = json!({"connectionHello": {"phase": "ready", "waiting": 60000}});
        assert_eq!(
            to_eebus(&value),
            json!([{"connectionHello": [{"phase": "ready"}, {"waiting": 60000}]}])
        );
    }

    #[test]
    fn test_to_eebus_empty_object() {
        assert_eq!(to_eebus(&json!({"accessMethodsRequest": {}})), json!([{"accessMethodsRequest": []}]));
    }

    #[test]
    fn test_from_eebus_merges() {
        let value = json!([{"a": 1}, {"b": [{"c": 2}]}]);
        assert_eq!(from_eebus(&value), json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn test_from_eebus_accepts_standard_form() {
        let value = json!({"connectionHello": {"phase": "pending"}});
        assert_eq!(from_eebus(&value), value);
    }

    #[test]
    fn test_from_eebus_keeps_data_arrays() {
        // A heterogeneous array is data, not an eebus-encoded object.
        let value = json!([1, {"a": 2}]);
        assert_eq!(from_eebus(&value), value);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let value = json!({
            "messageProtocolHandshake": {
                "handshakeType": "announceMax",
                "version": {"major": 1, "minor": 0},
                "formats": {"format": ["JSON-UTF8"]}
            }
        });
        let encoded = to_eebus(&value);
        assert_eq!(from_eebus(&encoded), value);

        // Field order survives the trip.
        let text = serde_json::to_string(&from_eebus(&encoded)).unwrap();
        let major = text.find("major").unwrap();
        let minor = text.find("minor").unwrap();
        assert!(major < minor);
    }

    #[test]
    fn test_round_trip_singleton_list() {
        let value = json!({"formats": {"format": ["JSON-UTF8"]}});
        assert_eq!(from_eebus(&to_eebus(&value)), value);
    }

    #[test]
    fn test_decode_tolerates_trailing_nul() {
        let mut frame = vec![1u8];
        frame.extend_from_slice(br#"[{"connectionHello":[{"phase":"ready"}]}]"#);
        frame.push(0x00);

        let (tag, value) = decode_ship_frame(&frame).unwrap();
        assert_eq!(tag, 1);
        assert_eq!(value, json!({"connectionHello": {"phase": "ready"}}));
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert!(matches!(
            decode_ship_frame(&[]),
            Err(ShipError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_ship_frame(&[1, b'n', b'o', b'p', b'e']),
            Err(ShipError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_encode_decode_model() {
        use crate::message::{ConnectionHello, ConnectionHelloPhase};

        let hello = ConnectionHello::new(ConnectionHelloPhase::Pending, Some(60000), None);
        let frame = encode_ship_model(1, &hello).unwrap();
        assert_eq!(frame[0], 1);

        let decoded: ConnectionHello = decode_ship_model(&frame).unwrap();
        assert_eq!(
            decoded.connection_hello.phase,
            ConnectionHelloPhase::Pending
        );
        assert_eq!(decoded.connection_hello.waiting, Some(60000));
    }
}
