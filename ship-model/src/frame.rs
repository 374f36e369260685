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

//! SHIP binary framing
//!
//! Every SHIP message on the wire is a binary websocket message of the form
//! `[tag | body]` with a single leading tag byte.

/// Frame tag byte values (SHIP 13.4)
pub struct MsgType;

impl MsgType {
    /// Connection Mode Initialisation, body is a single `0x00`
    pub const INIT: u8 = 0;
    /// JSON SHIP control message (hello, protocol handshake, pin, access methods)
    pub const CONTROL: u8 = 1;
    /// SHIP-wrapped SPINE payload
    pub const DATA: u8 = 2;
    /// Connection close announce/confirm
    pub const END: u8 = 3;
}

/// The complete CMI init message: `[INIT, 0x00]` (SHIP 13.4.3)
pub const SHIP_INIT: [u8; 2] = [MsgType::INIT, 0x00];

/// Split a frame into its tag byte and body.
///
/// Returns `None` for an empty message; a one-byte message yields an empty
/// body (length validation is the transport's job, SHIP 13.4.3 framing is
/// ours).
pub fn split_frame(msg: &[u8]) -> Option<(u8, &[u8])> {
    let (tag, body) = msg.split_first()?;
    Some((*tag, body))
}
