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

//! SKI string handling
//!
//! A SKI (Subject Key Identifier) is the 20-byte SHA-1 of the device's
//! private key, rendered as 40 lowercase hex characters. It is the stable
//! identity of a service across restarts; instance names and addresses may
//! change, the SKI does not.

/// Normalise an SKI string for use as a registry key.
///
/// Strips spaces and dashes (users paste SKIs in `AB-CD-...` or
/// `ab cd ...` grouping) and lowercases the rest. Idempotent:
/// `normalize_ski(normalize_ski(s)) == normalize_ski(s)`.
///
/// # Example
///
/// ```
/// # use ship_model::normalize_ski;
/// assert_eq!(normalize_ski("AB-CD ef12"), "abcdef12");
/// ```
pub fn normalize_ski(ski: &str) -> String {
    ski.chars()
        .filter(|c| *c != ' ' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}
