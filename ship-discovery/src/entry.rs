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

//! Discovered-service records

use std::net::IpAddr;

/// Device categories per the SHIP Requirements for Installation Process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceCategory {
    /// Grid Connection Point Hub (e.g. a control unit from the public grid operator)
    GridConnectionHub = 1,
    /// Energy Management System
    EnergyManagementSystem = 2,
    /// E-mobility related device (e.g. charging station)
    EMobility = 3,
    /// HVAC related device/system (e.g. heat pump)
    Hvac = 4,
    /// Inverter (PV/battery/hybrid)
    Inverter = 5,
    /// Domestic appliance
    DomesticAppliance = 6,
    /// Metering device
    Metering = 7,
}

impl DeviceCategory {
    /// Parse a category from its numeric TXT representation.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::GridConnectionHub),
            2 => Some(Self::EnergyManagementSystem),
            3 => Some(Self::EMobility),
            4 => Some(Self::Hvac),
            5 => Some(Self::Inverter),
            6 => Some(Self::DomesticAppliance),
            7 => Some(Self::Metering),
            _ => None,
        }
    }
}

/// A discovered SHIP service, keyed by its SKI.
///
/// Two records with the same SKI are the same service: mDNS instance names
/// and addresses change, the SKI does not. Addresses accumulate as the
/// resolver reports the service on additional interfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdnsEntry {
    /// mDNS instance name
    pub name: String,
    /// Normalised SKI (the record key)
    pub ski: String,
    /// SHIP identifier (`id` TXT key)
    pub identifier: String,
    /// Websocket endpoint path (`path` TXT key)
    pub path: String,
    /// Whether the peer auto-accepts registrations (`register` TXT key)
    pub register: bool,
    pub brand: String,
    pub device_type: String,
    pub model: String,
    pub serial: String,
    pub categories: Vec<u32>,
    pub host: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_category_values() {
        assert_eq!(DeviceCategory::from_u32(2), Some(DeviceCategory::EnergyManagementSystem));
        assert_eq!(DeviceCategory::from_u32(7), Some(DeviceCategory::Metering));
        assert_eq!(DeviceCategory::from_u32(0), None);
        assert_eq!(DeviceCategory::from_u32(8), None);
    }
}
