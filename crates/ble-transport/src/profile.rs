use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Write size used when a profile carries no hint and no override is set.
pub const DEFAULT_TX_MTU: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    NanoX,
    Stax,
    Flex,
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NanoX => "Nano X",
            Self::Stax => "Stax",
            Self::Flex => "Flex",
        };
        f.write_str(name)
    }
}

/// GATT signature of one device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleProfile {
    pub id: &'static str,
    pub model: DeviceModel,
    pub service_uuid: Uuid,
    pub notify_uuid: Uuid,
    pub write_uuid: Uuid,
    pub mtu_hint: Option<u16>,
}

impl BleProfile {
    pub const fn nano_x() -> Self {
        Self {
            id: "ledger_nano_x",
            model: DeviceModel::NanoX,
            service_uuid: uuid::uuid!("13d63400-2c97-0004-0000-4c6564676572"),
            notify_uuid: uuid::uuid!("13d63400-2c97-0004-0001-4c6564676572"),
            write_uuid: uuid::uuid!("13d63400-2c97-0004-0002-4c6564676572"),
            mtu_hint: Some(153),
        }
    }

    pub const fn stax() -> Self {
        Self {
            id: "ledger_stax",
            model: DeviceModel::Stax,
            service_uuid: uuid::uuid!("13d63400-2c97-6004-0000-4c6564676572"),
            notify_uuid: uuid::uuid!("13d63400-2c97-6004-0001-4c6564676572"),
            write_uuid: uuid::uuid!("13d63400-2c97-6004-0002-4c6564676572"),
            mtu_hint: Some(153),
        }
    }

    pub const fn flex() -> Self {
        Self {
            id: "ledger_flex",
            model: DeviceModel::Flex,
            service_uuid: uuid::uuid!("13d63400-2c97-3004-0000-4c6564676572"),
            notify_uuid: uuid::uuid!("13d63400-2c97-3004-0001-4c6564676572"),
            write_uuid: uuid::uuid!("13d63400-2c97-3004-0002-4c6564676572"),
            mtu_hint: Some(153),
        }
    }

    pub fn matches(&self, services: &[Uuid]) -> bool {
        services.contains(&self.service_uuid)
    }
}

/// Advertisement data reported by the platform for one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i32>,
    pub services: Vec<Uuid>,
}

pub struct KnownProfiles;

impl KnownProfiles {
    pub fn all() -> Vec<BleProfile> {
        vec![BleProfile::nano_x(), BleProfile::stax(), BleProfile::flex()]
    }

    pub fn service_uuids(profiles: &[BleProfile]) -> Vec<Uuid> {
        profiles.iter().map(|profile| profile.service_uuid).collect()
    }

    pub fn matching<'a>(profiles: &'a [BleProfile], services: &[Uuid]) -> Option<&'a BleProfile> {
        profiles.iter().find(|profile| profile.matches(services))
    }
}

#[derive(Debug, Error)]
pub enum BleError {
    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
    #[error("no BLE adapter available")]
    AdapterUnavailable,
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(String),
    #[error("peripheral {0} is not connected")]
    NotConnected(String),
    #[error("required characteristic {kind} not found for profile {profile}")]
    MissingCharacteristic {
        kind: &'static str,
        profile: &'static str,
    },
    #[error("platform event channel closed")]
    EventChannelClosed,
}

impl BleError {
    pub fn missing(kind: &'static str, profile: BleProfile) -> Self {
        Self::MissingCharacteristic {
            kind,
            profile: profile.id,
        }
    }
}

/// Shortens a peripheral identifier to its last six characters for logs.
pub fn redact_device_id(device_id: &str) -> String {
    let chars: Vec<char> = device_id.chars().collect();
    if chars.is_empty() {
        return "<redacted>".to_string();
    }
    let start = chars.len().saturating_sub(6);
    format!("...{}", chars[start..].iter().collect::<String>())
}
