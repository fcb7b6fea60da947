//! Remote LED Profile
//!
//! Identity of the custom GATT service both roles agree on, and the wire
//! format of its single characteristic.

use std::ops::BitOr;
use uuid::Uuid;

/// Remote LED Service UUID (16-bit 0x1805 on the Bluetooth base UUID)
pub const REMOTE_LED_SERVICE: Uuid = Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb);

/// Remote LED Data Characteristic UUID (16-bit 0x2A2B)
pub const REMOTE_LED_DATA: Uuid = Uuid::from_u128(0x00002a2b_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// GATT characteristic property bits (Bluetooth Core Vol 3, Part G, 3.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Attribute permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicPermissions(u8);

impl CharacteristicPermissions {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x10);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Static description of the Remote LED service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub permissions: CharacteristicPermissions,
    pub properties: CharacteristicProperties,
}

impl ServiceProfile {
    pub fn is_led_characteristic(&self, uuid: Uuid) -> bool {
        uuid == self.characteristic_uuid
    }
}

/// The profile both roles serve and look for. Read-only characteristic
/// supporting notifications.
pub fn build_service() -> ServiceProfile {
    ServiceProfile {
        service_uuid: REMOTE_LED_SERVICE,
        characteristic_uuid: REMOTE_LED_DATA,
        permissions: CharacteristicPermissions::READ,
        properties: CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
    }
}

/// Notification payload for a toggle value: the literal text `true`/`false`.
pub fn encode_toggle(value: bool) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode a notification or read payload.
///
/// Matching is on the case-sensitive substrings `false` and `true`, with
/// `false` checked first. Anything else (including invalid UTF-8 and the
/// empty read placeholder) carries no value.
pub fn decode_toggle(payload: &[u8]) -> Option<bool> {
    let text = std::str::from_utf8(payload).ok()?;
    if text.contains("false") {
        Some(false)
    } else if text.contains("true") {
        Some(true)
    } else {
        None
    }
}
