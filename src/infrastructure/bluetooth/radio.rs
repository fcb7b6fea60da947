//! Radio Port
//!
//! The seam between the session layer and a concrete BLE stack. Calls only
//! initiate work; completions come back as [`RadioEvent`]s on the channel
//! the backend was built with, so every outcome is handled on the
//! coordinator's single event stream.

use crate::domain::models::{LinkState, PeerAddress};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::profile::{CharacteristicProperties, ServiceProfile};
use std::sync::Arc;
use uuid::Uuid;

/// Advertising payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: String,
    pub include_tx_power: bool,
    pub connectable: bool,
    pub service_uuids: Vec<Uuid>,
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementReport {
    pub name: Option<String>,
    pub address: PeerAddress,
    pub rssi: Option<i16>,
}

/// Locates a characteristic on a remote GATT server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    /// The services a GATT server built from `profile` exposes.
    pub fn from_profile(profile: &ServiceProfile) -> Self {
        Self {
            uuid: profile.service_uuid,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: profile.characteristic_uuid,
                properties: profile.properties,
            }],
        }
    }
}

/// Status carried in a response to an inbound ATT request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    AttributeNotFound,
}

impl GattStatus {
    /// ATT error code (0 for success)
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::AttributeNotFound => 0x0A,
        }
    }
}

/// Everything a backend reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    // Advertiser
    AdvertisingStarted,
    AdvertisingFailed { reason: String },

    // Scanner
    AdvertisementReceived(AdvertisementReport),

    // Central role
    Connected { address: PeerAddress },
    ConnectFailed { address: PeerAddress, reason: String },
    Disconnected { address: PeerAddress },
    ServicesDiscovered {
        address: PeerAddress,
        services: Vec<DiscoveredService>,
    },
    ReadCompleted {
        address: PeerAddress,
        characteristic: Uuid,
        result: Result<Vec<u8>, RadioError>,
    },
    ValueChanged {
        address: PeerAddress,
        characteristic: Uuid,
        value: Vec<u8>,
    },

    // Peripheral role
    PeerConnectionChanged { peer: PeerAddress, state: LinkState },
    CharacteristicReadRequest {
        peer: PeerAddress,
        request_id: u32,
        characteristic: Uuid,
        offset: u32,
    },
    DescriptorReadRequest {
        peer: PeerAddress,
        request_id: u32,
        descriptor: Uuid,
    },
    DescriptorWriteRequest {
        peer: PeerAddress,
        request_id: u32,
        descriptor: Uuid,
        response_needed: bool,
        value: Vec<u8>,
    },
}

/// A BLE stack able to play both roles at once.
pub trait Radio: Send + Sync {
    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError>;
    fn stop_advertising(&self);

    fn open_server(&self, profile: &ServiceProfile) -> Result<(), RadioError>;
    fn close_server(&self);

    fn start_scan(&self) -> Result<(), RadioError>;
    fn stop_scan(&self);

    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError>;
    fn disconnect(&self, address: &PeerAddress);
    fn discover_services(&self, address: &PeerAddress) -> Result<(), RadioError>;
    /// Enable notifications (writes the remote CCCD).
    fn subscribe(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError>;
    fn read_characteristic(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError>;

    fn send_response(&self, peer: &PeerAddress, request_id: u32, status: GattStatus, value: &[u8]);
    /// Push a characteristic value to one connected peer, unacknowledged.
    fn notify(&self, peer: &PeerAddress, characteristic: Uuid, value: &[u8])
        -> Result<(), RadioError>;
}

pub type RadioHandle = Arc<dyn Radio>;
