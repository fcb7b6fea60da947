//! BLE Connection Module
//!
//! Central-role session with one discovered peer: connect, discover the
//! Remote LED service, subscribe, and decode the values it pushes.

use crate::domain::models::{ConnectionState, PeerAddress, PeerDescriptor};
use crate::error::{RadioError, SyncError};
use crate::infrastructure::bluetooth::profile::{
    decode_toggle, CharacteristicProperties, ServiceProfile,
};
use crate::infrastructure::bluetooth::radio::{CharacteristicRef, DiscoveredService, RadioHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ConnectionSession {
    radio: RadioHandle,
    profile: ServiceProfile,
    peer: PeerDescriptor,
    state: ConnectionState,
    characteristic: Option<CharacteristicRef>,
}

impl ConnectionSession {
    pub fn new(radio: RadioHandle, profile: ServiceProfile, peer: PeerDescriptor) -> Self {
        Self {
            radio,
            profile,
            peer,
            state: ConnectionState::Idle,
            characteristic: None,
        }
    }

    /// Open the central-role link. `idle -> connecting`.
    pub fn connect(&mut self) -> Result<(), SyncError> {
        if self.state != ConnectionState::Idle {
            debug!("Connect ignored in state {:?}", self.state);
            return Ok(());
        }

        info!("Connecting to '{}' at {}", self.peer.name, self.peer.address);
        self.state = ConnectionState::Connecting;
        if let Err(e) = self.radio.connect(&self.peer.address) {
            self.release();
            return Err(SyncError::ConnectFailed {
                address: self.peer.address.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Link is up. `connecting -> connected`, then service discovery.
    pub fn on_connected(&mut self) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connecting {
            return Ok(());
        }

        info!("Connected to {}", self.peer.address);
        self.state = ConnectionState::Connected;
        if let Err(e) = self.radio.discover_services(&self.peer.address) {
            warn!("Service discovery on {} not started: {}", self.peer.address, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Locate the Remote LED characteristic, subscribe, and read once to
    /// resynchronize. A peer without the service or the characteristic does
    /// not implement the profile.
    pub fn on_services_discovered(
        &mut self,
        services: &[DiscoveredService],
    ) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }

        let service = services
            .iter()
            .find(|s| s.uuid == self.profile.service_uuid)
            .ok_or_else(|| SyncError::ServiceNotFound(self.peer.address.clone()))?;
        info!("Found remote LED service on {}", self.peer.address);

        let characteristic = service
            .characteristics
            .iter()
            .find(|c| c.uuid == self.profile.characteristic_uuid)
            .ok_or_else(|| SyncError::ServiceNotFound(self.peer.address.clone()))?;

        let target = CharacteristicRef {
            service: service.uuid,
            characteristic: characteristic.uuid,
        };
        self.characteristic = Some(target);

        let properties = characteristic.properties;
        if properties.contains(CharacteristicProperties::NOTIFY) {
            self.log_request_failure("subscribe", self.radio.subscribe(&self.peer.address, &target));
        }
        if properties.contains(CharacteristicProperties::READ) {
            self.log_request_failure(
                "read",
                self.radio.read_characteristic(&self.peer.address, &target),
            );
        }
        Ok(())
    }

    /// Notification delivered on the held characteristic.
    pub fn on_value_changed(&self, characteristic: Uuid, value: &[u8]) -> Option<bool> {
        if !self.holds(characteristic) {
            return None;
        }
        let decoded = decode_toggle(value);
        if decoded.is_none() {
            debug!("Ignoring payload without a toggle value: {:?}", value);
        }
        decoded
    }

    /// Completion of the resynchronizing read.
    pub fn on_read_completed(
        &self,
        characteristic: Uuid,
        result: &Result<Vec<u8>, RadioError>,
    ) -> Option<bool> {
        if !self.holds(characteristic) {
            return None;
        }
        match result {
            Ok(value) => decode_toggle(value),
            Err(e) => {
                warn!("Read from {} failed: {}", self.peer.address, e);
                None
            }
        }
    }

    /// Link went down, locally or remotely. Not reconnected automatically.
    pub fn on_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from {}", self.peer.address);
        }
        self.release();
    }

    /// Tear down from our side.
    pub fn disconnect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            self.radio.disconnect(&self.peer.address);
        }
        self.release();
    }

    /// Drop the session without radio traffic (adapter is gone).
    pub fn invalidate(&mut self) {
        self.release();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> &PeerAddress {
        &self.peer.address
    }

    pub fn is_subscribed(&self) -> bool {
        self.characteristic.is_some()
    }

    fn holds(&self, characteristic: Uuid) -> bool {
        self.state == ConnectionState::Connected
            && self
                .characteristic
                .map(|c| c.characteristic == characteristic)
                .unwrap_or(false)
    }

    fn release(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.characteristic = None;
    }

    // link-busy, not-connected and attribute-not-found are all recoverable
    fn log_request_failure(&self, what: &str, result: Result<(), RadioError>) {
        if let Err(e) = result {
            warn!("GATT {} on {} failed: {}", what, self.peer.address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::profile::{build_service, encode_toggle};
    use crate::infrastructure::bluetooth::radio::testing::{Call, RecordingRadio};
    use crate::infrastructure::bluetooth::radio::DiscoveredCharacteristic;
    use std::time::Instant;

    fn peer() -> PeerDescriptor {
        PeerDescriptor {
            name: "Pixel 2".to_string(),
            address: PeerAddress::new("11:22"),
            last_seen: Instant::now(),
        }
    }

    fn connected_session(radio: &std::sync::Arc<RecordingRadio>) -> ConnectionSession {
        let mut session = ConnectionSession::new(radio.clone(), build_service(), peer());
        session.connect().unwrap();
        session.on_connected().unwrap();
        session
    }

    #[test]
    fn test_connect_walks_states() {
        let radio = RecordingRadio::new();
        let mut session = ConnectionSession::new(radio.clone(), build_service(), peer());
        assert_eq!(session.state(), ConnectionState::Idle);

        session.connect().unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.on_connected().unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(
            radio.calls(),
            vec![
                Call::Connect(PeerAddress::new("11:22")),
                Call::DiscoverServices(PeerAddress::new("11:22")),
            ]
        );
    }

    #[test]
    fn test_discovery_subscribes_and_reads() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);
        radio.take_calls();

        let profile = build_service();
        session
            .on_services_discovered(&[DiscoveredService::from_profile(&profile)])
            .unwrap();

        let target = CharacteristicRef {
            service: profile.service_uuid,
            characteristic: profile.characteristic_uuid,
        };
        assert_eq!(
            radio.calls(),
            vec![
                Call::Subscribe(PeerAddress::new("11:22"), target),
                Call::Read(PeerAddress::new("11:22"), target),
            ]
        );
        assert!(session.is_subscribed());
    }

    #[test]
    fn test_property_bits_gate_requests() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);
        radio.take_calls();

        let profile = build_service();
        let notify_only = DiscoveredService {
            uuid: profile.service_uuid,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: profile.characteristic_uuid,
                properties: CharacteristicProperties::NOTIFY,
            }],
        };
        session.on_services_discovered(&[notify_only]).unwrap();

        let calls = radio.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::Subscribe(..)));
    }

    #[test]
    fn test_missing_service_is_protocol_error() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);

        let other = DiscoveredService {
            uuid: Uuid::from_u128(0x180f),
            characteristics: Vec::new(),
        };
        let err = session.on_services_discovered(&[other]).unwrap_err();
        assert!(matches!(err, SyncError::ServiceNotFound(_)));
    }

    #[test]
    fn test_request_failures_are_recoverable() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);
        radio.fail_with(Some(RadioError::LinkBusy));

        let profile = build_service();
        session
            .on_services_discovered(&[DiscoveredService::from_profile(&profile)])
            .unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_values_decoded_only_on_held_characteristic() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);
        let profile = build_service();

        assert_eq!(
            session.on_value_changed(profile.characteristic_uuid, &encode_toggle(true)),
            None
        );

        session
            .on_services_discovered(&[DiscoveredService::from_profile(&profile)])
            .unwrap();
        assert_eq!(
            session.on_value_changed(profile.characteristic_uuid, &encode_toggle(true)),
            Some(true)
        );
        assert_eq!(
            session.on_value_changed(Uuid::from_u128(0x2a19), &encode_toggle(false)),
            None
        );
        assert_eq!(
            session.on_read_completed(profile.characteristic_uuid, &Ok(Vec::new())),
            None
        );
        assert_eq!(
            session.on_read_completed(
                profile.characteristic_uuid,
                &Err(RadioError::AttributeNotFound)
            ),
            None
        );
    }

    #[test]
    fn test_disconnect_releases_characteristic() {
        let radio = RecordingRadio::new();
        let mut session = connected_session(&radio);
        let profile = build_service();
        session
            .on_services_discovered(&[DiscoveredService::from_profile(&profile)])
            .unwrap();

        session.on_disconnected();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_subscribed());
        assert_eq!(
            session.on_value_changed(profile.characteristic_uuid, b"true"),
            None
        );
    }

    #[test]
    fn test_connect_refused() {
        let radio = RecordingRadio::new();
        radio.fail_with(Some(RadioError::AdapterUnavailable));
        let mut session = ConnectionSession::new(radio, build_service(), peer());

        let err = session.connect().unwrap_err();
        assert!(matches!(err, SyncError::ConnectFailed { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
