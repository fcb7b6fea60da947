//! GATT Server Module
//!
//! Peripheral-role half: serves the Remote LED profile, owns the set of
//! subscribed peers and pushes toggle changes to them.

use crate::domain::models::{LinkState, PeerAddress};
use crate::error::SyncError;
use crate::infrastructure::bluetooth::profile::{encode_toggle, ServiceProfile};
use crate::infrastructure::bluetooth::radio::{GattStatus, RadioHandle};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct GattServerSession {
    radio: RadioHandle,
    profile: ServiceProfile,
    open: bool,
    // A peer is present iff its latest connection event was "connected".
    subscribers: BTreeSet<PeerAddress>,
}

impl GattServerSession {
    pub fn new(radio: RadioHandle, profile: ServiceProfile) -> Self {
        Self {
            radio,
            profile,
            open: false,
            subscribers: BTreeSet::new(),
        }
    }

    /// Register the profile with the stack. No-op when already open.
    pub fn open(&mut self) -> Result<(), SyncError> {
        if self.open {
            return Ok(());
        }
        if let Err(e) = self.radio.open_server(&self.profile) {
            warn!("Unable to create GATT server: {}", e);
            return Err(e.into());
        }
        info!("GATT server open");
        self.open = true;
        Ok(())
    }

    /// Shut the server down and forget every subscriber. Safe to repeat.
    pub fn close(&mut self) {
        if self.open {
            info!("Closing GATT server");
            self.radio.close_server();
        }
        self.open = false;
        self.subscribers.clear();
    }

    /// Membership follows connection state: added on connect, removed on
    /// disconnect. Returns whether the set changed.
    pub fn on_connection_state_change(&mut self, peer: &PeerAddress, state: LinkState) -> bool {
        match state {
            LinkState::Connected => {
                info!("Peer connected: {}", peer);
                self.subscribers.insert(peer.clone())
            }
            LinkState::Disconnected => {
                info!("Peer disconnected: {}", peer);
                self.subscribers.remove(peer)
            }
        }
    }

    /// Reads of the LED characteristic succeed with an empty payload; state
    /// travels by notification only.
    pub fn on_characteristic_read_request(
        &self,
        peer: &PeerAddress,
        request_id: u32,
        characteristic: Uuid,
    ) -> GattStatus {
        let status = if self.profile.is_led_characteristic(characteristic) {
            debug!("Read data from {}", peer);
            GattStatus::Success
        } else {
            warn!("Invalid characteristic read from {}: {}", peer, characteristic);
            GattStatus::AttributeNotFound
        };
        self.radio.send_response(peer, request_id, status, &[]);
        status
    }

    /// The profile has no meaningful descriptors.
    pub fn on_descriptor_read_request(
        &self,
        peer: &PeerAddress,
        request_id: u32,
        descriptor: Uuid,
    ) -> GattStatus {
        debug!("Rejecting descriptor read {} from {}", descriptor, peer);
        self.radio
            .send_response(peer, request_id, GattStatus::AttributeNotFound, &[]);
        GattStatus::AttributeNotFound
    }

    /// Rejected too; the response is skipped when the requester wants none.
    pub fn on_descriptor_write_request(
        &self,
        peer: &PeerAddress,
        request_id: u32,
        descriptor: Uuid,
        response_needed: bool,
    ) -> Option<GattStatus> {
        debug!("Rejecting descriptor write {} from {}", descriptor, peer);
        if !response_needed {
            return None;
        }
        self.radio
            .send_response(peer, request_id, GattStatus::AttributeNotFound, &[]);
        Some(GattStatus::AttributeNotFound)
    }

    /// Push `value` to every subscriber, fire-and-forget. Returns how many
    /// notifications were handed to the stack.
    pub fn notify_all(&self, value: bool) -> usize {
        self.notify_except(value, None)
    }

    /// Like [`notify_all`](Self::notify_all) but skips `source`, the peer a
    /// relayed value came from.
    pub fn notify_except(&self, value: bool, source: Option<&PeerAddress>) -> usize {
        let targets: Vec<PeerAddress> = self
            .snapshot_for_notify()
            .into_iter()
            .filter(|peer| Some(peer) != source)
            .collect();
        if targets.is_empty() {
            info!("No subscribers to notify");
            return 0;
        }

        info!("Sending update to {} subscribers", targets.len());
        let payload = encode_toggle(value);
        let mut sent = 0;
        for peer in targets {
            match self
                .radio
                .notify(&peer, self.profile.characteristic_uuid, &payload)
            {
                Ok(()) => sent += 1,
                Err(e) => warn!("Notify to {} failed: {}", peer, e),
            }
        }
        sent
    }

    pub fn snapshot_for_notify(&self) -> Vec<PeerAddress> {
        self.subscribers.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_subscribed(&self, peer: &PeerAddress) -> bool {
        self.subscribers.contains(peer)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::infrastructure::bluetooth::profile::{build_service, REMOTE_LED_DATA};
    use crate::infrastructure::bluetooth::radio::testing::{Call, RecordingRadio};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn server(radio: &Arc<RecordingRadio>) -> GattServerSession {
        let mut server = GattServerSession::new(radio.clone(), build_service());
        server.open().unwrap();
        radio.take_calls();
        server
    }

    #[test]
    fn test_connect_then_disconnect() {
        let radio = RecordingRadio::new();
        let mut server = server(&radio);
        let x = PeerAddress::new("X");

        assert!(server.on_connection_state_change(&x, LinkState::Connected));
        assert!(server.is_subscribed(&x));

        assert!(server.on_connection_state_change(&x, LinkState::Disconnected));
        assert_eq!(server.subscriber_count(), 0);

        assert!(!server.on_connection_state_change(&x, LinkState::Disconnected));
    }

    #[test]
    fn test_notify_all_empty_is_noop() {
        let radio = RecordingRadio::new();
        let server = server(&radio);
        assert_eq!(server.notify_all(true), 0);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_notify_all_sends_literal_payload() {
        let radio = RecordingRadio::new();
        let mut server = server(&radio);
        server.on_connection_state_change(&PeerAddress::new("B"), LinkState::Connected);
        server.on_connection_state_change(&PeerAddress::new("A"), LinkState::Connected);

        assert_eq!(server.notify_all(true), 2);
        assert_eq!(
            radio.calls(),
            vec![
                Call::Notify {
                    peer: PeerAddress::new("A"),
                    characteristic: REMOTE_LED_DATA,
                    value: b"true".to_vec(),
                },
                Call::Notify {
                    peer: PeerAddress::new("B"),
                    characteristic: REMOTE_LED_DATA,
                    value: b"true".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_notify_except_skips_source() {
        let radio = RecordingRadio::new();
        let mut server = server(&radio);
        let a = PeerAddress::new("A");
        server.on_connection_state_change(&a, LinkState::Connected);
        server.on_connection_state_change(&PeerAddress::new("B"), LinkState::Connected);

        assert_eq!(server.notify_except(false, Some(&a)), 1);
        assert_eq!(
            radio.calls(),
            vec![Call::Notify {
                peer: PeerAddress::new("B"),
                characteristic: REMOTE_LED_DATA,
                value: b"false".to_vec(),
            }]
        );

        radio.take_calls();
        server.on_connection_state_change(&PeerAddress::new("B"), LinkState::Disconnected);
        assert_eq!(server.notify_except(true, Some(&a)), 0);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_notify_failures_do_not_stop_fanout() {
        let radio = RecordingRadio::new();
        let mut server = server(&radio);
        server.on_connection_state_change(&PeerAddress::new("A"), LinkState::Connected);
        radio.fail_with(Some(RadioError::NotConnected));
        assert_eq!(server.notify_all(false), 0);
        assert_eq!(server.subscriber_count(), 1);
    }

    #[test]
    fn test_read_requests() {
        let radio = RecordingRadio::new();
        let server = server(&radio);
        let peer = PeerAddress::new("A");

        assert_eq!(
            server.on_characteristic_read_request(&peer, 1, REMOTE_LED_DATA),
            GattStatus::Success
        );
        assert_eq!(
            server.on_characteristic_read_request(&peer, 2, Uuid::from_u128(0x2a19)),
            GattStatus::AttributeNotFound
        );
        assert_eq!(
            radio.calls(),
            vec![
                Call::Respond {
                    peer: peer.clone(),
                    request_id: 1,
                    status: GattStatus::Success,
                    value: Vec::new(),
                },
                Call::Respond {
                    peer,
                    request_id: 2,
                    status: GattStatus::AttributeNotFound,
                    value: Vec::new(),
                },
            ]
        );
        assert_eq!(server.subscriber_count(), 0);
    }

    #[test]
    fn test_descriptor_requests_fail() {
        let radio = RecordingRadio::new();
        let server = server(&radio);
        let peer = PeerAddress::new("A");
        let cccd = crate::infrastructure::bluetooth::profile::CLIENT_CHARACTERISTIC_CONFIG;

        assert_eq!(
            server.on_descriptor_read_request(&peer, 3, cccd),
            GattStatus::AttributeNotFound
        );
        assert_eq!(server.on_descriptor_write_request(&peer, 4, cccd, false), None);
        assert_eq!(
            server.on_descriptor_write_request(&peer, 5, cccd, true),
            Some(GattStatus::AttributeNotFound)
        );
        assert_eq!(radio.calls().len(), 2);
    }

    #[test]
    fn test_close_clears_subscribers() {
        let radio = RecordingRadio::new();
        let mut server = server(&radio);
        server.on_connection_state_change(&PeerAddress::new("A"), LinkState::Connected);
        server.close();
        server.close();
        assert_eq!(server.subscriber_count(), 0);
        assert_eq!(radio.calls(), vec![Call::CloseServer]);
    }

    proptest! {
        #[test]
        fn prop_subscribers_match_latest_event(
            events in proptest::collection::vec((0u8..5, any::<bool>()), 0..64)
        ) {
            let radio = RecordingRadio::new();
            let mut server = GattServerSession::new(radio, build_service());
            let mut latest: HashMap<u8, bool> = HashMap::new();

            for (peer, connected) in &events {
                let state = if *connected { LinkState::Connected } else { LinkState::Disconnected };
                server.on_connection_state_change(&PeerAddress::new(format!("peer-{}", peer)), state);
                latest.insert(*peer, *connected);
            }

            let mut expected: Vec<PeerAddress> = latest
                .into_iter()
                .filter(|(_, connected)| *connected)
                .map(|(peer, _)| PeerAddress::new(format!("peer-{}", peer)))
                .collect();
            expected.sort();
            prop_assert_eq!(server.snapshot_for_notify(), expected);
        }
    }
}
