//! Loopback Radio
//!
//! In-process stand-in for the air between BLE devices. Every endpoint
//! attached to one [`LoopbackAir`] can advertise, scan, serve and connect
//! to the others; all outcomes are delivered as [`RadioEvent`]s exactly as
//! a real backend would deliver them.

use crate::domain::models::{LinkState, PeerAddress};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::profile::{CharacteristicProperties, ServiceProfile};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, AdvertisementReport, CharacteristicRef, DiscoveredService, GattStatus, Radio,
    RadioEvent,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

const LOOPBACK_RSSI: i16 = -42;

struct Endpoint {
    label: String,
    events: mpsc::UnboundedSender<RadioEvent>,
    powered: bool,
    advertising: Option<Advertisement>,
    scanning: bool,
    server: Option<ServiceProfile>,
    fail_next_advertise: Option<String>,
}

#[derive(Default)]
struct AirState {
    endpoints: BTreeMap<PeerAddress, Endpoint>,
    // (central, peripheral)
    links: BTreeSet<(PeerAddress, PeerAddress)>,
    // (central, peripheral, characteristic)
    subscriptions: BTreeSet<(PeerAddress, PeerAddress, Uuid)>,
    // (peripheral, request id) -> (central, characteristic)
    pending_reads: HashMap<(PeerAddress, u32), (PeerAddress, Uuid)>,
    next_request_id: u32,
}

impl AirState {
    fn emit(&self, to: &PeerAddress, event: RadioEvent) {
        if let Some(endpoint) = self.endpoints.get(to) {
            let _ = endpoint.events.send(event);
        }
    }

    fn powered(&self, address: &PeerAddress) -> Result<&Endpoint, RadioError> {
        match self.endpoints.get(address) {
            Some(endpoint) if endpoint.powered => Ok(endpoint),
            _ => Err(RadioError::AdapterUnavailable),
        }
    }

    fn powered_mut(&mut self, address: &PeerAddress) -> Result<&mut Endpoint, RadioError> {
        match self.endpoints.get_mut(address) {
            Some(endpoint) if endpoint.powered => Ok(endpoint),
            _ => Err(RadioError::AdapterUnavailable),
        }
    }

    fn is_linked(&self, central: &PeerAddress, peripheral: &PeerAddress) -> bool {
        self.links.contains(&(central.clone(), peripheral.clone()))
    }

    fn report_for(address: &PeerAddress, advertisement: &Advertisement) -> AdvertisementReport {
        AdvertisementReport {
            name: Some(advertisement.local_name.clone()),
            address: address.clone(),
            rssi: Some(LOOPBACK_RSSI),
        }
    }

    /// Drop one link and tell whichever side `silent` is not.
    fn drop_link(
        &mut self,
        central: &PeerAddress,
        peripheral: &PeerAddress,
        silent: Option<&PeerAddress>,
    ) -> bool {
        if !self.links.remove(&(central.clone(), peripheral.clone())) {
            return false;
        }
        self.subscriptions
            .retain(|(c, p, _)| !(c == central && p == peripheral));
        self.pending_reads
            .retain(|(p, _), (c, _)| !(*c == *central && *p == *peripheral));

        debug!("Loopback link {} -> {} dropped", central, peripheral);
        if silent != Some(central) {
            self.emit(
                central,
                RadioEvent::Disconnected {
                    address: peripheral.clone(),
                },
            );
        }
        if silent != Some(peripheral) {
            self.emit(
                peripheral,
                RadioEvent::PeerConnectionChanged {
                    peer: central.clone(),
                    state: LinkState::Disconnected,
                },
            );
        }
        true
    }

    fn links_of(&self, address: &PeerAddress) -> Vec<(PeerAddress, PeerAddress)> {
        self.links
            .iter()
            .filter(|(c, p)| c == address || p == address)
            .cloned()
            .collect()
    }
}

/// Shared simulated medium. Cheap to clone.
#[derive(Clone, Default)]
pub struct LoopbackAir {
    state: Arc<Mutex<AirState>>,
}

impl LoopbackAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a powered endpoint at `address`. Re-attaching an address replaces
    /// the previous endpoint.
    pub fn attach(
        &self,
        label: &str,
        address: impl Into<PeerAddress>,
    ) -> (Arc<LoopbackRadio>, mpsc::UnboundedReceiver<RadioEvent>) {
        let address = address.into();
        let (tx, rx) = mpsc::unbounded_channel();
        info!("Loopback endpoint '{}' attached at {}", label, address);
        self.lock().endpoints.insert(
            address.clone(),
            Endpoint {
                label: label.to_string(),
                events: tx,
                powered: true,
                advertising: None,
                scanning: false,
                server: None,
                fail_next_advertise: None,
            },
        );
        (
            Arc::new(LoopbackRadio {
                air: self.clone(),
                address,
            }),
            rx,
        )
    }

    /// Switch an endpoint's adapter. Powering off silently drops its own
    /// roles and tears down every link it takes part in; the other side of
    /// each link sees an ordinary disconnect.
    pub fn set_powered(&self, address: &PeerAddress, powered: bool) {
        let mut air = self.lock();
        let Some(endpoint) = air.endpoints.get_mut(address) else {
            return;
        };
        endpoint.powered = powered;
        if powered {
            info!("Loopback '{}' powered on", endpoint.label);
            return;
        }

        info!("Loopback '{}' powered off", endpoint.label);
        endpoint.advertising = None;
        endpoint.scanning = false;
        endpoint.server = None;
        for (central, peripheral) in air.links_of(address) {
            air.drop_link(&central, &peripheral, Some(address));
        }
    }

    /// Simulate link loss between two endpoints, whichever role each plays.
    pub fn sever(&self, a: &PeerAddress, b: &PeerAddress) {
        let mut air = self.lock();
        let dropped = air.drop_link(a, b, None) | air.drop_link(b, a, None);
        if dropped {
            info!("Loopback link between {} and {} severed", a, b);
        }
    }

    /// Deliver a hand-made advertisement to `to` if it is scanning.
    pub fn inject_advertisement(&self, to: &PeerAddress, report: AdvertisementReport) {
        let air = self.lock();
        if air.powered(to).map(|e| e.scanning).unwrap_or(false) {
            air.emit(to, RadioEvent::AdvertisementReceived(report));
        }
    }

    /// Make the next accepted advertising request fail asynchronously.
    pub fn fail_next_advertise(&self, address: &PeerAddress, reason: &str) {
        if let Some(endpoint) = self.lock().endpoints.get_mut(address) {
            endpoint.fail_next_advertise = Some(reason.to_string());
        }
    }

    pub fn is_linked(&self, central: &PeerAddress, peripheral: &PeerAddress) -> bool {
        self.lock().is_linked(central, peripheral)
    }

    pub fn is_subscribed(
        &self,
        central: &PeerAddress,
        peripheral: &PeerAddress,
        characteristic: Uuid,
    ) -> bool {
        self.lock().subscriptions.contains(&(
            central.clone(),
            peripheral.clone(),
            characteristic,
        ))
    }
}

/// One endpoint's view of a [`LoopbackAir`].
pub struct LoopbackRadio {
    air: LoopbackAir,
    address: PeerAddress,
}

impl LoopbackRadio {
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}

impl Radio for LoopbackRadio {
    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        let endpoint = air.powered_mut(&self.address)?;

        if let Some(reason) = endpoint.fail_next_advertise.take() {
            air.emit(&self.address, RadioEvent::AdvertisingFailed { reason });
            return Ok(());
        }
        endpoint.advertising = Some(advertisement.clone());
        air.emit(&self.address, RadioEvent::AdvertisingStarted);

        let report = AirState::report_for(&self.address, advertisement);
        for (address, other) in &air.endpoints {
            if *address != self.address && other.powered && other.scanning {
                let _ = other
                    .events
                    .send(RadioEvent::AdvertisementReceived(report.clone()));
            }
        }
        Ok(())
    }

    fn stop_advertising(&self) {
        if let Some(endpoint) = self.air.lock().endpoints.get_mut(&self.address) {
            endpoint.advertising = None;
        }
    }

    fn open_server(&self, profile: &ServiceProfile) -> Result<(), RadioError> {
        self.air.lock().powered_mut(&self.address)?.server = Some(*profile);
        Ok(())
    }

    fn close_server(&self) {
        let mut air = self.air.lock();
        if let Some(endpoint) = air.endpoints.get_mut(&self.address) {
            endpoint.server = None;
        }
        let inbound: Vec<_> = air
            .links
            .iter()
            .filter(|(_, p)| *p == self.address)
            .cloned()
            .collect();
        for (central, peripheral) in inbound {
            air.drop_link(&central, &peripheral, Some(&self.address));
        }
    }

    fn start_scan(&self) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        air.powered_mut(&self.address)?.scanning = true;

        for (address, other) in &air.endpoints {
            if *address == self.address || !other.powered {
                continue;
            }
            if let Some(advertisement) = &other.advertising {
                air.emit(
                    &self.address,
                    RadioEvent::AdvertisementReceived(AirState::report_for(address, advertisement)),
                );
            }
        }
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(endpoint) = self.air.lock().endpoints.get_mut(&self.address) {
            endpoint.scanning = false;
        }
    }

    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        air.powered(&self.address)?;

        let reachable = air
            .powered(address)
            .map(|e| e.server.is_some())
            .unwrap_or(false);
        if !reachable || *address == self.address {
            air.emit(
                &self.address,
                RadioEvent::ConnectFailed {
                    address: address.clone(),
                    reason: "peer unreachable".to_string(),
                },
            );
            return Ok(());
        }
        if !air.links.insert((self.address.clone(), address.clone())) {
            return Err(RadioError::LinkBusy);
        }

        air.emit(
            &self.address,
            RadioEvent::Connected {
                address: address.clone(),
            },
        );
        air.emit(
            address,
            RadioEvent::PeerConnectionChanged {
                peer: self.address.clone(),
                state: LinkState::Connected,
            },
        );
        Ok(())
    }

    fn disconnect(&self, address: &PeerAddress) {
        self.air.lock().drop_link(&self.address, address, None);
    }

    fn discover_services(&self, address: &PeerAddress) -> Result<(), RadioError> {
        let air = self.air.lock();
        air.powered(&self.address)?;
        if !air.is_linked(&self.address, address) {
            return Err(RadioError::NotConnected);
        }

        let services = air
            .endpoints
            .get(address)
            .and_then(|e| e.server.as_ref())
            .map(|profile| vec![DiscoveredService::from_profile(profile)])
            .unwrap_or_default();
        air.emit(
            &self.address,
            RadioEvent::ServicesDiscovered {
                address: address.clone(),
                services,
            },
        );
        Ok(())
    }

    fn subscribe(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        air.powered(&self.address)?;
        if !air.is_linked(&self.address, address) {
            return Err(RadioError::NotConnected);
        }

        let notifiable = air
            .endpoints
            .get(address)
            .and_then(|e| e.server.as_ref())
            .map(|p| {
                p.service_uuid == characteristic.service
                    && p.is_led_characteristic(characteristic.characteristic)
                    && p.properties.contains(CharacteristicProperties::NOTIFY)
            })
            .unwrap_or(false);
        if !notifiable {
            return Err(RadioError::AttributeNotFound);
        }

        air.subscriptions.insert((
            self.address.clone(),
            address.clone(),
            characteristic.characteristic,
        ));
        Ok(())
    }

    fn read_characteristic(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError> {
        let mut air = self.air.lock();
        air.powered(&self.address)?;
        if !air.is_linked(&self.address, address) {
            return Err(RadioError::NotConnected);
        }

        air.next_request_id = air.next_request_id.wrapping_add(1);
        let request_id = air.next_request_id;
        air.pending_reads.insert(
            (address.clone(), request_id),
            (self.address.clone(), characteristic.characteristic),
        );
        air.emit(
            address,
            RadioEvent::CharacteristicReadRequest {
                peer: self.address.clone(),
                request_id,
                characteristic: characteristic.characteristic,
                offset: 0,
            },
        );
        Ok(())
    }

    fn send_response(&self, peer: &PeerAddress, request_id: u32, status: GattStatus, value: &[u8]) {
        let mut air = self.air.lock();
        let Some((central, characteristic)) =
            air.pending_reads.remove(&(self.address.clone(), request_id))
        else {
            // descriptor requests have no pending read on this side
            debug!("Response {} to {} has no pending read", request_id, peer);
            return;
        };
        if central != *peer || !air.is_linked(&central, &self.address) {
            return;
        }

        let result = match status {
            GattStatus::Success => Ok(value.to_vec()),
            GattStatus::AttributeNotFound => Err(RadioError::AttributeNotFound),
        };
        air.emit(
            &central,
            RadioEvent::ReadCompleted {
                address: self.address.clone(),
                characteristic,
                result,
            },
        );
    }

    fn notify(&self, peer: &PeerAddress, characteristic: Uuid, value: &[u8]) -> Result<(), RadioError> {
        let air = self.air.lock();
        air.powered(&self.address)?;
        if !air.is_linked(peer, &self.address) {
            return Err(RadioError::NotConnected);
        }
        let key = (peer.clone(), self.address.clone(), characteristic);
        if air.subscriptions.contains(&key) {
            air.emit(
                peer,
                RadioEvent::ValueChanged {
                    address: self.address.clone(),
                    characteristic,
                    value: value.to_vec(),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::profile::{build_service, REMOTE_LED_DATA};

    fn drain(rx: &mut mpsc::UnboundedReceiver<RadioEvent>) -> Vec<RadioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn advertisement(name: &str) -> Advertisement {
        Advertisement {
            local_name: name.to_string(),
            include_tx_power: false,
            connectable: true,
            service_uuids: vec![build_service().service_uuid],
        }
    }

    fn led_ref() -> CharacteristicRef {
        let profile = build_service();
        CharacteristicRef {
            service: profile.service_uuid,
            characteristic: profile.characteristic_uuid,
        }
    }

    #[test]
    fn test_advertisement_reaches_scanner_both_ways() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, mut b_rx) = air.attach("b", "B");

        a.start_advertising(&advertisement("light")).unwrap();
        assert_eq!(drain(&mut a_rx), vec![RadioEvent::AdvertisingStarted]);

        b.start_scan().unwrap();
        match &drain(&mut b_rx)[..] {
            [RadioEvent::AdvertisementReceived(report)] => {
                assert_eq!(report.name.as_deref(), Some("light"));
                assert_eq!(report.address, PeerAddress::new("A"));
            }
            other => panic!("unexpected events: {:?}", other),
        }

        a.stop_advertising();
        a.start_advertising(&advertisement("light")).unwrap();
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[test]
    fn test_connect_requires_open_server() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, mut b_rx) = air.attach("b", "B");

        a.connect(&PeerAddress::new("B")).unwrap();
        assert!(matches!(
            &drain(&mut a_rx)[..],
            [RadioEvent::ConnectFailed { .. }]
        ));

        b.open_server(&build_service()).unwrap();
        a.connect(&PeerAddress::new("B")).unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![RadioEvent::Connected {
                address: PeerAddress::new("B")
            }]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![RadioEvent::PeerConnectionChanged {
                peer: PeerAddress::new("A"),
                state: LinkState::Connected,
            }]
        );
    }

    #[test]
    fn test_read_round_trips_through_remote_server() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, mut b_rx) = air.attach("b", "B");
        b.open_server(&build_service()).unwrap();
        a.connect(&PeerAddress::new("B")).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.read_characteristic(&PeerAddress::new("B"), &led_ref()).unwrap();
        let request_id = match &drain(&mut b_rx)[..] {
            [RadioEvent::CharacteristicReadRequest { request_id, .. }] => *request_id,
            other => panic!("unexpected events: {:?}", other),
        };

        b.send_response(&PeerAddress::new("A"), request_id, GattStatus::Success, &[]);
        assert_eq!(
            drain(&mut a_rx),
            vec![RadioEvent::ReadCompleted {
                address: PeerAddress::new("B"),
                characteristic: REMOTE_LED_DATA,
                result: Ok(Vec::new()),
            }]
        );
    }

    #[test]
    fn test_notify_only_reaches_subscribed_central() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, _b_rx) = air.attach("b", "B");
        b.open_server(&build_service()).unwrap();
        a.connect(&PeerAddress::new("B")).unwrap();
        drain(&mut a_rx);

        b.notify(&PeerAddress::new("A"), REMOTE_LED_DATA, b"true").unwrap();
        assert!(drain(&mut a_rx).is_empty());

        a.subscribe(&PeerAddress::new("B"), &led_ref()).unwrap();
        b.notify(&PeerAddress::new("A"), REMOTE_LED_DATA, b"true").unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![RadioEvent::ValueChanged {
                address: PeerAddress::new("B"),
                characteristic: REMOTE_LED_DATA,
                value: b"true".to_vec(),
            }]
        );

        assert_eq!(
            b.notify(&PeerAddress::new("C"), REMOTE_LED_DATA, b"true"),
            Err(RadioError::NotConnected)
        );
    }

    #[test]
    fn test_power_off_drops_links_and_refuses_calls() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, mut b_rx) = air.attach("b", "B");
        b.open_server(&build_service()).unwrap();
        a.connect(&PeerAddress::new("B")).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        air.set_powered(&PeerAddress::new("B"), false);
        assert_eq!(
            drain(&mut a_rx),
            vec![RadioEvent::Disconnected {
                address: PeerAddress::new("B")
            }]
        );
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(b.start_scan(), Err(RadioError::AdapterUnavailable));

        air.set_powered(&PeerAddress::new("B"), true);
        assert!(b.start_scan().is_ok());
    }

    #[test]
    fn test_sever_notifies_both_sides() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        let (b, mut b_rx) = air.attach("b", "B");
        b.open_server(&build_service()).unwrap();
        a.connect(&PeerAddress::new("B")).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        air.sever(&PeerAddress::new("B"), &PeerAddress::new("A"));
        assert!(!air.is_linked(&PeerAddress::new("A"), &PeerAddress::new("B")));
        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(
            drain(&mut b_rx),
            vec![RadioEvent::PeerConnectionChanged {
                peer: PeerAddress::new("A"),
                state: LinkState::Disconnected,
            }]
        );
    }

    #[test]
    fn test_injected_advertise_failure_is_one_shot() {
        let air = LoopbackAir::new();
        let (a, mut a_rx) = air.attach("a", "A");
        air.fail_next_advertise(&PeerAddress::new("A"), "no free sets");

        a.start_advertising(&advertisement("light")).unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![RadioEvent::AdvertisingFailed {
                reason: "no free sets".to_string()
            }]
        );
        a.start_advertising(&advertisement("light")).unwrap();
        assert_eq!(drain(&mut a_rx), vec![RadioEvent::AdvertisingStarted]);
    }
}
