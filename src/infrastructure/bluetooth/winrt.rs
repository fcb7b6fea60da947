//! WinRT Radio
//!
//! [`Radio`] on top of the Windows Bluetooth LE APIs. WinRT completions and
//! callbacks are turned into [`RadioEvent`]s on the channel given to
//! [`WinRtRadio::new`].

use crate::domain::models::{LinkState, PeerAddress};
use crate::error::RadioError;
use crate::infrastructure::bluetooth::profile::{CharacteristicProperties, ServiceProfile};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, AdvertisementReport, CharacteristicRef, DiscoveredCharacteristic,
    DiscoveredService, GattStatus, Radio, RadioEvent,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, GUID};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattLocalCharacteristic, GattLocalCharacteristicParameters, GattProtectionLevel,
    GattReadRequest, GattReadRequestedEventArgs, GattServiceProvider,
    GattServiceProviderAdvertisementStatus, GattServiceProviderAdvertisementStatusChangedEventArgs,
    GattServiceProviderAdvertisingParameters, GattSession, GattSubscribedClient,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothError, BluetoothLEDevice};
use windows::Foundation::{Deferral, TypedEventHandler};
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn from_guid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn format_address(address: u64) -> PeerAddress {
    let bytes = address.to_be_bytes();
    PeerAddress::new(
        bytes[2..]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn parse_address(address: &PeerAddress) -> Result<u64, RadioError> {
    u64::from_str_radix(&address.as_str().replace(':', ""), 16)
        .map_err(|_| RadioError::Backend(format!("not a Bluetooth address: {}", address)))
}

fn backend(err: windows::core::Error) -> RadioError {
    RadioError::Backend(err.message())
}

impl From<windows::core::Error> for RadioError {
    fn from(err: windows::core::Error) -> Self {
        backend(err)
    }
}

fn to_buffer(value: &[u8]) -> windows::core::Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(value)?;
    writer.DetachBuffer()
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; buffer.Length()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn session_peer(session: &GattSession) -> windows::core::Result<PeerAddress> {
    Ok(PeerAddress::new(session.DeviceId()?.Id()?.to_string()))
}

struct RemoteLink {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    characteristics: HashMap<CharacteristicRef, GattCharacteristic>,
}

#[derive(Default)]
struct WinRtState {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    provider: Option<GattServiceProvider>,
    characteristic: Option<GattLocalCharacteristic>,
    // token of the AdvertisementStatusChanged handler on `provider`
    status_token: Option<i64>,
    // bumped by open/close; a provider built for an older value is discarded
    server_generation: u64,
    // advertising requested before the provider was ready
    pending_advertisement: bool,
    server_failure: Option<String>,
    links: HashMap<PeerAddress, RemoteLink>,
    clients: HashMap<PeerAddress, GattSubscribedClient>,
    pending_reads: HashMap<u32, (GattReadRequest, Deferral)>,
    next_request_id: u32,
}

struct Shared {
    events: mpsc::UnboundedSender<RadioEvent>,
    runtime: Handle,
    state: Mutex<WinRtState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WinRtState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }
}

pub struct WinRtRadio {
    shared: Arc<Shared>,
}

impl WinRtRadio {
    /// Must be called from within a tokio runtime.
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                events,
                runtime: Handle::current(),
                state: Mutex::new(WinRtState::default()),
            }),
        })
    }

    fn start_provider_advertising(
        shared: &Arc<Shared>,
        provider: &GattServiceProvider,
    ) -> windows::core::Result<()> {
        let params = GattServiceProviderAdvertisingParameters::new()?;
        params.SetIsConnectable(true)?;
        params.SetIsDiscoverable(true)?;

        if shared.lock().status_token.is_none() {
            let token = Self::watch_advertisement_status(shared, provider)?;
            shared.lock().status_token = Some(token);
        }
        provider.StartAdvertisingWithParameters(&params)
    }

    fn watch_advertisement_status(
        shared: &Arc<Shared>,
        provider: &GattServiceProvider,
    ) -> windows::core::Result<i64> {
        let sender = shared.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattServiceProvider>,
                  args: windows::core::Ref<GattServiceProviderAdvertisementStatusChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    match args.Status()? {
                        GattServiceProviderAdvertisementStatus::Started
                        | GattServiceProviderAdvertisementStatus::StartedWithoutAllAdvertisementData => {
                            sender.emit(RadioEvent::AdvertisingStarted)
                        }
                        GattServiceProviderAdvertisementStatus::Aborted => {
                            sender.emit(RadioEvent::AdvertisingFailed {
                                reason: format!("{:?}", args.Error()?),
                            })
                        }
                        _ => {}
                    }
                }
                Ok(())
            },
        );
        provider.AdvertisementStatusChanged(&handler)
    }

    fn unwatch_advertisement_status(state: &mut WinRtState) {
        if let (Some(provider), Some(token)) = (&state.provider, state.status_token.take()) {
            let _ = provider.RemoveAdvertisementStatusChanged(token);
        }
    }

    /// Record a server that could not be built. A waiting advertising
    /// request fails now; a later one is refused synchronously.
    fn server_unavailable(shared: &Shared, generation: u64, err: RadioError) {
        let pending = {
            let mut state = shared.lock();
            if state.server_generation != generation {
                return;
            }
            state.server_failure = Some(err.to_string());
            std::mem::take(&mut state.pending_advertisement)
        };
        warn!("Unable to create GATT server: {}", err);
        if pending {
            shared.emit(RadioEvent::AdvertisingFailed {
                reason: err.to_string(),
            });
        }
    }

    async fn create_server(
        shared: Arc<Shared>,
        profile: ServiceProfile,
        generation: u64,
    ) -> Result<(), RadioError> {
        let result = GattServiceProvider::CreateAsync(to_guid(profile.service_uuid))?.await?;
        if result.Error()? != BluetoothError::Success {
            return Err(RadioError::AdvertiseUnavailable(format!(
                "service provider unavailable: {:?}",
                result.Error()?
            )));
        }
        let provider = result.ServiceProvider()?;

        let params = GattLocalCharacteristicParameters::new()?;
        params.SetCharacteristicProperties(
            GattCharacteristicProperties::Read | GattCharacteristicProperties::Notify,
        )?;
        params.SetReadProtectionLevel(GattProtectionLevel::Plain)?;
        let created = provider
            .Service()?
            .CreateCharacteristicAsync(to_guid(profile.characteristic_uuid), &params)?
            .await?;
        if created.Error()? != BluetoothError::Success {
            return Err(RadioError::AdvertiseUnavailable(format!(
                "local characteristic not created: {:?}",
                created.Error()?
            )));
        }
        let characteristic = created.Characteristic()?;

        let sender = shared.clone();
        let read_handler = TypedEventHandler::new(
            move |local: windows::core::Ref<GattLocalCharacteristic>,
                  args: windows::core::Ref<GattReadRequestedEventArgs>| {
                let (Some(local), Some(args)) = (local.as_ref(), args.as_ref()) else {
                    return Ok(());
                };
                let deferral = args.GetDeferral()?;
                let peer = session_peer(&args.Session()?)?;
                let uuid = from_guid(local.Uuid()?);
                let request = args.GetRequestAsync()?;

                let sender = sender.clone();
                let runtime = sender.runtime.clone();
                runtime.spawn(async move {
                    let request = match request.await {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("Read request from {} lost: {}", peer, e.message());
                            let _ = deferral.Complete();
                            return;
                        }
                    };
                    let offset = request.Offset().unwrap_or(0);
                    let request_id = {
                        let mut state = sender.lock();
                        state.next_request_id = state.next_request_id.wrapping_add(1);
                        let id = state.next_request_id;
                        state.pending_reads.insert(id, (request, deferral));
                        id
                    };
                    sender.emit(RadioEvent::CharacteristicReadRequest {
                        peer,
                        request_id,
                        characteristic: uuid,
                        offset,
                    });
                });
                Ok(())
            },
        );
        characteristic.ReadRequested(&read_handler)?;

        let sender = shared.clone();
        let clients_handler = TypedEventHandler::new(
            move |local: windows::core::Ref<GattLocalCharacteristic>,
                  _: windows::core::Ref<IInspectable>| {
                let Some(local) = local.as_ref() else {
                    return Ok(());
                };
                let clients = local.SubscribedClients()?;
                let mut current = HashMap::new();
                for i in 0..clients.Size()? {
                    let client = clients.GetAt(i)?;
                    current.insert(session_peer(&client.Session()?)?, client);
                }

                let mut state = sender.lock();
                let before: BTreeSet<PeerAddress> = state.clients.keys().cloned().collect();
                let after: BTreeSet<PeerAddress> = current.keys().cloned().collect();
                state.clients = current;
                drop(state);

                for peer in after.difference(&before) {
                    sender.emit(RadioEvent::PeerConnectionChanged {
                        peer: peer.clone(),
                        state: LinkState::Connected,
                    });
                }
                for peer in before.difference(&after) {
                    sender.emit(RadioEvent::PeerConnectionChanged {
                        peer: peer.clone(),
                        state: LinkState::Disconnected,
                    });
                }
                Ok(())
            },
        );
        characteristic.SubscribedClientsChanged(&clients_handler)?;

        let advertise = {
            let mut state = shared.lock();
            if state.server_generation != generation {
                debug!("Discarding GATT service provider from a closed server");
                return Ok(());
            }
            state.provider = Some(provider.clone());
            state.characteristic = Some(characteristic);
            std::mem::take(&mut state.pending_advertisement)
        };
        info!("GATT service provider ready");
        if advertise {
            if let Err(e) = Self::start_provider_advertising(&shared, &provider) {
                shared.emit(RadioEvent::AdvertisingFailed {
                    reason: e.message(),
                });
            }
        }
        Ok(())
    }

    async fn open_link(shared: Arc<Shared>, address: PeerAddress, raw: u64) {
        let connected = async {
            let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)?.await?;
            let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
                Ok(session) => {
                    session.SetMaintainConnection(true)?;
                    Some(session)
                }
                Err(e) => {
                    warn!("GattSession for {} unavailable: {}", address, e.message());
                    None
                }
            };

            let sender = shared.clone();
            let link_address = address.clone();
            let status_handler =
                TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                    if let Some(dev) = dev.as_ref() {
                        if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                            let known = sender.lock().links.remove(&link_address).is_some();
                            if known {
                                sender.emit(RadioEvent::Disconnected {
                                    address: link_address.clone(),
                                });
                            }
                        }
                    }
                    Ok(())
                });
            device.ConnectionStatusChanged(&status_handler)?;
            windows::core::Result::Ok((device, session))
        }
        .await;

        match connected {
            Ok((device, session)) => {
                shared.lock().links.insert(
                    address.clone(),
                    RemoteLink {
                        device,
                        session,
                        characteristics: HashMap::new(),
                    },
                );
                shared.emit(RadioEvent::Connected { address });
            }
            Err(e) => shared.emit(RadioEvent::ConnectFailed {
                address,
                reason: e.message(),
            }),
        }
    }

    async fn discover(
        device: BluetoothLEDevice,
    ) -> windows::core::Result<Vec<(DiscoveredService, Vec<GattCharacteristic>)>> {
        let services_result = device.GetGattServicesAsync()?.await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            warn!("Failed to get GATT services: {:?}", services_result.Status()?);
            return Ok(Vec::new());
        }

        let services = services_result.Services()?;
        let mut discovered = Vec::new();
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                continue;
            }
            let characteristics = chars_result.Characteristics()?;
            let mut described = Vec::new();
            let mut handles = Vec::new();
            for j in 0..characteristics.Size()? {
                let c = characteristics.GetAt(j)?;
                described.push(DiscoveredCharacteristic {
                    uuid: from_guid(c.Uuid()?),
                    properties: CharacteristicProperties::from_bits(
                        c.CharacteristicProperties()?.0 as u8,
                    ),
                });
                handles.push(c);
            }
            discovered.push((
                DiscoveredService {
                    uuid: from_guid(service.Uuid()?),
                    characteristics: described,
                },
                handles,
            ));
        }
        Ok(discovered)
    }

    fn characteristic(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<GattCharacteristic, RadioError> {
        let state = self.shared.lock();
        let link = state.links.get(address).ok_or(RadioError::NotConnected)?;
        link.characteristics
            .get(characteristic)
            .cloned()
            .ok_or(RadioError::AttributeNotFound)
    }
}

impl Radio for WinRtRadio {
    fn start_advertising(&self, advertisement: &Advertisement) -> Result<(), RadioError> {
        // the provider advertises under the system's device name
        debug!(
            "Advertising requested as '{}' (system name is used)",
            advertisement.local_name
        );
        let provider = {
            let mut state = self.shared.lock();
            if let Some(reason) = &state.server_failure {
                return Err(RadioError::AdvertiseUnavailable(reason.clone()));
            }
            match state.provider.clone() {
                Some(provider) => provider,
                None => {
                    state.pending_advertisement = true;
                    return Ok(());
                }
            }
        };
        Self::start_provider_advertising(&self.shared, &provider)
            .map_err(|e| RadioError::AdvertiseUnavailable(e.message()))
    }

    fn stop_advertising(&self) {
        let mut state = self.shared.lock();
        state.pending_advertisement = false;
        if let Some(provider) = &state.provider {
            let _ = provider.StopAdvertising();
        }
        Self::unwatch_advertisement_status(&mut state);
    }

    fn open_server(&self, profile: &ServiceProfile) -> Result<(), RadioError> {
        let generation = {
            let mut state = self.shared.lock();
            state.server_generation += 1;
            state.server_failure = None;
            state.server_generation
        };
        let shared = self.shared.clone();
        let profile = *profile;
        self.shared.runtime.spawn(async move {
            if let Err(e) = Self::create_server(shared.clone(), profile, generation).await {
                Self::server_unavailable(&shared, generation, e);
            }
        });
        Ok(())
    }

    fn close_server(&self) {
        let mut state = self.shared.lock();
        state.server_generation += 1;
        state.server_failure = None;
        Self::unwatch_advertisement_status(&mut state);
        if let Some(provider) = state.provider.take() {
            let _ = provider.StopAdvertising();
        }
        state.characteristic = None;
        state.clients.clear();
        state.pending_advertisement = false;
        for (_, (request, deferral)) in state.pending_reads.drain() {
            let _ = request.RespondWithProtocolError(GattStatus::AttributeNotFound.code());
            let _ = deferral.Complete();
        }
    }

    fn start_scan(&self) -> Result<(), RadioError> {
        self.stop_scan();

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(backend)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(backend)?;

        let sender = self.shared.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    sender.emit(RadioEvent::AdvertisementReceived(AdvertisementReport {
                        name: (!name.is_empty()).then_some(name),
                        address: format_address(args.BluetoothAddress()?),
                        rssi: args.RawSignalStrengthInDBm().ok(),
                    }));
                }
                Ok(())
            },
        );
        watcher.Received(&handler).map_err(backend)?;
        watcher.Start().map_err(|_| RadioError::AdapterUnavailable)?;
        self.shared.lock().watcher = Some(watcher);
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(watcher) = self.shared.lock().watcher.take() {
            let _ = watcher.Stop();
        }
    }

    fn connect(&self, address: &PeerAddress) -> Result<(), RadioError> {
        let raw = parse_address(address)?;
        if self.shared.lock().links.contains_key(address) {
            return Err(RadioError::LinkBusy);
        }
        self.shared
            .runtime
            .spawn(Self::open_link(self.shared.clone(), address.clone(), raw));
        Ok(())
    }

    fn disconnect(&self, address: &PeerAddress) {
        if let Some(link) = self.shared.lock().links.remove(address) {
            if let Some(session) = link.session {
                let _ = session.Close();
            }
            let _ = link.device.Close();
        }
    }

    fn discover_services(&self, address: &PeerAddress) -> Result<(), RadioError> {
        let device = self
            .shared
            .lock()
            .links
            .get(address)
            .map(|link| link.device.clone())
            .ok_or(RadioError::NotConnected)?;

        let shared = self.shared.clone();
        let address = address.clone();
        self.shared.runtime.spawn(async move {
            let discovered = Self::discover(device).await.unwrap_or_else(|e| {
                warn!("Service discovery on {} failed: {}", address, e.message());
                Vec::new()
            });

            let mut services = Vec::new();
            {
                let mut state = shared.lock();
                let Some(link) = state.links.get_mut(&address) else {
                    return;
                };
                for (service, handles) in discovered {
                    for (described, handle) in service.characteristics.iter().zip(handles) {
                        link.characteristics.insert(
                            CharacteristicRef {
                                service: service.uuid,
                                characteristic: described.uuid,
                            },
                            handle,
                        );
                    }
                    services.push(service);
                }
            }
            shared.emit(RadioEvent::ServicesDiscovered { address, services });
        });
        Ok(())
    }

    fn subscribe(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError> {
        let handle = self.characteristic(address, characteristic)?;

        let sender = self.shared.clone();
        let link_address = address.clone();
        let value_handler = TypedEventHandler::new(
            move |c: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let (Some(c), Some(args)) = (c.as_ref(), args.as_ref()) {
                    sender.emit(RadioEvent::ValueChanged {
                        address: link_address.clone(),
                        characteristic: from_guid(c.Uuid()?),
                        value: read_buffer(&args.CharacteristicValue()?)?,
                    });
                }
                Ok(())
            },
        );
        handle.ValueChanged(&value_handler).map_err(backend)?;

        let address = address.clone();
        self.shared.runtime.spawn(async move {
            let written = async {
                handle
                    .WriteClientCharacteristicConfigurationDescriptorAsync(
                        GattClientCharacteristicConfigurationDescriptorValue::Notify,
                    )?
                    .await
            }
            .await;
            match written {
                Ok(GattCommunicationStatus::Success) => info!("Notifications enabled on {}", address),
                Ok(status) => warn!("Notification subscription on {} returned {:?}", address, status),
                Err(e) => warn!("Notification subscription on {} failed: {}", address, e.message()),
            }
        });
        Ok(())
    }

    fn read_characteristic(
        &self,
        address: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Result<(), RadioError> {
        let handle = self.characteristic(address, characteristic)?;

        let shared = self.shared.clone();
        let address = address.clone();
        let uuid = characteristic.characteristic;
        self.shared.runtime.spawn(async move {
            let read = async {
                let result = handle.ReadValueAsync()?.await?;
                if result.Status()? != GattCommunicationStatus::Success {
                    return Ok(Err(RadioError::Backend(format!(
                        "read returned {:?}",
                        result.Status()?
                    ))));
                }
                windows::core::Result::Ok(Ok(read_buffer(&result.Value()?)?))
            }
            .await;
            shared.emit(RadioEvent::ReadCompleted {
                address,
                characteristic: uuid,
                result: read.unwrap_or_else(|e| Err(backend(e))),
            });
        });
        Ok(())
    }

    fn send_response(&self, peer: &PeerAddress, request_id: u32, status: GattStatus, value: &[u8]) {
        let Some((request, deferral)) = self.shared.lock().pending_reads.remove(&request_id) else {
            debug!("Response {} to {} has no pending request", request_id, peer);
            return;
        };
        let responded = match status {
            GattStatus::Success => to_buffer(value).and_then(|buffer| request.RespondWithValue(&buffer)),
            GattStatus::AttributeNotFound => request.RespondWithProtocolError(status.code()),
        };
        if let Err(e) = responded {
            warn!("Response to {} failed: {}", peer, e.message());
        }
        let _ = deferral.Complete();
    }

    fn notify(&self, peer: &PeerAddress, characteristic: Uuid, value: &[u8]) -> Result<(), RadioError> {
        let (local, client) = {
            let state = self.shared.lock();
            let local = state
                .characteristic
                .clone()
                .ok_or(RadioError::AttributeNotFound)?;
            let client = state
                .clients
                .get(peer)
                .cloned()
                .ok_or(RadioError::NotConnected)?;
            (local, client)
        };
        if from_guid(local.Uuid().map_err(backend)?) != characteristic {
            return Err(RadioError::AttributeNotFound);
        }

        let buffer = to_buffer(value).map_err(backend)?;
        let operation = local
            .NotifyValueForSubscribedClientAsync(&buffer, &client)
            .map_err(backend)?;
        let peer = peer.clone();
        self.shared.runtime.spawn(async move {
            if let Err(e) = operation.await {
                debug!("Notification to {} not delivered: {}", peer, e.message());
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address = format_address(0x0000_A1B2_C3D4_E5F6);
        assert_eq!(address.as_str(), "A1:B2:C3:D4:E5:F6");
        assert_eq!(parse_address(&address).unwrap(), 0x0000_A1B2_C3D4_E5F6);
    }

    fn advertisement() -> Advertisement {
        let profile = crate::infrastructure::bluetooth::profile::build_service();
        Advertisement {
            local_name: "things".to_string(),
            include_tx_power: true,
            connectable: true,
            service_uuids: vec![profile.service_uuid],
        }
    }

    #[tokio::test]
    async fn test_server_failure_fails_waiting_advertisement() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let radio = WinRtRadio::new(tx);
        {
            let mut state = radio.shared.lock();
            state.server_generation = 3;
            state.pending_advertisement = true;
        }

        WinRtRadio::server_unavailable(
            &radio.shared,
            3,
            RadioError::AdvertiseUnavailable("no provider".into()),
        );

        assert!(matches!(
            rx.try_recv(),
            Ok(RadioEvent::AdvertisingFailed { reason }) if reason.contains("no provider")
        ));
        assert!(!radio.shared.lock().pending_advertisement);
        assert!(matches!(
            radio.start_advertising(&advertisement()),
            Err(RadioError::AdvertiseUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_of_closed_server_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let radio = WinRtRadio::new(tx);
        {
            let mut state = radio.shared.lock();
            state.server_generation = 2;
            state.pending_advertisement = true;
        }

        WinRtRadio::server_unavailable(&radio.shared, 1, RadioError::AdapterUnavailable);

        assert!(rx.try_recv().is_err());
        assert!(radio.shared.lock().pending_advertisement);
        assert!(radio.shared.lock().server_failure.is_none());
    }

    #[test]
    fn test_guid_conversion() {
        let profile = crate::infrastructure::bluetooth::profile::build_service();
        assert_eq!(from_guid(to_guid(profile.service_uuid)), profile.service_uuid);
    }
}
