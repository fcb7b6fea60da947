//! Session Coordinator
//!
//! Top-level state machine. Owns the advertiser, scanner, GATT server and
//! the (at most one) outbound connection, and applies every radio, adapter
//! and local input event one at a time.

use crate::domain::models::{
    AdapterState, AppEvent, ChangeOrigin, ConnectionState, InputEdge, LinkState, LocalInput,
    MessageSeverity, PeerAddress, StatusMessage, ToggleState,
};
use crate::domain::settings::Settings;
use crate::error::SyncError;
use crate::infrastructure::bluetooth::{
    advertiser::Advertiser,
    connection::ConnectionSession,
    profile::{build_service, ServiceProfile},
    radio::{RadioEvent, RadioHandle},
    scanner::{ScanOutcome, Scanner},
    server::GattServerSession,
};
use crate::infrastructure::hardware::OutputPort;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Names and timing the coordinator needs from [`Settings`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub local_name: String,
    pub peer_name: String,
    pub scan_duration: Duration,
    pub relay_remote_changes: bool,
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            local_name: settings.local_name.clone(),
            peer_name: settings.peer_name.clone(),
            scan_duration: settings.scan_duration(),
            relay_remote_changes: settings.relay_remote_changes,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Adapter(AdapterState),
    Input(LocalInput),
    Radio(RadioEvent),
    ScanTimeout,
}

/// Event sources drained by [`SessionCoordinator::run`].
pub struct CoordinatorChannels {
    pub radio: mpsc::UnboundedReceiver<RadioEvent>,
    pub adapter: mpsc::UnboundedReceiver<AdapterState>,
    pub input: mpsc::UnboundedReceiver<LocalInput>,
}

pub struct SessionCoordinator {
    config: SessionConfig,
    profile: ServiceProfile,
    radio: RadioHandle,
    advertiser: Advertiser,
    scanner: Scanner,
    server: GattServerSession,
    connection: Option<ConnectionSession>,
    toggle: ToggleState,
    adapter: AdapterState,
    output: Box<dyn OutputPort>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        radio: RadioHandle,
        output: Box<dyn OutputPort>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let profile = build_service();
        Self {
            advertiser: Advertiser::new(radio.clone()),
            scanner: Scanner::new(radio.clone()),
            server: GattServerSession::new(radio.clone(), profile),
            connection: None,
            toggle: ToggleState::default(),
            adapter: AdapterState::Disabled,
            config,
            profile,
            radio,
            output,
            event_sender,
        }
    }

    /// Dispatch events until shutdown is requested or both the adapter and
    /// input sources are gone.
    pub async fn run(mut self, mut channels: CoordinatorChannels) {
        let mut adapter_open = true;
        let mut input_open = true;

        loop {
            if !adapter_open && !input_open {
                info!("Adapter and input sources closed");
                break;
            }

            let deadline = self.scanner.deadline();
            let event = tokio::select! {
                Some(event) = channels.radio.recv() => CoordinatorEvent::Radio(event),
                state = channels.adapter.recv(), if adapter_open => match state {
                    Some(state) => CoordinatorEvent::Adapter(state),
                    None => {
                        adapter_open = false;
                        continue;
                    }
                },
                input = channels.input.recv(), if input_open => match input {
                    Some(input) => CoordinatorEvent::Input(input),
                    None => {
                        input_open = false;
                        continue;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() => CoordinatorEvent::ScanTimeout,
                else => break,
            };

            let shutdown = matches!(event, CoordinatorEvent::Input(LocalInput::Shutdown));
            self.handle(event);
            if shutdown {
                break;
            }
        }

        self.shutdown();
    }

    pub fn handle(&mut self, event: CoordinatorEvent) {
        debug!("Handling {:?}", event);
        match event {
            CoordinatorEvent::Adapter(state) => self.on_adapter_state(state),
            CoordinatorEvent::Input(input) => self.on_local_input(input),
            CoordinatorEvent::Radio(event) => self.on_radio_event(event),
            CoordinatorEvent::ScanTimeout => self.on_scan_timeout(),
        }
    }

    /// Stop every role. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.advertiser.stop();
        self.server.close();
        self.scanner.stop();
        if let Some(mut session) = self.connection.take() {
            session.disconnect();
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        self.adapter = state;
        match state {
            AdapterState::Enabled => {
                info!("Bluetooth enabled, starting services");
                self.start_peripheral();
                self.start_scan_cycle();
            }
            AdapterState::Disabled => {
                info!("Bluetooth disabled, stopping services");
                // backends accept these as no-ops once the adapter is gone
                self.server.close();
                self.advertiser.stop();
                self.scanner.stop();
                if let Some(mut session) = self.connection.take() {
                    session.disconnect();
                    self.publish(AppEvent::ConnectionStatus(ConnectionState::Disconnected));
                }
                self.publish(AppEvent::SubscribersChanged(0));
            }
        }
    }

    fn start_peripheral(&mut self) {
        if let Err(e) = self.server.open() {
            self.report(e);
            return;
        }
        let profile = self.profile;
        if let Err(e) = self.advertiser.start(&self.config.local_name, &profile) {
            self.report(e);
        }
    }

    fn start_scan_cycle(&mut self) {
        if self.connection.is_some() {
            debug!("Already holding a connection, not scanning");
            return;
        }
        match self
            .scanner
            .scan_for(&self.config.peer_name, self.config.scan_duration)
        {
            Ok(()) => self.publish(AppEvent::ConnectionStatus(ConnectionState::Scanning)),
            Err(e) => self.report(e),
        }
    }

    fn on_local_input(&mut self, input: LocalInput) {
        match input {
            LocalInput::Toggle | LocalInput::Button(InputEdge::Pressed) => {
                let value = self.toggle.flip();
                info!("Local toggle -> {}", value);
                self.publish(AppEvent::ToggleChanged {
                    value,
                    origin: ChangeOrigin::Local,
                });
                self.server.notify_all(value);
            }
            LocalInput::Button(InputEdge::Released) => {}
            LocalInput::Shutdown => {
                info!("Shutdown requested");
                self.shutdown();
            }
        }
    }

    fn on_scan_timeout(&mut self) {
        let timeout = self.scanner.timeout_error();
        match self.scanner.on_timeout() {
            ScanOutcome::Found(peer) => {
                debug!("Scan window closed after finding {}", peer.address);
            }
            ScanOutcome::NotFound => {
                self.report(timeout);
                if self.connection.is_none() {
                    self.publish(AppEvent::ConnectionStatus(ConnectionState::Idle));
                }
            }
        }
    }

    fn on_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertisingStarted => self.advertiser.on_started(),
            RadioEvent::AdvertisingFailed { reason } => {
                let err = self.advertiser.on_failed(&reason);
                self.report(err);
            }
            RadioEvent::AdvertisementReceived(report) => {
                if let Some(peer) = self.scanner.on_advertisement(&report) {
                    if self.connection.is_some() {
                        debug!("Ignoring match {}, already connected", peer.address);
                        return;
                    }
                    let mut session =
                        ConnectionSession::new(self.radio.clone(), self.profile, peer);
                    match session.connect() {
                        Ok(()) => {
                            self.connection = Some(session);
                            self.publish(AppEvent::ConnectionStatus(ConnectionState::Connecting));
                        }
                        Err(e) => self.report(e),
                    }
                }
            }
            RadioEvent::Connected { address } => {
                let Some(session) = self.session_for(&address) else {
                    return;
                };
                match session.on_connected() {
                    Ok(()) => {
                        self.scanner.stop();
                        self.publish(AppEvent::ConnectionStatus(ConnectionState::Connected));
                        self.publish_status(
                            format!("Connected to {}", address),
                            MessageSeverity::Success,
                        );
                    }
                    Err(e) => {
                        self.report(e);
                        self.teardown(true);
                    }
                }
            }
            RadioEvent::ConnectFailed { address, reason } => {
                if self.session_for(&address).is_some() {
                    self.report(SyncError::ConnectFailed { address, reason });
                    self.teardown(false);
                }
            }
            RadioEvent::Disconnected { address } => {
                if let Some(session) = self.session_for(&address) {
                    session.on_disconnected();
                    self.report(SyncError::LinkLost(address));
                    self.teardown(false);
                }
            }
            RadioEvent::ServicesDiscovered { address, services } => {
                let Some(session) = self.session_for(&address) else {
                    return;
                };
                if let Err(e) = session.on_services_discovered(&services) {
                    self.report(e);
                    self.teardown(true);
                }
            }
            RadioEvent::ReadCompleted {
                address,
                characteristic,
                result,
            } => {
                let value = self
                    .session_for(&address)
                    .and_then(|s| s.on_read_completed(characteristic, &result));
                if let Some(value) = value {
                    self.apply_remote(value, &address);
                }
            }
            RadioEvent::ValueChanged {
                address,
                characteristic,
                value,
            } => {
                let value = self
                    .session_for(&address)
                    .and_then(|s| s.on_value_changed(characteristic, &value));
                if let Some(value) = value {
                    self.apply_remote(value, &address);
                }
            }
            RadioEvent::PeerConnectionChanged { peer, state } => {
                if self.server.on_connection_state_change(&peer, state) {
                    self.publish(AppEvent::SubscribersChanged(self.server.subscriber_count()));
                }
                if state == LinkState::Connected
                    && self.adapter == AdapterState::Enabled
                    && self.connection.is_none()
                    && !self.scanner.is_scanning()
                {
                    self.start_scan_cycle();
                }
            }
            RadioEvent::CharacteristicReadRequest {
                peer,
                request_id,
                characteristic,
                ..
            } => {
                self.server
                    .on_characteristic_read_request(&peer, request_id, characteristic);
            }
            RadioEvent::DescriptorReadRequest {
                peer,
                request_id,
                descriptor,
            } => {
                self.server
                    .on_descriptor_read_request(&peer, request_id, descriptor);
            }
            RadioEvent::DescriptorWriteRequest {
                peer,
                request_id,
                descriptor,
                response_needed,
                ..
            } => {
                self.server.on_descriptor_write_request(
                    &peer,
                    request_id,
                    descriptor,
                    response_needed,
                );
            }
        }
    }

    /// A remote value only counts when it changes local state. A relay never
    /// goes back to the peer the value came from.
    fn apply_remote(&mut self, value: bool, source: &PeerAddress) {
        if !self.toggle.set(value) {
            debug!("Remote value {} unchanged", value);
            return;
        }

        info!("Remote toggle -> {}", value);
        self.publish(AppEvent::ToggleChanged {
            value,
            origin: ChangeOrigin::Remote,
        });
        if let Err(e) = self.output.set_output(value) {
            self.report(e.into());
        }
        if self.config.relay_remote_changes {
            self.server.notify_except(value, Some(source));
        }
    }

    fn session_for(&mut self, address: &PeerAddress) -> Option<&mut ConnectionSession> {
        self.connection
            .as_mut()
            .filter(|session| session.address() == address)
    }

    fn teardown(&mut self, disconnect: bool) {
        if let Some(mut session) = self.connection.take() {
            if disconnect {
                session.disconnect();
            } else {
                session.invalidate();
            }
            self.publish(AppEvent::ConnectionStatus(ConnectionState::Disconnected));
        }
    }

    fn report(&self, err: SyncError) {
        let severity = match &err {
            SyncError::ScanTimeout { .. } => MessageSeverity::Info,
            SyncError::HardwareIo(_) => MessageSeverity::Error,
            _ => MessageSeverity::Warning,
        };
        match severity {
            MessageSeverity::Error => error!("{}", err),
            MessageSeverity::Warning => warn!("{}", err),
            _ => info!("{}", err),
        }
        self.publish_status(err.to_string(), severity);
    }

    fn publish_status(&self, message: String, severity: MessageSeverity) {
        self.publish(AppEvent::LogMessage(StatusMessage { message, severity }));
    }

    fn publish(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }

    pub fn toggle(&self) -> bool {
        self.toggle.get()
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter
    }

    pub fn advertiser(&self) -> &Advertiser {
        &self.advertiser
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn server(&self) -> &GattServerSession {
        &self.server
    }

    pub fn connection_state(&self) -> ConnectionState {
        match &self.connection {
            Some(session) => session.state(),
            None if self.scanner.is_scanning() => ConnectionState::Scanning,
            None => ConnectionState::Idle,
        }
    }
}
