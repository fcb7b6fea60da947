//! BLE Advertiser Module
//!
//! Connectable advertising of the local name and the Remote LED service.

use crate::error::SyncError;
use crate::infrastructure::bluetooth::profile::ServiceProfile;
use crate::infrastructure::bluetooth::radio::{Advertisement, RadioHandle};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    Stopped,
    /// Requested, waiting for the stack to confirm.
    Starting,
    Active,
}

pub struct Advertiser {
    radio: RadioHandle,
    state: AdvertiserState,
    current: Option<Advertisement>,
}

impl Advertiser {
    pub fn new(radio: RadioHandle) -> Self {
        Self {
            radio,
            state: AdvertiserState::Stopped,
            current: None,
        }
    }

    /// Start advertising. A repeat call with the same payload is a no-op; a
    /// different payload restarts the advertising set.
    pub fn start(&mut self, device_name: &str, profile: &ServiceProfile) -> Result<(), SyncError> {
        let advertisement = Advertisement {
            local_name: device_name.to_string(),
            include_tx_power: false,
            connectable: true,
            service_uuids: vec![profile.service_uuid],
        };

        if self.state != AdvertiserState::Stopped {
            if self.current.as_ref() == Some(&advertisement) {
                return Ok(());
            }
            self.stop();
        }

        info!("Starting advertising as '{}'", device_name);
        match self.radio.start_advertising(&advertisement) {
            Ok(()) => {
                self.state = AdvertiserState::Starting;
                self.current = Some(advertisement);
                Ok(())
            }
            Err(e) => {
                warn!("Advertising unavailable: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn on_started(&mut self) {
        if self.state == AdvertiserState::Starting {
            info!("LE advertise started");
            self.state = AdvertiserState::Active;
        }
    }

    /// The stack gave up on our advertising set after accepting it.
    pub fn on_failed(&mut self, reason: &str) -> SyncError {
        warn!("LE advertise failed: {}", reason);
        self.state = AdvertiserState::Stopped;
        self.current = None;
        SyncError::AdvertiseFailed(reason.to_string())
    }

    pub fn stop(&mut self) {
        if self.state == AdvertiserState::Stopped {
            return;
        }
        info!("Stopping advertising");
        self.radio.stop_advertising();
        self.state = AdvertiserState::Stopped;
        self.current = None;
    }

    pub fn state(&self) -> AdvertiserState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != AdvertiserState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::infrastructure::bluetooth::profile::{build_service, REMOTE_LED_SERVICE};
    use crate::infrastructure::bluetooth::radio::testing::{Call, RecordingRadio};

    #[test]
    fn test_start_advertises_name_and_service() {
        let radio = RecordingRadio::new();
        let mut advertiser = Advertiser::new(radio.clone());

        advertiser.start("button", &build_service()).unwrap();
        assert_eq!(advertiser.state(), AdvertiserState::Starting);

        match &radio.calls()[..] {
            [Call::StartAdvertising(adv)] => {
                assert_eq!(adv.local_name, "button");
                assert!(adv.connectable);
                assert!(!adv.include_tx_power);
                assert_eq!(adv.service_uuids, vec![REMOTE_LED_SERVICE]);
            }
            other => panic!("unexpected calls: {:?}", other),
        }

        advertiser.on_started();
        assert_eq!(advertiser.state(), AdvertiserState::Active);
    }

    #[test]
    fn test_start_is_idempotent() {
        let radio = RecordingRadio::new();
        let mut advertiser = Advertiser::new(radio.clone());
        let profile = build_service();

        advertiser.start("button", &profile).unwrap();
        advertiser.start("button", &profile).unwrap();
        assert_eq!(radio.calls().len(), 1);

        advertiser.start("renamed", &profile).unwrap();
        let calls = radio.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], Call::StopAdvertising);
    }

    #[test]
    fn test_start_failure_is_reported() {
        let radio = RecordingRadio::new();
        radio.fail_with(Some(RadioError::AdvertiseUnavailable("no sets".into())));
        let mut advertiser = Advertiser::new(radio.clone());

        let err = advertiser.start("button", &build_service()).unwrap_err();
        assert!(matches!(err, SyncError::AdvertiseFailed(_)));
        assert!(!advertiser.is_active());
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let radio = RecordingRadio::new();
        let mut advertiser = Advertiser::new(radio.clone());
        advertiser.stop();
        advertiser.stop();
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_async_failure_resets_state() {
        let radio = RecordingRadio::new();
        let mut advertiser = Advertiser::new(radio);
        advertiser.start("button", &build_service()).unwrap();
        let err = advertiser.on_failed("too many advertisers");
        assert!(matches!(err, SyncError::AdvertiseFailed(_)));
        assert_eq!(advertiser.state(), AdvertiserState::Stopped);
    }
}
