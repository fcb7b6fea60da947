//! Error types shared across the BLE session layer.

use crate::domain::models::PeerAddress;
use std::time::Duration;
use thiserror::Error;

/// Synchronous refusal from a [`Radio`](crate::infrastructure::bluetooth::radio::Radio) backend.
///
/// Outcomes of accepted operations arrive later as radio events; these
/// variants only cover calls the stack could not even start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("bluetooth adapter is off or missing")]
    AdapterUnavailable,
    #[error("cannot allocate an advertising set: {0}")]
    AdvertiseUnavailable(String),
    #[error("link busy with another GATT operation")]
    LinkBusy,
    #[error("peer not connected")]
    NotConnected,
    #[error("attribute not found")]
    AttributeNotFound,
    #[error("radio backend error: {0}")]
    Backend(String),
}

/// Failure of the hardware output collaborator.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("output write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the session layer can report.
///
/// None of these are fatal. The coordinator logs them, publishes a status
/// message and leaves the affected role idle until the next trigger.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("advertising failed: {0}")]
    AdvertiseFailed(String),
    #[error("no advertisement named '{peer_name}' within {duration:?}")]
    ScanTimeout { peer_name: String, duration: Duration },
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed { address: PeerAddress, reason: String },
    #[error("{0} does not expose the remote LED service")]
    ServiceNotFound(PeerAddress),
    #[error("link to {0} lost")]
    LinkLost(PeerAddress),
    #[error(transparent)]
    HardwareIo(#[from] HardwareError),
    #[error(transparent)]
    Radio(RadioError),
}

impl From<RadioError> for SyncError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::AdapterUnavailable => SyncError::AdapterUnavailable,
            RadioError::AdvertiseUnavailable(reason) => SyncError::AdvertiseFailed(reason),
            other => SyncError::Radio(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_error_mapping() {
        assert!(matches!(
            SyncError::from(RadioError::AdapterUnavailable),
            SyncError::AdapterUnavailable
        ));
        assert!(matches!(
            SyncError::from(RadioError::AdvertiseUnavailable("busy".into())),
            SyncError::AdvertiseFailed(reason) if reason == "busy"
        ));
        assert!(matches!(
            SyncError::from(RadioError::LinkBusy),
            SyncError::Radio(RadioError::LinkBusy)
        ));
    }
}
