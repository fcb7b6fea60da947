//! BLE Scanner Module
//!
//! Bounded passive scan for one peer, matched by its exact advertised name.

use crate::domain::models::PeerDescriptor;
use crate::error::SyncError;
use crate::infrastructure::bluetooth::radio::{AdvertisementReport, RadioHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How a scan cycle ended.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Found(PeerDescriptor),
    NotFound,
}

pub struct Scanner {
    radio: RadioHandle,
    target: Option<String>,
    duration: Duration,
    deadline: Option<tokio::time::Instant>,
    matched: Option<PeerDescriptor>,
}

impl Scanner {
    pub fn new(radio: RadioHandle) -> Self {
        Self {
            radio,
            target: None,
            duration: Duration::ZERO,
            deadline: None,
            matched: None,
        }
    }

    /// Start a scan cycle looking for `peer_name`.
    ///
    /// Any running cycle is stopped first. The match, if any, is reported by
    /// [`on_advertisement`](Self::on_advertisement); the cycle ends on
    /// [`on_timeout`](Self::on_timeout) or [`stop`](Self::stop).
    pub fn scan_for(&mut self, peer_name: &str, duration: Duration) -> Result<(), SyncError> {
        self.stop();

        info!("Scanning for '{}' ({:?})", peer_name, duration);
        self.radio.start_scan()?;

        self.target = Some(peer_name.to_string());
        self.duration = duration;
        self.deadline = Some(tokio::time::Instant::now() + duration);
        self.matched = None;
        Ok(())
    }

    /// Inspect one advertisement. Returns the peer only for the first exact
    /// name match of this cycle; repeat sightings refresh the stored
    /// descriptor but are not reported again.
    pub fn on_advertisement(&mut self, report: &AdvertisementReport) -> Option<PeerDescriptor> {
        let target = self.target.as_deref()?;
        let name = match report.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return None,
        };
        if name != target {
            return None;
        }

        let descriptor = PeerDescriptor {
            name: name.to_string(),
            address: report.address.clone(),
            last_seen: Instant::now(),
        };

        match &self.matched {
            Some(existing) => {
                if existing.address == descriptor.address {
                    self.matched = Some(descriptor);
                }
                None
            }
            None => {
                info!("Found '{}' at {}", name, report.address);
                self.matched = Some(descriptor.clone());
                Some(descriptor)
            }
        }
    }

    /// Scan window elapsed: stop scanning and report the cycle's result.
    pub fn on_timeout(&mut self) -> ScanOutcome {
        let outcome = match self.matched.take() {
            Some(peer) => ScanOutcome::Found(peer),
            None => {
                debug!(
                    "Scan for {:?} ended without a match after {:?}",
                    self.target, self.duration
                );
                ScanOutcome::NotFound
            }
        };
        self.stop();
        outcome
    }

    /// Stop scanning. Safe to call at any time.
    pub fn stop(&mut self) {
        if self.deadline.take().is_some() {
            info!("Stopping BLE scan");
            self.radio.stop_scan();
        }
        self.target = None;
        self.matched = None;
    }

    pub fn is_scanning(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }

    pub fn timeout_error(&self) -> SyncError {
        SyncError::ScanTimeout {
            peer_name: self.target.clone().unwrap_or_default(),
            duration: self.duration,
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}
