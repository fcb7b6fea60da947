//! Dual-role BLE sync of a single on/off value between two devices.

pub mod domain;
pub mod error;
pub mod infrastructure;
