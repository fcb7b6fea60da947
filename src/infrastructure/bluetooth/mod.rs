//! Bluetooth Module
//!
//! Keeps one shared on/off value in sync between two BLE devices that each
//! play both roles at once.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SessionCoordinator                      │
//! │  (single event stream: adapter, local input, radio)      │
//! └───────┬──────────────┬──────────────┬──────────────┬────┘
//!         │              │              │              │
//!         ▼              ▼              ▼              ▼
//! ┌────────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐
//! │ Advertiser │  │ GattServer│  │  Scanner   │  │ Connection│
//! │ (periph.)  │  │ (periph.) │  │ (central)  │  │ (central) │
//! └─────┬──────┘  └─────┬─────┘  └─────┬──────┘  └─────┬─────┘
//!       └───────────────┴───── Radio ──┴───────────────┘
//!                     (loopback | winrt)
//! ```
//!
//! ## Modules
//!
//! - [`profile`] - Service/characteristic UUIDs and the toggle payload codec
//! - [`radio`] - Backend trait and the events it reports
//! - [`advertiser`] - Connectable advertising of the local name
//! - [`scanner`] - Bounded scan for the peer's name
//! - [`connection`] - Central-role session with the matched peer
//! - [`server`] - GATT server and subscriber fan-out
//! - [`coordinator`] - Role orchestration and toggle state
//! - [`loopback`] - In-process radio for tests and the demo binary
//! - `winrt` - Windows BLE backend

pub mod advertiser;
pub mod connection;
pub mod coordinator;
pub mod loopback;
pub mod profile;
pub mod radio;
pub mod scanner;
pub mod server;
#[cfg(windows)]
pub mod winrt;

pub use coordinator::{CoordinatorChannels, CoordinatorEvent, SessionConfig, SessionCoordinator};
pub use loopback::{LoopbackAir, LoopbackRadio};
pub use radio::{Radio, RadioEvent, RadioHandle};
