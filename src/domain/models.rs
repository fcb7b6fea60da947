use std::fmt;
use std::time::Instant;

/// Opaque link-layer identity of a peer, as handed out by the radio backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// A peer seen by the scanner. Later sightings replace earlier ones.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub name: String,
    pub address: PeerAddress,
    pub last_seen: Instant,
}

/// The shared LED/button value. Last write wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleState(bool);

impl ToggleState {
    pub fn new(value: bool) -> Self {
        Self(value)
    }

    pub fn get(self) -> bool {
        self.0
    }

    /// Flip and return the new value.
    pub fn flip(&mut self) -> bool {
        self.0 = !self.0;
        self.0
    }

    /// Store `value`, returning whether it differed from the old one.
    pub fn set(&mut self, value: bool) -> bool {
        let changed = self.0 != value;
        self.0 = value;
        changed
    }
}

/// Per-link state of a central-role connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

/// Connection change reported for a peer on the GATT server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Radio adapter lifecycle, as produced by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEdge {
    Pressed,
    Released,
}

/// Requests coming from the local hardware or UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalInput {
    /// UI toggle action.
    Toggle,
    /// Physical button edge.
    Button(InputEdge),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Events published to the UI layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    ToggleChanged { value: bool, origin: ChangeOrigin },
    SubscribersChanged(usize),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_set_reports_change() {
        let mut state = ToggleState::default();
        assert!(!state.set(false));
        assert!(state.set(true));
        assert!(!state.set(true));
        assert!(state.get());
    }

    #[test]
    fn test_toggle_flip() {
        let mut state = ToggleState::new(true);
        assert!(!state.flip());
        assert!(state.flip());
    }
}
