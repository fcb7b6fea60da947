//! Hardware collaborators: the LED output and the local input sources.

use crate::domain::models::{AdapterState, InputEdge, LocalInput};
use crate::domain::settings::{OutputKind, OutputSettings};
use crate::error::HardwareError;
use std::fs;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Drives the physical LED (or whatever stands in for it).
pub trait OutputPort: Send {
    fn set_output(&mut self, on: bool) -> Result<(), HardwareError>;
}

/// Writes the LED state to the log only.
#[derive(Debug, Default)]
pub struct LogOutput;

impl OutputPort for LogOutput {
    fn set_output(&mut self, on: bool) -> Result<(), HardwareError> {
        info!("LED {}", if on { "ON" } else { "OFF" });
        Ok(())
    }
}

/// Linux sysfs GPIO `value` file, already exported and set to output.
#[derive(Debug)]
pub struct SysfsOutput {
    value_path: PathBuf,
}

impl SysfsOutput {
    pub fn new(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
        }
    }
}

impl OutputPort for SysfsOutput {
    fn set_output(&mut self, on: bool) -> Result<(), HardwareError> {
        fs::write(&self.value_path, if on { "1" } else { "0" })?;
        Ok(())
    }
}

pub fn build_output(settings: &OutputSettings) -> Box<dyn OutputPort> {
    match (settings.kind, settings.sysfs_value_path.as_deref()) {
        (OutputKind::Sysfs, Some(path)) => Box::new(SysfsOutput::new(path)),
        (OutputKind::Sysfs, None) => {
            warn!("sysfs output without a value path, logging LED state instead");
            Box::new(LogOutput)
        }
        (OutputKind::Log, _) => Box::new(LogOutput),
    }
}

/// A line typed on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Local(LocalInput),
    Adapter(AdapterState),
    /// Toggle the simulated peer (loopback backend only).
    PeerToggle,
}

pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_lowercase().as_str() {
        "" | "t" | "toggle" => Some(ConsoleCommand::Local(LocalInput::Toggle)),
        "press" => Some(ConsoleCommand::Local(LocalInput::Button(InputEdge::Pressed))),
        "release" => Some(ConsoleCommand::Local(LocalInput::Button(InputEdge::Released))),
        "on" => Some(ConsoleCommand::Adapter(AdapterState::Enabled)),
        "off" => Some(ConsoleCommand::Adapter(AdapterState::Disabled)),
        "peer" => Some(ConsoleCommand::PeerToggle),
        "q" | "quit" => Some(ConsoleCommand::Local(LocalInput::Shutdown)),
        _ => None,
    }
}

/// Where console commands are delivered.
pub struct ConsoleRoutes {
    pub local: mpsc::UnboundedSender<LocalInput>,
    pub adapter: Box<dyn Fn(AdapterState) + Send>,
    pub peer: Option<mpsc::UnboundedSender<LocalInput>>,
}

/// Read commands from stdin until EOF or `q`.
pub fn spawn_console_input(routes: ConsoleRoutes) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            };

            match parse_console_command(&line) {
                Some(ConsoleCommand::Local(input)) => {
                    let shutdown = input == LocalInput::Shutdown;
                    if routes.local.send(input).is_err() || shutdown {
                        break;
                    }
                }
                Some(ConsoleCommand::Adapter(state)) => (routes.adapter)(state),
                Some(ConsoleCommand::PeerToggle) => match &routes.peer {
                    Some(peer) => {
                        let _ = peer.send(LocalInput::Toggle);
                    }
                    None => warn!("No simulated peer on this backend"),
                },
                None => warn!(
                    "Unknown command '{}' (t, press, release, on, off, peer, q)",
                    line.trim()
                ),
            }
        }
        let _ = routes.local.send(LocalInput::Shutdown);
    })
}
