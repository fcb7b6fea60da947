use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    /// Separate level for the BLE session modules, e.g. "trace" while
    /// debugging a pairing.
    #[serde(default)]
    pub radio_level: Option<String>,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            radio_level: None,
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Where the LED state ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Sysfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_kind")]
    pub kind: OutputKind,
    /// e.g. `/sys/class/gpio/gpio6/value`
    #[serde(default)]
    pub sysfs_value_path: Option<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            kind: default_output_kind(),
            sysfs_value_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated air with a virtual peer.
    Loopback,
    /// Windows Runtime Bluetooth LE stack.
    WinRt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name this endpoint advertises.
    #[serde(default = "default_local_name")]
    pub local_name: String,
    /// Advertised name of the endpoint we connect to.
    #[serde(default = "default_peer_name")]
    pub peer_name: String,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    /// Pass a remote change on to our other subscribers. The sender itself is never re-notified.
    #[serde(default = "default_true")]
    pub relay_remote_changes: bool,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_name: default_local_name(),
            peer_name: default_peer_name(),
            scan_duration_ms: default_scan_duration_ms(),
            relay_remote_changes: default_true(),
            output: OutputSettings::default(),
            backend: default_backend(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.local_name.trim().is_empty() {
            anyhow::bail!("local_name must not be empty");
        }
        if self.peer_name.trim().is_empty() {
            anyhow::bail!("peer_name must not be empty");
        }
        if self.local_name == self.peer_name {
            anyhow::bail!("local_name and peer_name must differ");
        }
        if self.scan_duration_ms == 0 {
            anyhow::bail!("scan_duration_ms must be greater than zero");
        }
        if self.output.kind == OutputKind::Sysfs && self.output.sysfs_value_path.is_none() {
            anyhow::bail!("sysfs output needs output.sysfs_value_path");
        }
        Ok(())
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "remote_led_sync".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_local_name() -> String {
    "Remote LED Button".to_string()
}
fn default_peer_name() -> String {
    "Remote LED Light".to_string()
}
fn default_scan_duration_ms() -> u64 {
    10_000
}
fn default_output_kind() -> OutputKind {
    OutputKind::Log
}
fn default_backend() -> Backend {
    if cfg!(windows) {
        Backend::WinRt
    } else {
        Backend::Loopback
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::open(settings_path)
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable. Invalid settings are an error.
    pub fn open(settings_path: PathBuf) -> anyhow::Result<Self> {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };
        settings.validate()?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("RemoteLedSync");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::open(dir.path().join("settings.json")).unwrap();
        assert_eq!(service.get().scan_duration_ms, 10_000);
        assert!(service.get().relay_remote_changes);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "peer_name": "Pixel 2", "scan_duration_ms": 2500 }"#).unwrap();

        let service = SettingsService::open(path).unwrap();
        assert_eq!(service.get().peer_name, "Pixel 2");
        assert_eq!(service.get().scan_duration(), Duration::from_millis(2500));
        assert_eq!(service.get().local_name, "Remote LED Button");
        assert_eq!(service.get().output.kind, OutputKind::Log);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::open(path.clone()).unwrap();
        service.get_mut().local_name = "My Android Things device".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::open(path).unwrap();
        assert_eq!(reloaded.get().local_name, "My Android Things device");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.peer_name = settings.local_name.clone();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.scan_duration_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.output.kind = OutputKind::Sysfs;
        assert!(settings.validate().is_err());
    }
}
