use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that points at an alternative settings file
pub const SETTINGS_PATH_ENV: &str = "RASPI_BLE_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
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
    #[serde(default = "default_false")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_false(),
            rotation: default_rotation(),
        }
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
    "/var/log/raspi-ble".to_string()
}
fn default_prefix() -> String {
    "raspi_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Bluetooth side of the peripheral
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    /// Local name carried in the advertisement
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Restrict adapter selection to this name (e.g. "hci0")
    #[serde(default)]
    pub adapter: Option<String>,
    /// Pause before registering so bluetoothd can settle
    #[serde(default = "default_settle_delay_ms")]
    pub registration_settle_ms: u64,
    /// How often the advertisement is checked and re-registered
    #[serde(default = "default_readvertise_interval_ms")]
    pub readvertise_interval_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            adapter: None,
            registration_settle_ms: default_settle_delay_ms(),
            readvertise_interval_ms: default_readvertise_interval_ms(),
        }
    }
}

fn default_device_name() -> String {
    "RaspiBLE".to_string()
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_readvertise_interval_ms() -> u64 {
    5000
}

/// External tools used for scanning and joining networks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Prefix scan/connect invocations with `sudo`
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    #[serde(default = "default_scan_program")]
    pub scan_program: String,
    #[serde(default = "default_connect_program")]
    pub connect_program: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            use_sudo: default_true(),
            scan_program: default_scan_program(),
            connect_program: default_connect_program(),
        }
    }
}

fn default_interface() -> String {
    "wlan0".to_string()
}
fn default_scan_program() -> String {
    "iwlist".to_string()
}
fn default_connect_program() -> String {
    "nmcli".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the default location, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load settings from an explicit path.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("raspi-ble");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
