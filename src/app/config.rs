use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

pub const DEFAULT_PACKAGE_NAME: &str = "io.middlepoint.tvsleep";
pub const MAX_OUTPUT_BUFFER_SIZE: usize = 1024 * 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellSettings {
    pub adb_path: String,
    /// Where the app's native libraries (and its bundled `libadb.so`) live.
    pub native_library_dir: String,
    pub package_name: String,
    pub auto_shell: bool,
    pub output_buffer_size: usize,
    pub output_poll_interval_ms: u64,
    pub home_dir: String,
    pub tmp_dir: String,
    pub startup_command: String,
    /// Grants the app usage-stats access from the shell when it is missing.
    pub grant_usage_stats: bool,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            adb_path: String::new(),
            native_library_dir: String::new(),
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            auto_shell: true,
            output_buffer_size: MAX_OUTPUT_BUFFER_SIZE,
            output_poll_interval_ms: 100,
            home_dir: String::new(),
            tmp_dir: String::new(),
            startup_command: "echo 'Success! ※\\(^o^)/※'".to_string(),
            grant_usage_stats: true,
        }
    }
}

impl ShellSettings {
    /// `HOME` handed to the shell; falls back to the platform data dir.
    pub fn resolved_home_dir(&self) -> PathBuf {
        resolve_dir(&self.home_dir, dirs::data_local_dir)
    }

    /// `TMPDIR` handed to the shell; falls back to the platform cache dir.
    pub fn resolved_tmp_dir(&self) -> PathBuf {
        resolve_dir(&self.tmp_dir, dirs::cache_dir)
    }
}

fn resolve_dir(configured: &str, fallback: fn() -> Option<PathBuf>) -> PathBuf {
    let trimmed = configured.trim();
    if !trimmed.is_empty() {
        return PathBuf::from(trimmed);
    }
    fallback()
        .map(|dir| dir.join("tv_sleep"))
        .unwrap_or_else(std::env::temp_dir)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapSettings {
    pub mobile_data_settle_ms: u64,
    pub usb_enable_settle_ms: u64,
    pub usb_poll_interval_ms: u64,
    pub discovery_min_scan_ms: u64,
    pub discovery_max_wait_ms: u64,
    pub discovery_poll_interval_ms: u64,
    pub adb_command_timeout_ms: u64,
    pub restart_debounce_ms: u64,
    /// Read and write `Settings.Global` through the device's `settings` binary. Off when the
    /// daemon runs on a host next to the device, where USB debugging is assumed to be on.
    pub use_device_settings: bool,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            mobile_data_settle_ms: 3_000,
            usb_enable_settle_ms: 5_000,
            usb_poll_interval_ms: 1_000,
            discovery_min_scan_ms: 3_000,
            discovery_max_wait_ms: 10_000,
            discovery_poll_interval_ms: 1_000,
            adb_command_timeout_ms: 60_000,
            restart_debounce_ms: 3_000,
            use_device_settings: true,
        }
    }
}

impl BootstrapSettings {
    pub fn mobile_data_settle(&self) -> Duration {
        Duration::from_millis(self.mobile_data_settle_ms)
    }

    pub fn usb_enable_settle(&self) -> Duration {
        Duration::from_millis(self.usb_enable_settle_ms)
    }

    pub fn usb_poll_interval(&self) -> Duration {
        Duration::from_millis(self.usb_poll_interval_ms)
    }

    pub fn discovery_min_scan(&self) -> Duration {
        Duration::from_millis(self.discovery_min_scan_ms)
    }

    pub fn discovery_max_wait(&self) -> Duration {
        Duration::from_millis(self.discovery_max_wait_ms)
    }

    pub fn discovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_interval_ms)
    }

    pub fn adb_command_timeout(&self) -> Duration {
        Duration::from_millis(self.adb_command_timeout_ms)
    }

    pub fn restart_debounce(&self) -> Duration {
        Duration::from_millis(self.restart_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairingSettings {
    pub code_delay_ms: u64,
    pub pair_timeout_ms: u64,
    pub kill_server_timeout_ms: u64,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            code_delay_ms: 5_000,
            pair_timeout_ms: 10_000,
            kill_server_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerSettings {
    pub add_time_step_ms: u64,
    pub final_minute_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            add_time_step_ms: 60_000,
            final_minute_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SleepSettings {
    pub sleep_command: String,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            sleep_command: "input keyevent KEYCODE_SLEEP".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverlaySettings {
    pub auto_hide_ms: u64,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self { auto_hide_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(default)]
    pub pairing: PairingSettings,
    #[serde(default)]
    pub timer: TimerSettings,
    #[serde(default)]
    pub sleep: SleepSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub store_path: String,
}

impl AppConfig {
    pub fn resolved_store_path(&self) -> PathBuf {
        let trimmed = self.store_path.trim();
        if trimmed.is_empty() {
            self.shell.resolved_home_dir().join("preferences.json")
        } else {
            PathBuf::from(trimmed)
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TV_SLEEP_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tv_sleep_config.json")
}

pub fn backup_config_path() -> PathBuf {
    let mut path = config_path();
    path.set_extension("backup.json");
    path
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    if config.shell.output_buffer_size == 0 {
        config.shell.output_buffer_size = MAX_OUTPUT_BUFFER_SIZE;
    }
    if config.shell.output_poll_interval_ms < 10 {
        config.shell.output_poll_interval_ms = 100;
    }
    if config.shell.package_name.trim().is_empty() {
        config.shell.package_name = DEFAULT_PACKAGE_NAME.to_string();
    }
    if config.bootstrap.usb_poll_interval_ms == 0 {
        config.bootstrap.usb_poll_interval_ms = 1_000;
    }
    if config.bootstrap.discovery_poll_interval_ms == 0 {
        config.bootstrap.discovery_poll_interval_ms = 1_000;
    }
    if config.bootstrap.adb_command_timeout_ms < 1_000 {
        config.bootstrap.adb_command_timeout_ms = 60_000;
    }
    if config.timer.add_time_step_ms == 0 {
        config.timer.add_time_step_ms = 60_000;
    }
    if config.sleep.sleep_command.trim().is_empty() {
        config.sleep.sleep_command = SleepSettings::default().sleep_command;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"shell": {"adb_path": "/data/app/lib/libadb.so", "package_name": "",
                "auto_shell": false, "output_buffer_size": 0}}"#,
        )
        .expect("write");

        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.shell.adb_path, "/data/app/lib/libadb.so");
        assert!(!config.shell.auto_shell);
        assert_eq!(config.shell.output_buffer_size, MAX_OUTPUT_BUFFER_SIZE);
        assert_eq!(config.shell.package_name, DEFAULT_PACKAGE_NAME);
        assert_eq!(config.bootstrap, BootstrapSettings::default());
        assert_eq!(config.sleep.sleep_command, "input keyevent KEYCODE_SLEEP");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.shell.output_poll_interval_ms = 1;
        config.bootstrap.usb_poll_interval_ms = 0;
        config.bootstrap.adb_command_timeout_ms = 5;
        config.timer.add_time_step_ms = 0;
        config.sleep.sleep_command = "  ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.shell.output_poll_interval_ms, 100);
        assert_eq!(validated.bootstrap.usb_poll_interval_ms, 1_000);
        assert_eq!(validated.bootstrap.adb_command_timeout_ms, 60_000);
        assert_eq!(validated.timer.add_time_step_ms, 60_000);
        assert_eq!(validated.sleep.sleep_command, "input keyevent KEYCODE_SLEEP");
    }

    #[test]
    fn save_keeps_backup_of_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = AppConfig::default();
        save_config_to_path(&config, &path, &backup).expect("first save");
        config.timer.add_time_step_ms = 30_000;
        save_config_to_path(&config, &path, &backup).expect("second save");

        let current = load_config_from_path(&path).expect("current");
        let previous = load_config_from_path(&backup).expect("backup");
        assert_eq!(current.timer.add_time_step_ms, 30_000);
        assert_eq!(previous.timer.add_time_step_ms, 60_000);
    }

    #[test]
    fn configured_dirs_take_precedence() {
        let mut settings = ShellSettings::default();
        settings.home_dir = "/data/user/0/io.middlepoint.tvsleep/files".to_string();
        assert_eq!(
            settings.resolved_home_dir(),
            PathBuf::from("/data/user/0/io.middlepoint.tvsleep/files")
        );
    }
}
