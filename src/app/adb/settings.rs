use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use crate::app::adb::parse::parse_settings_int;
use crate::app::adb::runner::run_command_with_timeout;
use crate::app::error::AppError;

pub const ADB_ENABLED: &str = "adb_enabled";
pub const MOBILE_DATA_ALWAYS_ON: &str = "mobile_data_always_on";

/// Access to `Settings.Global` on the device the app runs on.
pub trait SystemSettings: Send + Sync {
    /// Whether the app holds `WRITE_SECURE_SETTINGS`.
    fn can_write_secure_settings(&self) -> bool;

    fn global_int(&self, key: &str) -> Option<i32>;

    fn put_global_int(&self, key: &str, value: i32) -> Result<(), AppError>;

    /// Whether the app may read usage stats (`GET_USAGE_STATS` app op allowed).
    fn has_usage_stats_access(&self) -> bool;

    fn is_enabled(&self, key: &str) -> bool {
        self.global_int(key).unwrap_or(0) == 1
    }
}

/// Talks to the `settings` binary, which is what `Settings.Global` resolves to from a shell.
pub struct SettingsCli {
    program: String,
    package_name: String,
    timeout: Duration,
}

impl SettingsCli {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            program: "settings".to_string(),
            package_name: package_name.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl SystemSettings for SettingsCli {
    fn can_write_secure_settings(&self) -> bool {
        let args = vec!["package".to_string(), self.package_name.clone()];
        match run_command_with_timeout("dumpsys", &args, self.timeout, "") {
            Ok(output) => {
                output.success()
                    && output
                        .stdout
                        .contains("android.permission.WRITE_SECURE_SETTINGS: granted=true")
            }
            Err(err) => {
                warn!(error = %err, "failed to query secure settings permission");
                false
            }
        }
    }

    fn has_usage_stats_access(&self) -> bool {
        let args = vec![
            "get".to_string(),
            self.package_name.clone(),
            "GET_USAGE_STATS".to_string(),
        ];
        match run_command_with_timeout("appops", &args, self.timeout, "") {
            Ok(output) => output.success() && output.stdout.contains("allow"),
            Err(err) => {
                warn!(error = %err, "failed to query usage stats access");
                false
            }
        }
    }

    fn global_int(&self, key: &str) -> Option<i32> {
        let args = vec!["get".to_string(), "global".to_string(), key.to_string()];
        match run_command_with_timeout(&self.program, &args, self.timeout, "") {
            Ok(output) if output.success() => parse_settings_int(&output.stdout),
            Ok(output) => {
                warn!(key, stderr = %output.stderr.trim(), "settings get failed");
                None
            }
            Err(err) => {
                warn!(key, error = %err, "settings get failed");
                None
            }
        }
    }

    fn put_global_int(&self, key: &str, value: i32) -> Result<(), AppError> {
        let args = vec![
            "put".to_string(),
            "global".to_string(),
            key.to_string(),
            value.to_string(),
        ];
        let output = run_command_with_timeout(&self.program, &args, self.timeout, "")?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("settings put global {key} failed: {}", output.stderr.trim()),
                "",
            ));
        }
        Ok(())
    }
}

/// Settings held in memory, for hosts without `Settings.Global` and for tests.
/// Usage-stats access starts out allowed.
#[derive(Debug)]
pub struct InMemorySettings {
    secure_settings_granted: bool,
    usage_stats_access: bool,
    values: Mutex<HashMap<String, i32>>,
}

impl InMemorySettings {
    pub fn new(secure_settings_granted: bool) -> Self {
        Self {
            secure_settings_granted,
            usage_stats_access: true,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_usage_stats_access(mut self, allowed: bool) -> Self {
        self.usage_stats_access = allowed;
        self
    }

    pub fn with_value(self, key: &str, value: i32) -> Self {
        if let Ok(mut guard) = self.values.lock() {
            guard.insert(key.to_string(), value);
        }
        self
    }

    /// Changes a value the way the user would from the settings app, bypassing the permission.
    pub fn set_value(&self, key: &str, value: i32) {
        if let Ok(mut guard) = self.values.lock() {
            guard.insert(key.to_string(), value);
        }
    }
}

impl SystemSettings for InMemorySettings {
    fn can_write_secure_settings(&self) -> bool {
        self.secure_settings_granted
    }

    fn global_int(&self, key: &str) -> Option<i32> {
        self.values.lock().ok()?.get(key).copied()
    }

    fn has_usage_stats_access(&self) -> bool {
        self.usage_stats_access
    }

    fn put_global_int(&self, key: &str, value: i32) -> Result<(), AppError> {
        if !self.secure_settings_granted {
            return Err(AppError::validation(
                "WRITE_SECURE_SETTINGS is not granted",
                "",
            ));
        }
        self.values
            .lock()
            .map_err(|_| AppError::system("settings lock poisoned", ""))?
            .insert(key.to_string(), value);
        Ok(())
    }
}
