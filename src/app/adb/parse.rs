use crate::app::adb::runner::CommandOutput;
use crate::app::models::DeviceEntry;

const DEVICES_HEADER: &str = "list of devices attached";

pub fn parse_adb_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains(DEVICES_HEADER))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next().map(|value| value.to_string());
            Some(DeviceEntry { serial, state })
        })
        .collect()
}

/// Picks the device the shell should attach to: a `localhost` transport first, then the first
/// non-emulator, then whatever is listed first.
pub fn select_device(devices: &[DeviceEntry]) -> Option<&DeviceEntry> {
    devices
        .iter()
        .find(|device| device.serial.contains("localhost"))
        .or_else(|| {
            devices
                .iter()
                .find(|device| !device.serial.contains("emulator"))
        })
        .or_else(|| devices.first())
}

/// `adb connect` and `adb pair` exit 0 even when they fail, so the output is checked too.
pub fn host_command_succeeded(output: &CommandOutput) -> bool {
    let combined = output.combined_lower();
    output.success()
        && !combined.contains("failed")
        && !combined.contains("unable")
        && !combined.contains("cannot")
}

pub fn failure_detail(output: &CommandOutput) -> String {
    if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    }
}

/// Reads the first line of `settings get` output as an integer (`null` when unset).
pub fn parse_settings_int(output: &str) -> Option<i32> {
    let value = output
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())?;
    value.parse::<i32>().ok()
}
