use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::app::adb::parse::{failure_detail, host_command_succeeded, parse_adb_devices};
use crate::app::adb::runner::{run_async_with_timeout, CommandOutput};
use crate::app::error::AppError;
use crate::app::models::DeviceEntry;

/// Invokes the local ADB binary with the app-private environment.
#[derive(Debug, Clone)]
pub struct AdbClient {
    program: String,
    home_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl AdbClient {
    pub fn new(program: impl Into<String>, home_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            home_dir,
            tmp_dir,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// A command running `program` with `HOME`/`TMPDIR` pointed at the app dirs.
    pub fn base_command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .current_dir(&self.home_dir)
            .env("HOME", &self.home_dir)
            .env("TMPDIR", &self.tmp_dir);
        command
    }

    pub fn command<S: AsRef<str>>(&self, args: &[S]) -> Command {
        let mut command = self.base_command(&self.program);
        command.args(args.iter().map(|arg| arg.as_ref()));
        command
    }

    async fn run(&self, args: &[&str], timeout: Duration, trace_id: &str) -> Result<CommandOutput, AppError> {
        let description = format!("adb {}", args.join(" "));
        debug!(trace_id, command = %description, "running adb");
        run_async_with_timeout(self.command(args), timeout, &description, trace_id).await
    }

    pub async fn start_server(&self, timeout: Duration, trace_id: &str) -> Result<(), AppError> {
        let output = self.run(&["start-server"], timeout, trace_id).await?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("adb start-server failed: {}", failure_detail(&output)),
                trace_id,
            ));
        }
        Ok(())
    }

    pub async fn connect_local(&self, port: u16, timeout: Duration, trace_id: &str) -> Result<(), AppError> {
        let address = format!("localhost:{port}");
        let output = self.run(&["connect", &address], timeout, trace_id).await?;
        if !host_command_succeeded(&output) {
            return Err(AppError::dependency(
                format!("adb connect failed: {}", failure_detail(&output)),
                trace_id,
            ));
        }
        Ok(())
    }

    pub async fn wait_for_device(&self, timeout: Duration, trace_id: &str) -> Result<(), AppError> {
        let output = self.run(&["wait-for-device"], timeout, trace_id).await?;
        if !output.success() {
            return Err(AppError::dependency(
                format!("adb wait-for-device failed: {}", failure_detail(&output)),
                trace_id,
            ));
        }
        Ok(())
    }

    pub async fn devices(&self, timeout: Duration, trace_id: &str) -> Result<Vec<DeviceEntry>, AppError> {
        let output = self.run(&["devices"], timeout, trace_id).await?;
        Ok(parse_adb_devices(&output.stdout))
    }

    pub async fn kill_server(&self, timeout: Duration, trace_id: &str) -> Result<(), AppError> {
        self.run(&["kill-server"], timeout, trace_id).await.map(|_| ())
    }

    /// `adb [-s serial] shell`, not yet spawned.
    pub fn shell_command(&self, serial: Option<&str>) -> Command {
        match serial {
            Some(serial) => self.command(&["-s", serial, "shell"]),
            None => self.command(&["shell"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_targets_selected_serial() {
        let client = AdbClient::new("adb", PathBuf::from("/tmp"), PathBuf::from("/tmp"));
        let targeted = client.shell_command(Some("localhost:5555"));
        let args: Vec<_> = targeted.as_std().get_args().collect();
        assert_eq!(args, ["-s", "localhost:5555", "shell"]);

        let plain = client.shell_command(None);
        let args: Vec<_> = plain.as_std().get_args().collect();
        assert_eq!(args, ["shell"]);
    }

    #[test]
    fn commands_carry_app_private_env() {
        let client = AdbClient::new("adb", PathBuf::from("/data/files"), PathBuf::from("/data/cache"));
        let command = client.command(&["devices"]);
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert!(envs.contains(&(
            std::ffi::OsStr::new("HOME"),
            Some(std::ffi::OsStr::new("/data/files"))
        )));
        assert!(envs.contains(&(
            std::ffi::OsStr::new("TMPDIR"),
            Some(std::ffi::OsStr::new("/data/cache"))
        )));
    }
}
