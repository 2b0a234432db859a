//! Bringing the local ADB shell up: settings, discovery, server, device, shell.

use std::sync::Arc;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::parse::select_device;
use crate::app::adb::settings::{SystemSettings, ADB_ENABLED, MOBILE_DATA_ALWAYS_ON};
use crate::app::error::AppError;
use crate::app::models::ConnectionState;
use crate::app::poll::{poll_until, PollOutcome};
use crate::app::shell::process::ShellProcess;
use crate::app::shell::session::ShellSession;

pub const USB_DEBUGGING_DISABLED: &str = "USB debugging is not enabled";
const WRITE_SECURE_SETTINGS: &str = "android.permission.WRITE_SECURE_SETTINGS";

impl ShellSession {
    /// Brings the shell up. `true` when Ready (or already on its way there), `false` when the
    /// device never connected, in which case the state is `Failed`.
    pub async fn init_server(&self) -> bool {
        if self.state().is_ready() {
            return true;
        }
        let Some(_guard) = self.begin_bootstrap() else {
            return true;
        };

        let trace_id = Uuid::new_v4().to_string();
        info!(trace_id = %trace_id, "starting shell bootstrap");
        self.set_state(ConnectionState::Connecting);

        match self.bootstrap_shell(&trace_id).await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                true
            }
            Err(err) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "shell bootstrap failed");
                self.set_state(ConnectionState::Failed(err.error));
                false
            }
        }
    }

    async fn bootstrap_shell(&self, trace_id: &str) -> Result<(), AppError> {
        let auto_shell = self.shell_settings.auto_shell;
        let secure_settings_granted = self
            .with_settings(trace_id, |settings| settings.can_write_secure_settings())
            .await?;

        let mut serial = None;
        if auto_shell {
            if secure_settings_granted {
                self.prepare_settings(trace_id).await?;
            }
            self.await_usb_debugging(trace_id).await;

            let port = self.await_discovery().await;
            match port {
                Some(port) => self.debug(&format!("Best ADB port discovered: {port}")),
                None => self.debug("No ADB port discovered, fallback..."),
            }

            self.debug("Starting ADB server...");
            let timeout = self.bootstrap.adb_command_timeout();
            if let Err(err) = self.adb.start_server(timeout, trace_id).await {
                warn!(trace_id, error = %err, "adb start-server failed");
            }

            let connected = match port {
                Some(port) => self.adb.connect_local(port, timeout, trace_id).await,
                None => self.adb.wait_for_device(timeout, trace_id).await,
            };
            if let Err(err) = connected {
                self.report_connect_failure(trace_id).await;
                return Err(err);
            }

            serial = self.pick_device(trace_id).await;
        }

        let command = self.shell_command(auto_shell, serial.as_deref());
        let process = ShellProcess::spawn(command, &self.output, trace_id)?;
        info!(trace_id, serial = ?serial, pid = ?process.pid(), "shell attached");
        // A stale handle left in the slot is killed when replaced.
        *self.process.lock().await = Some(process);

        let usage_stats_access = if self.shell_settings.grant_usage_stats {
            self.with_settings(trace_id, |settings| settings.has_usage_stats_access())
                .await?
        } else {
            true
        };
        self.send_preamble(auto_shell, secure_settings_granted, usage_stats_access)
            .await;
        Ok(())
    }

    /// Runs a blocking settings call off the runtime threads.
    async fn with_settings<T, F>(&self, trace_id: &str, call: F) -> Result<T, AppError>
    where
        F: FnOnce(&dyn SystemSettings) -> T + Send + 'static,
        T: Send + 'static,
    {
        let settings = Arc::clone(&self.settings);
        tokio::task::spawn_blocking(move || call(settings.as_ref()))
            .await
            .map_err(|err| AppError::system(format!("Settings task failed: {err}"), trace_id))
    }

    async fn prepare_settings(&self, trace_id: &str) -> Result<(), AppError> {
        if self
            .with_settings(trace_id, |settings| settings.is_enabled(MOBILE_DATA_ALWAYS_ON))
            .await?
        {
            self.debug("Disabling 'Mobile data always on'...");
            self.put_setting(MOBILE_DATA_ALWAYS_ON, 0, trace_id).await?;
            tokio::time::sleep(self.bootstrap.mobile_data_settle()).await;
        }

        if !self
            .with_settings(trace_id, |settings| settings.is_enabled(ADB_ENABLED))
            .await?
        {
            self.debug("Turning on USB debugging...");
            self.put_setting(ADB_ENABLED, 1, trace_id).await?;
            tokio::time::sleep(self.bootstrap.usb_enable_settle()).await;
        }
        Ok(())
    }

    async fn put_setting(&self, key: &'static str, value: i32, trace_id: &str) -> Result<(), AppError> {
        let result = self
            .with_settings(trace_id, move |settings| settings.put_global_int(key, value))
            .await?;
        if let Err(err) = result {
            warn!(trace_id, key, error = %err, "failed to update global setting");
        }
        Ok(())
    }

    async fn usb_debugging_enabled(&self, trace_id: &str) -> bool {
        match self
            .with_settings(trace_id, |settings| settings.is_enabled(ADB_ENABLED))
            .await
        {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!(trace_id, error = %err, "failed to read USB debugging setting");
                false
            }
        }
    }

    /// Holds the bootstrap in `Failed` until the user turns USB debugging on.
    async fn await_usb_debugging(&self, trace_id: &str) {
        if self.usb_debugging_enabled(trace_id).await {
            return;
        }

        self.set_state(ConnectionState::Failed(USB_DEBUGGING_DISABLED.to_string()));
        self.debug("USB debugging is not enabled!");
        self.debug("Settings -> Developer options -> USB debugging");
        self.debug("Waiting for USB debugging...");

        poll_until(
            self.bootstrap.usb_poll_interval(),
            None,
            move || self.usb_debugging_enabled(trace_id),
            || {},
        )
        .await;
        self.set_state(ConnectionState::Connecting);
    }

    /// Gives the resolver a minimum scan window past its last sighting, capped overall.
    async fn await_discovery(&self) -> Option<u16> {
        let start = Instant::now();
        let min_scan = self.bootstrap.discovery_min_scan();
        let discovery = Arc::clone(&self.discovery);
        let outcome = poll_until(
            self.bootstrap.discovery_poll_interval(),
            Some(self.bootstrap.discovery_max_wait()),
            || {
                let snapshot = discovery.snapshot();
                let scan_until = snapshot.alive_time.unwrap_or(start) + min_scan;
                std::future::ready(Instant::now() >= scan_until && !snapshot.pending_resolves)
            },
            || self.debug("Awaiting DNS resolver..."),
        )
        .await;
        match outcome {
            PollOutcome::Satisfied => self.debug("DNS resolver done..."),
            PollOutcome::TimedOut => self.debug("DNS resolver took too long! Skipping..."),
        }
        discovery.snapshot().adb_port
    }

    async fn report_connect_failure(&self, trace_id: &str) {
        self.debug("Your device didn't connect to ADB");
        self.debug("If a reboot doesn't work, please contact support");
        let mobile_data_on = self
            .with_settings(trace_id, |settings| settings.is_enabled(MOBILE_DATA_ALWAYS_ON))
            .await
            .unwrap_or(false);
        if mobile_data_on {
            self.debug("Please disable 'Mobile data always on' in Developer Settings!");
        }
    }

    async fn pick_device(&self, trace_id: &str) -> Option<String> {
        let devices = match self
            .adb
            .devices(self.bootstrap.adb_command_timeout(), trace_id)
            .await
        {
            Ok(devices) => devices,
            Err(err) => {
                warn!(trace_id, error = %err, "adb devices failed, using default device");
                return None;
            }
        };
        if devices.len() > 1 {
            warn!(trace_id, count = devices.len(), "multiple devices detected");
        }
        let serial = select_device(&devices).map(|device| device.serial.clone());
        if let Some(serial) = &serial {
            info!(trace_id, serial = %serial, "selected device");
        }
        serial
    }

    fn shell_command(&self, auto_shell: bool, serial: Option<&str>) -> Command {
        if auto_shell {
            self.adb.shell_command(serial)
        } else {
            let mut command = self.adb.base_command("sh");
            command.arg("-l");
            command
        }
    }

    async fn send_preamble(
        &self,
        auto_shell: bool,
        secure_settings_granted: bool,
        usage_stats_access: bool,
    ) {
        self.send_to_shell_process(&format!("alias adb=\"{}\"", self.adb.program()))
            .await;
        if !secure_settings_granted {
            self.send_to_shell_process(&format!(
                "pm grant {} {WRITE_SECURE_SETTINGS} &> /dev/null",
                self.shell_settings.package_name
            ))
            .await;
        }
        if !usage_stats_access {
            self.send_to_shell_process(&format!(
                "appops set {} GET_USAGE_STATS allow",
                self.shell_settings.package_name
            ))
            .await;
        }
        if auto_shell {
            self.send_to_shell_process("echo 'Entered adb shell'").await;
        } else {
            self.send_to_shell_process("echo 'Entered non-adb shell'").await;
        }
        let startup = self.shell_settings.startup_command.trim();
        if !startup.is_empty() {
            self.send_to_shell_process(startup).await;
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use crate::app::adb::discovery::DiscoveryState;
    use crate::app::adb::settings::InMemorySettings;
    use crate::app::config::AppConfig;

    /// A stand-in `adb` that logs its arguments and turns `shell` into a local `sh`.
    pub(crate) struct FakeAdb {
        pub dir: tempfile::TempDir,
        pub log: PathBuf,
    }

    impl FakeAdb {
        pub(crate) fn install(connect_reply: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let log = dir.path().join("adb.log");
            let script = dir.path().join("adb");
            let body = format!(
                "#!/bin/sh\n\
                 echo \"$*\" >> '{log}'\n\
                 case \"$1\" in\n\
                 -s) shift 2; exec sh ;;\n\
                 shell) exec sh ;;\n\
                 devices) printf 'List of devices attached\\nemulator-5554\\tdevice\\nlocalhost:5555\\tdevice\\n' ;;\n\
                 connect) echo '{connect_reply}' ;;\n\
                 esac\n\
                 exit 0\n",
                log = log.display(),
            );
            std::fs::write(&script, body).expect("write fake adb");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
            Self { dir, log }
        }

        pub(crate) fn program(&self) -> String {
            self.dir.path().join("adb").to_string_lossy().to_string()
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(|line| line.to_string())
                .collect()
        }

        /// Shell children log their own spawn, so the entry can land after `init_server` returns.
        pub(crate) async fn wait_for_call(&self, suffix: &str) -> Vec<String> {
            let mut calls = self.calls();
            for _ in 0..200 {
                if calls.iter().any(|call| call.ends_with(suffix)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                calls = self.calls();
            }
            calls
        }

        pub(crate) fn config(&self) -> AppConfig {
            let mut config = AppConfig::default();
            config.shell.adb_path = self.program();
            config.shell.home_dir = path_string(&self.dir.path().join("files"));
            config.shell.tmp_dir = path_string(&self.dir.path().join("cache"));
            config.bootstrap.mobile_data_settle_ms = 10;
            config.bootstrap.usb_enable_settle_ms = 10;
            config.bootstrap.usb_poll_interval_ms = 10;
            config.bootstrap.discovery_min_scan_ms = 0;
            config.bootstrap.discovery_max_wait_ms = 50;
            config.bootstrap.discovery_poll_interval_ms = 10;
            config.bootstrap.adb_command_timeout_ms = 5_000;
            config.bootstrap.restart_debounce_ms = 50;
            config
        }
    }

    fn path_string(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    fn granted() -> Arc<InMemorySettings> {
        Arc::new(InMemorySettings::new(true).with_value(ADB_ENABLED, 1))
    }

    async fn wait_for_output(session: &ShellSession, needle: &str) -> String {
        let mut seen = String::new();
        for _ in 0..200 {
            seen = session.read_output();
            if seen.contains(needle) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        seen
    }

    #[tokio::test]
    async fn bootstrap_attaches_to_the_local_device() {
        let adb = FakeAdb::install("connected");
        let session = ShellSession::new(&adb.config(), granted(), Arc::new(DiscoveryState::new()))
            .expect("session");

        assert!(session.init_server().await);
        assert_eq!(session.state(), ConnectionState::Ready);
        assert!(session.shell_pid().await.is_some());

        let output = wait_for_output(&session, "Success!").await;
        assert!(output.contains("* Starting ADB server..."), "output was {output:?}");
        assert!(output.contains("Entered adb shell"), "output was {output:?}");

        let calls = adb.wait_for_call("shell").await;
        assert_eq!(calls[0], "start-server");
        assert_eq!(calls[1], "wait-for-device");
        assert_eq!(calls[2], "devices");
        assert_eq!(calls[3], "-s localhost:5555 shell");
    }

    #[tokio::test]
    async fn discovered_port_is_connected_over_localhost() {
        let adb = FakeAdb::install("connected to localhost:37123");
        let discovery = Arc::new(DiscoveryState::new());
        discovery.record_port(37123);
        let session = ShellSession::new(&adb.config(), granted(), discovery).expect("session");

        assert!(session.init_server().await);
        assert!(adb.calls().contains(&"connect localhost:37123".to_string()));
    }

    #[tokio::test]
    async fn refused_connect_fails_the_session() {
        let adb = FakeAdb::install("failed to connect to 'localhost:37123': Connection refused");
        let discovery = Arc::new(DiscoveryState::new());
        discovery.record_port(37123);
        let session = ShellSession::new(&adb.config(), granted(), discovery).expect("session");

        assert!(!session.init_server().await);
        assert!(matches!(session.state(), ConnectionState::Failed(_)));
        assert!(!session.is_bootstrapping());
        assert_eq!(session.shell_pid().await, None);
        assert!(session.read_output().contains("didn't connect"));
    }

    #[tokio::test]
    async fn missing_usage_stats_access_is_granted_from_the_shell() {
        let adb = FakeAdb::install("connected");
        let settings = Arc::new(
            InMemorySettings::new(true)
                .with_value(ADB_ENABLED, 1)
                .with_usage_stats_access(false),
        );
        let session = ShellSession::new(&adb.config(), settings, Arc::new(DiscoveryState::new()))
            .expect("session");
        assert!(session.init_server().await);
        let output = wait_for_output(&session, "Success!").await;
        assert!(output.contains("appops"), "output was {output:?}");
    }

    #[tokio::test]
    async fn allowed_usage_stats_access_is_left_alone() {
        let adb = FakeAdb::install("connected");
        let session = ShellSession::new(&adb.config(), granted(), Arc::new(DiscoveryState::new()))
            .expect("session");
        assert!(session.init_server().await);
        let output = wait_for_output(&session, "Success!").await;
        assert!(output.contains("Success!"), "output was {output:?}");
        assert!(!output.contains("appops"), "output was {output:?}");
    }

    #[tokio::test]
    async fn concurrent_bootstraps_spawn_one_shell() {
        let adb = FakeAdb::install("connected");
        let session = ShellSession::new(&adb.config(), granted(), Arc::new(DiscoveryState::new()))
            .expect("session");

        let (first, second) = tokio::join!(session.init_server(), session.init_server());
        assert!(first && second);
        assert_eq!(session.state(), ConnectionState::Ready);
        let pid = session.shell_pid().await;
        assert!(pid.is_some());
        let calls = adb.wait_for_call("shell").await;
        assert_eq!(calls.iter().filter(|call| call.ends_with("shell")).count(), 1);

        assert!(session.init_server().await);
        assert_eq!(session.shell_pid().await, pid);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let shells = adb.calls().iter().filter(|call| call.ends_with("shell")).count();
        assert_eq!(shells, 1);
    }

    #[tokio::test]
    async fn waits_in_failed_until_usb_debugging_is_enabled() {
        let adb = FakeAdb::install("connected");
        let settings = Arc::new(InMemorySettings::new(false).with_value(ADB_ENABLED, 0));
        let session = Arc::new(
            ShellSession::new(&adb.config(), settings.clone(), Arc::new(DiscoveryState::new()))
                .expect("session"),
        );
        let mut states = session.subscribe();

        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.init_server().await }
        });
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == ConnectionState::Failed(USB_DEBUGGING_DISABLED.to_string())),
        )
        .await
        .expect("failed state observed")
        .expect("channel open");
        assert!(session.is_bootstrapping());

        settings.set_value(ADB_ENABLED, 1);
        let ready = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("bootstrap finished")
            .expect("task");
        assert!(ready);
        assert_eq!(session.state(), ConnectionState::Ready);
        let output = wait_for_output(&session, "Success!").await;
        assert!(output.contains("Waiting for USB debugging"));
    }

    #[tokio::test]
    async fn secure_settings_are_prepared_before_connecting() {
        let adb = FakeAdb::install("connected");
        let settings = Arc::new(
            InMemorySettings::new(true)
                .with_value(MOBILE_DATA_ALWAYS_ON, 1)
                .with_value(ADB_ENABLED, 0),
        );
        let session = ShellSession::new(&adb.config(), settings.clone(), Arc::new(DiscoveryState::new()))
            .expect("session");

        assert!(session.init_server().await);
        assert!(!settings.is_enabled(MOBILE_DATA_ALWAYS_ON));
        assert!(settings.is_enabled(ADB_ENABLED));
    }

    #[tokio::test]
    async fn non_adb_shell_skips_the_adb_steps() {
        let adb = FakeAdb::install("connected");
        let mut config = adb.config();
        config.shell.auto_shell = false;
        let session = ShellSession::new(&config, granted(), Arc::new(DiscoveryState::new()))
            .expect("session");

        assert!(session.init_server().await);
        let output = wait_for_output(&session, "Entered non-adb shell").await;
        assert!(output.contains("Entered non-adb shell"), "output was {output:?}");
        assert!(adb.calls().is_empty());
    }

    #[tokio::test]
    async fn supervisor_restarts_a_dead_shell() {
        let adb = FakeAdb::install("connected");
        let session = Arc::new(
            ShellSession::new(&adb.config(), granted(), Arc::new(DiscoveryState::new()))
                .expect("session"),
        );
        assert!(session.init_server().await);
        let first_pid = session.shell_pid().await.expect("pid");
        let supervisor = session.spawn_supervisor();
        let mut states = session.subscribe();
        states.borrow_and_update();

        session.send_to_shell_process("exit").await;
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == ConnectionState::Connecting),
        )
        .await
        .expect("left ready")
        .expect("channel open");
        tokio::time::timeout(Duration::from_secs(5), states.wait_for(|state| state.is_ready()))
            .await
            .expect("ready again")
            .expect("channel open");

        let second_pid = session.shell_pid().await.expect("pid");
        assert_ne!(first_pid, second_pid);
        assert!(adb.calls().contains(&"kill-server".to_string()));
        supervisor.abort();
    }

    #[tokio::test]
    async fn shutdown_kills_the_shell() {
        let adb = FakeAdb::install("connected");
        let session = ShellSession::new(&adb.config(), granted(), Arc::new(DiscoveryState::new()))
            .expect("session");
        assert!(session.init_server().await);
        session.shutdown().await;
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.shell_pid().await, None);
        assert!(!session.try_send_to_shell_process("echo hi").await.expect("send"));
    }
}
