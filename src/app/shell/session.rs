use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::client::AdbClient;
use crate::app::adb::discovery::DiscoveryProbe;
use crate::app::adb::locator::shell_adb_program;
use crate::app::adb::settings::SystemSettings;
use crate::app::config::{AppConfig, BootstrapSettings, PairingSettings, ShellSettings};
use crate::app::error::AppError;
use crate::app::models::ConnectionState;
use crate::app::shell::output::{OutputBuffer, OutputWatcher};
use crate::app::shell::process::{wait_for_exit_signal, ShellProcess};

const BOOTSTRAP_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the local ADB shell: its connection state, the one live process and its output file.
pub struct ShellSession {
    pub(super) adb: AdbClient,
    pub(super) shell_settings: ShellSettings,
    pub(super) bootstrap: BootstrapSettings,
    pub(super) pairing: PairingSettings,
    pub(super) settings: Arc<dyn SystemSettings>,
    pub(super) discovery: Arc<dyn DiscoveryProbe>,
    pub(super) output: Arc<OutputBuffer>,
    state_tx: watch::Sender<ConnectionState>,
    bootstrapping: AtomicBool,
    pub(super) process: Mutex<Option<ShellProcess>>,
}

/// Clears the in-flight flag on every exit path, cancellation included.
pub(super) struct BootstrapGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BootstrapGuard<'a> {
    pub(super) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BootstrapGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ShellSession {
    pub fn new(
        config: &AppConfig,
        settings: Arc<dyn SystemSettings>,
        discovery: Arc<dyn DiscoveryProbe>,
    ) -> Result<Self, AppError> {
        let home_dir = config.shell.resolved_home_dir();
        let tmp_dir = config.shell.resolved_tmp_dir();
        for dir in [&home_dir, &tmp_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                AppError::system(format!("Failed to create {}: {err}", dir.display()), "")
            })?;
        }
        let output = OutputBuffer::create(config.shell.output_buffer_size)?;
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            adb: AdbClient::new(
                shell_adb_program(&config.shell.adb_path, &config.shell.native_library_dir),
                home_dir,
                tmp_dir,
            ),
            shell_settings: config.shell.clone(),
            bootstrap: config.bootstrap.clone(),
            pairing: config.pairing.clone(),
            settings,
            discovery,
            output: Arc::new(output),
            state_tx,
            bootstrapping: AtomicBool::new(false),
            process: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub(super) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                info!(from = ?current, to = ?state, "connection state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    pub(super) fn begin_bootstrap(&self) -> Option<BootstrapGuard<'_>> {
        BootstrapGuard::acquire(&self.bootstrapping)
    }

    pub fn adb(&self) -> &AdbClient {
        &self.adb
    }

    pub fn output(&self) -> Arc<OutputBuffer> {
        Arc::clone(&self.output)
    }

    pub fn read_output(&self) -> String {
        self.output.read_tail()
    }

    pub fn clear_output(&self) -> Result<(), AppError> {
        self.output.clear()
    }

    /// Starts publishing the output tail at the configured poll interval.
    pub fn watch_output(&self) -> OutputWatcher {
        OutputWatcher::spawn(
            self.output(),
            Duration::from_millis(self.shell_settings.output_poll_interval_ms),
        )
    }

    /// Logs `message` and appends it to the output file as a `*` line.
    pub fn debug(&self, message: &str) {
        info!("{message}");
        self.output.append_note(message);
    }

    pub async fn shell_pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|process| process.pid())
    }

    pub async fn has_live_process(&self) -> bool {
        self.process
            .lock()
            .await
            .as_ref()
            .map(|process| !process.has_exited())
            .unwrap_or(false)
    }

    /// Pipes `command` into the shell; does nothing when no shell is running.
    pub async fn send_to_shell_process(&self, command: &str) {
        if let Err(err) = self.try_send_to_shell_process(command).await {
            warn!(error = %err, "failed to send command to shell");
        }
    }

    /// Like [`Self::send_to_shell_process`], but reports `Ok(false)` without a shell and
    /// surfaces write failures.
    pub async fn try_send_to_shell_process(&self, command: &str) -> Result<bool, AppError> {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            Some(process) => {
                process.write_line(command).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Restarts the shell whenever it dies. Never returns; abort the task to stop it.
    pub async fn wait_for_death_and_reset(&self) {
        loop {
            if self.is_bootstrapping() {
                tokio::time::sleep(BOOTSTRAP_BACKOFF).await;
                continue;
            }

            let exit_signal = self
                .process
                .lock()
                .await
                .as_ref()
                .map(|process| process.exit_signal());
            if let Some(signal) = exit_signal {
                wait_for_exit_signal(signal).await;
            }

            let trace_id = Uuid::new_v4().to_string();
            self.set_state(ConnectionState::Connecting);
            self.process.lock().await.take();
            self.debug("Shell is dead, resetting...");
            if let Err(err) = self
                .adb
                .kill_server(self.bootstrap.adb_command_timeout(), &trace_id)
                .await
            {
                warn!(trace_id = %trace_id, error = %err, "adb kill-server failed");
            }

            tokio::time::sleep(self.bootstrap.restart_debounce()).await;
            self.init_server().await;
        }
    }

    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.wait_for_death_and_reset().await })
    }

    /// Kills the live shell and returns to `Idle`.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            process.kill();
        }
        self.set_state(ConnectionState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::discovery::DiscoveryState;
    use crate::app::adb::settings::InMemorySettings;

    fn session() -> (tempfile::TempDir, ShellSession) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.shell.home_dir = dir.path().join("files").to_string_lossy().to_string();
        config.shell.tmp_dir = dir.path().join("cache").to_string_lossy().to_string();
        let session = ShellSession::new(
            &config,
            Arc::new(InMemorySettings::new(true)),
            Arc::new(DiscoveryState::new()),
        )
        .expect("session");
        (dir, session)
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = BootstrapGuard::acquire(&flag).expect("first");
        assert!(BootstrapGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(BootstrapGuard::acquire(&flag).is_some());
    }

    #[tokio::test]
    async fn starts_idle_and_creates_private_dirs() {
        let (dir, session) = session();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(dir.path().join("files").is_dir());
        assert!(dir.path().join("cache").is_dir());
        assert_eq!(session.shell_pid().await, None);
    }

    #[tokio::test]
    async fn sending_without_a_shell_is_a_no_op() {
        let (_dir, session) = session();
        session.send_to_shell_process("echo hi").await;
        assert!(!session.try_send_to_shell_process("echo hi").await.expect("send"));
    }

    #[tokio::test]
    async fn debug_lines_show_up_in_the_tail() {
        let (_dir, session) = session();
        session.debug("Starting ADB server...");
        assert_eq!(session.read_output(), "* Starting ADB server...\n");
        session.clear_output().expect("clear");
        assert_eq!(session.read_output(), "");
    }

    #[tokio::test]
    async fn state_changes_are_published_once() {
        let (_dir, session) = session();
        let mut rx = session.subscribe();
        session.set_state(ConnectionState::Connecting);
        assert!(rx.has_changed().expect("open"));
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
        session.set_state(ConnectionState::Connecting);
        assert!(!rx.has_changed().expect("open"));
    }
}
