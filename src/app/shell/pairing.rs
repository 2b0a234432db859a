use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::error::AppError;
use crate::app::shell::session::ShellSession;
use crate::app::store::{KeyValueStore, PAIRED_KEY};

impl ShellSession {
    /// Runs `adb pair localhost:<port>` and types `code` into it once the prompt had time to
    /// appear. `true` when pair exited cleanly.
    pub async fn pair(&self, port: u16, code: &str) -> bool {
        let trace_id = Uuid::new_v4().to_string();
        match self.run_pair(port, code, &trace_id).await {
            Ok(exit_code) => {
                info!(trace_id = %trace_id, port, exit_code = ?exit_code, "adb pair finished");
                exit_code == Some(0)
            }
            Err(err) => {
                warn!(trace_id = %trace_id, port, error = %err, "adb pair failed");
                false
            }
        }
    }

    async fn run_pair(&self, port: u16, code: &str, trace_id: &str) -> Result<Option<i32>, AppError> {
        let address = format!("localhost:{port}");
        let mut child = self
            .adb
            .command(&["pair", address.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::system(format!("Failed to spawn adb pair: {err}"), trace_id))?;

        tokio::time::sleep(Duration::from_millis(self.pairing.code_delay_ms)).await;

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{code}\n");
            if let Err(err) = stdin.write_all(line.as_bytes()).await {
                warn!(trace_id, error = %err, "failed to write pairing code");
            }
            let _ = stdin.flush().await;
        }

        let timeout = Duration::from_millis(self.pairing.pair_timeout_ms);
        let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                return Err(AppError::system(format!("Failed to wait for adb pair: {err}"), trace_id))
            }
            Err(_) => {
                let _ = child.kill().await;
                None
            }
        };

        let kill_timeout = Duration::from_millis(self.pairing.kill_server_timeout_ms);
        if let Err(err) = self.adb.kill_server(kill_timeout, trace_id).await {
            warn!(trace_id, error = %err, "adb kill-server after pairing failed");
        }
        Ok(exit_code)
    }
}

pub fn has_paired_before(store: &dyn KeyValueStore) -> bool {
    store.get_bool(PAIRED_KEY).unwrap_or(false)
}

pub fn set_paired_before(store: &dyn KeyValueStore, paired: bool) -> Result<(), AppError> {
    store.set_bool(PAIRED_KEY, paired)
}
