use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::shell::output::OutputBuffer;

/// The one interactive shell the session pipes commands into.
///
/// A background task owns the `Child` and waits on it; dropping the handle force-kills the
/// shell, so a `ShellProcess` never outlives the session slot that holds it.
pub struct ShellProcess {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited_rx: watch::Receiver<bool>,
}

impl ShellProcess {
    /// Spawns `command` with stdin piped and stdout+stderr appended to `output`.
    pub fn spawn(mut command: Command, output: &OutputBuffer, trace_id: &str) -> Result<Self, AppError> {
        let stdout = output.writer()?;
        let stderr = stdout
            .try_clone()
            .map_err(|err| AppError::system(format!("Failed to share output buffer: {err}"), trace_id))?;

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::system(format!("Failed to spawn shell: {err}"), trace_id))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        if stdin.is_none() {
            return Err(AppError::system("Failed to capture shell stdin", trace_id));
        }
        info!(trace_id, pid = ?pid, "shell process started");

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = watch::channel(false);
        tokio::spawn(Self::wait_for_exit(child, kill_rx, exited_tx, trace_id.to_string()));

        Ok(Self {
            pid,
            stdin,
            kill_tx: Some(kill_tx),
            exited_rx,
        })
    }

    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited_tx: watch::Sender<bool>,
        trace_id: String,
    ) {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => info!(trace_id = %trace_id, code = ?status.code(), "shell process exited"),
                Err(err) => warn!(trace_id = %trace_id, error = %err, "failed to wait for shell process"),
            },
            // Fires on an explicit kill and when the handle is dropped.
            _ = kill_rx => {
                if let Err(err) = child.kill().await {
                    warn!(trace_id = %trace_id, error = %err, "failed to kill shell process");
                }
                info!(trace_id = %trace_id, "shell process killed");
            }
        }
        let _ = exited_tx.send(true);
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        *self.exited_rx.borrow()
    }

    /// A receiver that turns `true` once the shell is gone.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited_rx.clone()
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), AppError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::system("Shell stdin is closed", ""))?;
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        stdin
            .write_all(&payload)
            .await
            .map_err(|err| AppError::system(format!("Failed to write to shell: {err}"), ""))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::system(format!("Failed to flush shell stdin: {err}"), ""))
    }

    pub fn kill(&mut self) {
        self.stdin.take();
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Resolves once `signal` reports an exit, or when its sender is gone.
pub async fn wait_for_exit_signal(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|exited| *exited).await;
}
