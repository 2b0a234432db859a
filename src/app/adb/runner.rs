use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command as AsyncCommand;

use crate::app::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr concatenated, lowercased, for failure-marker checks.
    pub fn combined_lower(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).to_lowercase()
    }
}

fn drain<R: Read + Send + 'static>(reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Blocking variant for callers that live outside the runtime (settings probes).
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Both pipes are drained in parallel; a chatty child would otherwise block on a full pipe
    // and trip the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::timeout(
                        format!("{program} {} timed out", args.join(" ")),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

/// Runs a prepared command to completion, killing it once `timeout` elapses.
pub async fn run_async_with_timeout(
    mut command: AsyncCommand,
    timeout: Duration,
    description: &str,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::system(format!("Failed to spawn {description}: {err}"), trace_id)
        })?;

    // Dropping the `wait_with_output` future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        }),
        Ok(Err(err)) => Err(AppError::system(
            format!("Failed to wait for {description}: {err}"),
            trace_id,
        )),
        Err(_) => Err(AppError::timeout(
            format!("{description} timed out after {}s", timeout.as_secs_f32()),
            trace_id,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        // Piped but undrained output would block the child once the pipe buffer fills.
        let args = vec![
            "-c".to_string(),
            "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done".to_string(),
        ];
        let output = run_command_with_timeout("sh", &args, Duration::from_secs(10), "trace")
            .expect("large output should complete");

        assert!(output.success());
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn run_command_with_timeout_reports_timeout_code() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_command_with_timeout("sh", &args, Duration::from_millis(100), "trace-t")
            .expect_err("should time out");
        assert!(err.is_timeout());
        assert_eq!(err.trace_id, "trace-t");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn async_runner_captures_both_streams() {
        let mut command = AsyncCommand::new("sh");
        command.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let output = run_async_with_timeout(command, Duration::from_secs(5), "sh", "trace")
            .await
            .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert!(output.combined_lower().contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn async_runner_times_out() {
        let mut command = AsyncCommand::new("sh");
        command.args(["-c", "sleep 5"]);
        let err = run_async_with_timeout(command, Duration::from_millis(100), "sleep", "trace")
            .await
            .expect_err("should time out");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn async_runner_reports_missing_binary() {
        let command = AsyncCommand::new("/definitely/not/a/real/adb");
        let err = run_async_with_timeout(command, Duration::from_secs(1), "adb", "trace")
            .await
            .expect_err("spawn should fail");
        assert_eq!(err.code, "ERR_SYSTEM");
    }
}
