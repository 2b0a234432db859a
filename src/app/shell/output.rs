use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tempfile::{Builder, TempPath};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::error::AppError;

/// Rolling tail over the temp file the shell's stdout and stderr are appended to.
///
/// The file is removed when the buffer is dropped.
#[derive(Debug)]
pub struct OutputBuffer {
    path: TempPath,
    buffer_size: usize,
}

impl OutputBuffer {
    pub fn create(buffer_size: usize) -> Result<Self, AppError> {
        let file = Builder::new()
            .prefix("buffer")
            .suffix(".txt")
            .tempfile()
            .map_err(|err| AppError::system(format!("Failed to create output buffer: {err}"), ""))?;
        Ok(Self {
            path: file.into_temp_path(),
            buffer_size: buffer_size.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Opens an append handle for a child's stdout/stderr.
    pub fn writer(&self) -> Result<File, AppError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| AppError::system(format!("Failed to open output buffer: {err}"), ""))
    }

    /// Appends a `* message` line, the way bootstrap progress shows up next to shell output.
    pub fn append_note(&self, message: &str) {
        if !self.path.exists() {
            return;
        }
        let result = self.writer().and_then(|mut file| {
            FileExt::lock_exclusive(&file)
                .map_err(|err| AppError::system(format!("Failed to lock output buffer: {err}"), ""))?;
            let written = writeln!(file, "* {message}");
            let _ = FileExt::unlock(&file);
            written.map_err(|err| AppError::system(format!("Failed to append note: {err}"), ""))
        });
        if let Err(err) = result {
            debug!(error = %err, "output note dropped");
        }
    }

    pub fn read_tail(&self) -> String {
        read_tail(&self.path, self.buffer_size)
    }

    pub fn clear(&self) -> Result<(), AppError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|err| AppError::system(format!("Failed to open output buffer: {err}"), ""))?;
        FileExt::lock_exclusive(&file)
            .map_err(|err| AppError::system(format!("Failed to lock output buffer: {err}"), ""))?;
        let result = file.set_len(0);
        let _ = FileExt::unlock(&file);
        result.map_err(|err| AppError::system(format!("Failed to clear output buffer: {err}"), ""))
    }
}

/// Returns the whole file when it fits in `limit`, else exactly its last `limit` bytes.
///
/// A missing or unreadable file reads as empty; a concurrent writer may leave a torn last line.
pub fn read_tail(path: &Path, limit: usize) -> String {
    match read_tail_bytes(path, limit) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to read output buffer");
            }
            String::new()
        }
    }
}

pub fn read_tail_bytes(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    FileExt::lock_shared(&file)?;
    let result = (|| -> std::io::Result<Vec<u8>> {
        let size = file.metadata()?.len();
        let limit = limit as u64;
        let mut out = Vec::new();
        if size <= limit {
            file.read_to_end(&mut out)?;
        } else {
            file.seek(SeekFrom::Start(size - limit))?;
            Read::by_ref(&mut file).take(limit).read_to_end(&mut out)?;
        }
        Ok(out)
    })();
    let _ = FileExt::unlock(&file);
    result
}

/// Polls the output tail and publishes it whenever it changes; aborted on drop.
pub struct OutputWatcher {
    rx: watch::Receiver<String>,
    handle: JoinHandle<()>,
}

impl OutputWatcher {
    pub fn spawn(buffer: Arc<OutputBuffer>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(String::new());
        let handle = tokio::spawn(async move {
            loop {
                let path: PathBuf = buffer.path().to_path_buf();
                let limit = buffer.buffer_size();
                let text = match tokio::task::spawn_blocking(move || read_tail(&path, limit)).await {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "output poll task failed");
                        String::new()
                    }
                };
                tx.send_if_modified(|current| {
                    if *current != text {
                        *current = text;
                        true
                    } else {
                        false
                    }
                });
                tokio::time::sleep(interval).await;
            }
        });
        Self { rx, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.rx.clone()
    }

    pub fn latest(&self) -> String {
        self.rx.borrow().clone()
    }
}

impl Drop for OutputWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
