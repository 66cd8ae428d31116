use crate::error::CaptureError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Timeout for one `scrot` invocation.
const SCROT_TIMEOUT: Duration = Duration::from_secs(5);

/// Takes a snapshot of the target environment.
#[async_trait]
pub trait Capture: Send + Sync {
    /// Returns the snapshot as PNG bytes. An empty snapshot is an error.
    async fn capture(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Captures the X display with `scrot`.
///
/// Every capture writes to its own file under `output_dir` so concurrent tasks
/// never read each other's snapshots. The file is removed once read.
#[derive(Debug)]
pub struct ScrotCapture {
    binary: PathBuf,
    output_dir: PathBuf,
    display: Option<String>,
    timeout: Duration,
    sequence: AtomicU64,
}

impl ScrotCapture {
    pub fn new(binary: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            display: None,
            timeout: SCROT_TIMEOUT,
            sequence: AtomicU64::new(0),
        }
    }

    /// Targets a specific X display (e.g. `:1`) instead of the inherited `DISPLAY`.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn next_path(&self) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.output_dir
            .join(format!("deskhand-{}-{}.png", std::process::id(), n))
    }
}

#[async_trait]
impl Capture for ScrotCapture {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        let path = self.next_path();

        let mut command = Command::new(&self.binary);
        command
            .arg("-o")
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(display) = &self.display {
            command.env("DISPLAY", display);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CaptureError::Timeout(self.timeout))?
            .map_err(CaptureError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Tool(format!(
                "{} ({})",
                stderr.trim(),
                output.status
            )));
        }

        let bytes = tokio::fs::read(&path).await.map_err(CaptureError::Read)?;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), "failed to remove snapshot file: {}", e);
        }

        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }

        tracing::debug!(bytes = bytes.len(), "captured snapshot");
        Ok(bytes)
    }
}
