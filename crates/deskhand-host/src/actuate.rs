use crate::error::ActuationError;
use async_trait::async_trait;
use deskhand_types::Action;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Performs one action against the target environment.
///
/// Implementations do not apply their own timeout. The caller bounds each
/// call and drops the future when the budget runs out, so anything spawned
/// must die with the future (see `kill_on_drop`).
#[async_trait]
pub trait Actuate: Send + Sync {
    async fn actuate(&self, action: &Action) -> Result<(), ActuationError>;
}

/// Drives the X display with `xdotool`.
#[derive(Debug, Clone)]
pub struct XdotoolActuator {
    binary: PathBuf,
    display: Option<String>,
}

impl XdotoolActuator {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// The `xdotool` arguments for one action.
    pub fn command_args(action: &Action) -> Result<Vec<String>, ActuationError> {
        let args = match action {
            Action::MouseMove { x, y } => vec!["mousemove".to_string(), x.to_string(), y.to_string()],
            Action::Click { button } => vec!["click".to_string(), button.clone()],
            // `--` keeps text starting with a dash from being read as a flag.
            Action::Type { text } => vec!["type".to_string(), "--".to_string(), text.clone()],
            Action::Key { key } => vec!["key".to_string(), key.clone()],
            Action::Unsupported { kind } => return Err(ActuationError::Unsupported(kind.clone())),
        };
        Ok(args)
    }
}

#[async_trait]
impl Actuate for XdotoolActuator {
    async fn actuate(&self, action: &Action) -> Result<(), ActuationError> {
        let args = Self::command_args(action)?;

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(display) = &self.display {
            command.env("DISPLAY", display);
        }

        let output = command.output().await.map_err(ActuationError::Spawn)?;
        if !output.status.success() {
            return Err(ActuationError::ExitStatus {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Logs actions instead of performing them.
///
/// Useful for exercising the hub protocol on a machine without a display.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunActuator;

#[async_trait]
impl Actuate for DryRunActuator {
    async fn actuate(&self, action: &Action) -> Result<(), ActuationError> {
        if !action.is_supported() {
            return Err(ActuationError::Unsupported(action.kind().to_string()));
        }
        tracing::info!(action = ?action, "dry run: skipping actuation");
        Ok(())
    }
}
