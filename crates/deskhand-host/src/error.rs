use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to run capture tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("capture tool failed: {0}")]
    Tool(String),

    #[error("capture timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to read snapshot: {0}")]
    Read(#[source] std::io::Error),

    #[error("capture produced an empty snapshot")]
    Empty,
}

#[derive(Error, Debug)]
pub enum ActuationError {
    #[error("unsupported action type: {0}")]
    Unsupported(String),

    #[error("failed to run actuation tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("actuation tool exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },
}
