//! Host capabilities for the deskhand agent.
//!
//! The agent core never touches the desktop directly. It goes through two
//! narrow traits defined here:
//!
//! - [`Capture`] returns a snapshot of the target environment as PNG bytes.
//! - [`Actuate`] performs one [`Action`](deskhand_types::Action).
//!
//! The bundled implementations shell out to `scrot` and `xdotool`, which is
//! how the agent drives a virtual X display inside its container. Tests and
//! embedders substitute their own implementations.

pub mod actuate;
pub mod capture;
pub mod error;

pub use actuate::{Actuate, DryRunActuator, XdotoolActuator};
pub use capture::{Capture, ScrotCapture};
pub use error::{ActuationError, CaptureError};
