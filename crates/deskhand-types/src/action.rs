//! The action vocabulary and per-action outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Button used by a click when the decision does not name one.
const DEFAULT_BUTTON: &str = "1";

/// One requested interaction with the target environment.
///
/// The vocabulary is closed. A tag outside it decodes to
/// [`Action::Unsupported`] instead of failing, so one bad action never takes
/// the rest of a decision down with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAction", into = "RawAction")]
pub enum Action {
    /// Move the pointer to absolute screen coordinates.
    MouseMove { x: i64, y: i64 },
    /// Click a pointer button (`"1"` left, `"2"` middle, `"3"` right).
    Click { button: String },
    /// Type literal text.
    Type { text: String },
    /// Press a key or key combination by keysym (e.g. `Return`, `ctrl+s`).
    Key { key: String },
    /// Anything outside the vocabulary. Never actuated.
    Unsupported { kind: String },
}

impl Action {
    /// The wire tag of this action.
    pub fn kind(&self) -> &str {
        match self {
            Self::MouseMove { .. } => "mouse_move",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Key { .. } => "key",
            Self::Unsupported { kind } => kind,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

/// Description of one supported action and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub parameters: &'static [&'static str],
}

/// The closed action vocabulary.
pub const VOCABULARY: &[ActionSpec] = &[
    ActionSpec {
        name: "mouse_move",
        parameters: &["x", "y"],
    },
    ActionSpec {
        name: "click",
        parameters: &["button"],
    },
    ActionSpec {
        name: "type",
        parameters: &["text"],
    },
    ActionSpec {
        name: "key",
        parameters: &["key"],
    },
];

/// Flat wire shape shared by every action variant.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawAction {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    button: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

/// Reads a screen coordinate, rounding fractional values to the nearest pixel.
pub fn screen_coordinate(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

fn coordinate(value: Option<&Value>) -> i64 {
    value.and_then(screen_coordinate).unwrap_or(0)
}

impl From<RawAction> for Action {
    fn from(raw: RawAction) -> Self {
        match raw.kind.as_str() {
            "mouse_move" => Self::MouseMove {
                x: coordinate(raw.x.as_ref()),
                y: coordinate(raw.y.as_ref()),
            },
            "click" => Self::Click {
                button: match raw.button {
                    Some(Value::String(s)) => s,
                    Some(Value::Number(n)) => n.to_string(),
                    _ => DEFAULT_BUTTON.to_string(),
                },
            },
            "type" => Self::Type {
                text: raw.text.unwrap_or_default(),
            },
            "key" => Self::Key {
                key: raw.key.unwrap_or_default(),
            },
            _ => Self::Unsupported { kind: raw.kind },
        }
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        match action {
            Action::MouseMove { x, y } => Self {
                kind: "mouse_move".to_string(),
                x: Some(Value::from(x)),
                y: Some(Value::from(y)),
                ..Default::default()
            },
            Action::Click { button } => Self {
                kind: "click".to_string(),
                button: Some(Value::String(button)),
                ..Default::default()
            },
            Action::Type { text } => Self {
                kind: "type".to_string(),
                text: Some(text),
                ..Default::default()
            },
            Action::Key { key } => Self {
                kind: "key".to_string(),
                key: Some(key),
                ..Default::default()
            },
            Action::Unsupported { kind } => Self {
                kind,
                ..Default::default()
            },
        }
    }
}

/// The record of one attempted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    pub succeeded: bool,
}

impl ActionOutcome {
    pub fn new(action: Action, succeeded: bool) -> Self {
        Self { action, succeeded }
    }
}
