//! Anthropic Messages API backend using the `computer` tool.

use crate::decide::{Decide, DecisionRequest};
use crate::error::DecisionError;
use async_trait::async_trait;
use base64::Engine;
use deskhand_types::{screen_coordinate, Action, Decision};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const API_VERSION: &str = "2023-06-01";
const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
const COMPUTER_TOOL_TYPE: &str = "computer_20241022";

/// User turn sent alongside the snapshot.
const SNAPSHOT_PROMPT: &str =
    "Here is the current IDE screen. Please analyze and help continue the conversation.";

/// Decides through the Anthropic Messages API.
pub struct AnthropicDecider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicDecider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, DecisionError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(API_VERSION),
        );
        headers.insert(
            "anthropic-beta",
            header::HeaderValue::from_static(COMPUTER_USE_BETA),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DecisionError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Points the backend at a different API host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn build_body(&self, request: &DecisionRequest) -> MessagesRequest {
        let snapshot = base64::engine::general_purpose::STANDARD.encode(&request.snapshot);
        let caps = &request.capabilities;

        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_output_tokens,
            system: request.system_prompt.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/png",
                            "data": snapshot,
                        }
                    },
                    {
                        "type": "text",
                        "text": SNAPSHOT_PROMPT,
                    }
                ]
            })],
            tools: vec![json!({
                "type": COMPUTER_TOOL_TYPE,
                "name": "computer",
                "display_width_px": caps.display_width_px,
                "display_height_px": caps.display_height_px,
                "display_number": caps.display_number,
            })],
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Value>,
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl Decide for AnthropicDecider {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DecisionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(DecisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DecisionError::Parse(e.to_string()))?;

        let mut decision = Decision::default();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => decision.text.push_str(&text),
                ContentBlock::ToolUse { input } => {
                    decision.actions.extend(actions_from_tool_input(&input))
                }
                ContentBlock::Other => {}
            }
        }

        tracing::debug!(
            model = %self.model,
            text_len = decision.text.len(),
            actions = decision.actions.len(),
            "received decision"
        );
        Ok(decision)
    }
}

/// Maps one `computer` tool call onto the action vocabulary.
///
/// Clicks that carry a coordinate become a pointer move followed by the
/// click. Tool actions with no counterpart (screenshots, drags, cursor
/// queries) become [`Action::Unsupported`] so they show up as failed
/// outcomes instead of disappearing.
pub fn actions_from_tool_input(input: &Value) -> Vec<Action> {
    let Some(name) = input.get("action").and_then(Value::as_str) else {
        // Inputs already shaped like the agent's own vocabulary.
        return vec![serde_json::from_value(input.clone()).unwrap_or(Action::Unsupported {
            kind: "unknown".to_string(),
        })];
    };

    let text = || {
        input
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let pointer = || {
        let coordinate = input.get("coordinate")?.as_array()?;
        let x = screen_coordinate(coordinate.first()?)?;
        let y = screen_coordinate(coordinate.get(1)?)?;
        Some(Action::MouseMove { x, y })
    };
    let click = |button: &str| Action::Click {
        button: button.to_string(),
    };

    match name {
        "mouse_move" => vec![pointer().unwrap_or(Action::Unsupported {
            kind: "mouse_move".to_string(),
        })],
        "left_click" | "right_click" | "middle_click" | "double_click" => {
            let mut actions: Vec<Action> = pointer().into_iter().collect();
            match name {
                "left_click" => actions.push(click("1")),
                "middle_click" => actions.push(click("2")),
                "right_click" => actions.push(click("3")),
                _ => {
                    actions.push(click("1"));
                    actions.push(click("1"));
                }
            }
            actions
        }
        "type" => vec![Action::Type { text: text() }],
        "key" => vec![Action::Key { key: text() }],
        other => vec![Action::Unsupported {
            kind: other.to_string(),
        }],
    }
}
