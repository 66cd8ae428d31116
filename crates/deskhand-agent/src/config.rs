//! Agent configuration loading from file and environment variables.

use crate::executor::ExecutorSettings;
use crate::policy::{ReconnectPolicy, ReconnectPolicyError};
use crate::runner::RunnerSettings;
use crate::supervisor::SupervisorConfig;
use crate::AgentSettings;
use deskhand_reasoning::CapabilityDescription;
use deskhand_types::Credentials;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Hub connection and credentials.
    #[serde(default)]
    pub hub: HubConfig,

    /// Reconnect delay policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Task execution limits.
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Decision service settings.
    #[serde(default)]
    pub decider: DeciderConfig,

    /// Local capture and actuation tools.
    #[serde(default)]
    pub host: HostConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize)]
pub struct HubConfig {
    /// WebSocket URL of the hub.
    #[serde(default = "default_hub_url")]
    pub url: String,

    #[serde(default = "default_tool")]
    pub tool: String,

    #[serde(default = "default_platform")]
    pub platform: String,

    /// Key presented in the `auth` envelope.
    #[serde(default = "default_hub_api_key")]
    pub api_key: String,

    /// How long to wait for the handshake response.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay after a failed connection or handshake.
    #[serde(default = "default_after_failure_ms")]
    pub after_failure_ms: u64,

    /// Delay after an established connection drops.
    #[serde(default = "default_after_disconnect_ms")]
    pub after_disconnect_ms: u64,

    /// Growth factor across consecutive failures; 1.0 keeps the delay fixed.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Cap on the failure delay.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// How many trailing conversation messages are sent to the decision service.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Pause between consecutive actions.
    #[serde(default = "default_action_pause_ms")]
    pub action_pause_ms: u64,

    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,

    #[serde(default = "default_decide_timeout_secs")]
    pub decide_timeout_secs: u64,

    /// Tasks allowed to run at once across all sessions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long shutdown waits for in-flight tasks to report.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct DeciderConfig {
    /// Anthropic API key. Required.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_decider_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_display_width")]
    pub display_width: u32,

    #[serde(default = "default_display_height")]
    pub display_height: u32,

    #[serde(default = "default_display_number")]
    pub display_number: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_scrot_path")]
    pub scrot_path: String,

    #[serde(default = "default_xdotool_path")]
    pub xdotool_path: String,

    /// Directory for transient snapshot files.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: String,

    /// X display to drive (e.g. ":1"). Inherited from the environment when unset.
    #[serde(default)]
    pub display: Option<String>,

    /// Log actions instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "deskhand_agent=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_hub_url() -> String {
    "ws://localhost:3002".to_string()
}

fn default_tool() -> String {
    "computer-use-agent".to_string()
}

fn default_platform() -> String {
    "docker".to_string()
}

fn default_hub_api_key() -> String {
    "computer-use-agent-key".to_string()
}

fn default_auth_timeout_secs() -> u64 {
    10
}

fn default_after_failure_ms() -> u64 {
    5_000
}

fn default_after_disconnect_ms() -> u64 {
    2_000
}

fn default_factor() -> f64 {
    1.0
}

fn default_max_ms() -> u64 {
    60_000
}

fn default_history_window() -> usize {
    10
}

fn default_action_pause_ms() -> u64 {
    500
}

fn default_capture_timeout_secs() -> u64 {
    10
}

fn default_decide_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent() -> usize {
    4
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_decider_base_url() -> String {
    deskhand_reasoning::anthropic::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    deskhand_reasoning::anthropic::DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_display_width() -> u32 {
    1920
}

fn default_display_height() -> u32 {
    1080
}

fn default_display_number() -> u32 {
    1
}

fn default_scrot_path() -> String {
    "scrot".to_string()
}

fn default_xdotool_path() -> String {
    "xdotool".to_string()
}

fn default_screenshot_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: default_hub_url(),
            tool: default_tool(),
            platform: default_platform(),
            api_key: default_hub_api_key(),
            auth_timeout_secs: default_auth_timeout_secs(),
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("url", &self.url)
            .field("tool", &self.tool)
            .field("platform", &self.platform)
            .field("api_key", &"[REDACTED]")
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .finish()
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            after_failure_ms: default_after_failure_ms(),
            after_disconnect_ms: default_after_disconnect_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            action_pause_ms: default_action_pause_ms(),
            capture_timeout_secs: default_capture_timeout_secs(),
            decide_timeout_secs: default_decide_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_decider_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            display_number: default_display_number(),
        }
    }
}

impl fmt::Debug for DeciderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeciderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("display_width", &self.display_width)
            .field("display_height", &self.display_height)
            .field("display_number", &self.display_number)
            .finish()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            scrot_path: default_scrot_path(),
            xdotool_path: default_xdotool_path(),
            screenshot_dir: default_screenshot_dir(),
            display: None,
            dry_run: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A credential the agent cannot start without is missing.
    #[error("missing required credential: {0}")]
    MissingCredential(&'static str),

    /// The reconnect settings describe an invalid policy.
    #[error("invalid reconnect policy: {0}")]
    Reconnect(#[from] ReconnectPolicyError),
}

impl Config {
    /// Checks the startup requirements. A failure here is the only fatal
    /// condition in the agent's life.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.decider.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingCredential("ANTHROPIC_API_KEY")),
        }
        if self.hub.url.trim().is_empty() {
            return Err(ConfigError::MissingCredential("DESKHAND_HUB_URL"));
        }
        self.reconnect_policy()?;
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.hub.tool, &self.hub.platform, &self.hub.api_key)
    }

    pub fn reconnect_policy(&self) -> Result<ReconnectPolicy, ReconnectPolicyError> {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect.after_failure_ms),
            Duration::from_millis(self.reconnect.after_disconnect_ms),
            self.reconnect.factor,
            Duration::from_millis(self.reconnect.max_ms),
        )
    }

    pub fn capabilities(&self) -> CapabilityDescription {
        CapabilityDescription::desktop(
            self.decider.display_width,
            self.decider.display_height,
            self.decider.display_number,
        )
    }

    /// Runtime settings for [`Agent`](crate::Agent).
    pub fn agent_settings(&self) -> Result<AgentSettings, ConfigError> {
        Ok(AgentSettings {
            supervisor: SupervisorConfig {
                credentials: self.credentials(),
                policy: self.reconnect_policy()?,
                auth_timeout: Duration::from_secs(self.hub.auth_timeout_secs),
                drain_timeout: Duration::from_secs(self.tasks.drain_timeout_secs),
            },
            executor: ExecutorSettings {
                history_window: self.tasks.history_window,
                action_pause: Duration::from_millis(self.tasks.action_pause_ms),
                capture_timeout: Duration::from_secs(self.tasks.capture_timeout_secs),
                decide_timeout: Duration::from_secs(self.tasks.decide_timeout_secs),
                max_output_tokens: self.decider.max_tokens,
                capabilities: self.capabilities(),
            },
            runner: RunnerSettings::default(),
            max_concurrent_tasks: self.tasks.max_concurrent,
        })
    }
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// Environment variable overrides:
/// - `DESKHAND_HUB_URL` (or the legacy `TERMINALWON_HUB_URL`) overrides `hub.url`
/// - `DESKHAND_HUB_API_KEY` overrides `hub.api_key`
/// - `ANTHROPIC_API_KEY` overrides `decider.api_key`
/// - `DESKHAND_MODEL` overrides `decider.model`
/// - `DESKHAND_DISPLAY` overrides `host.display`
/// - `DESKHAND_DRY_RUN` overrides `host.dry_run` (set to "true" to enable)
/// - `DESKHAND_LOG_LEVEL` overrides `logging.level`
/// - `DESKHAND_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let is_true = |value: &str| value == "true" || value == "1";

    if let Some(url) = lookup("DESKHAND_HUB_URL").or_else(|| lookup("TERMINALWON_HUB_URL")) {
        config.hub.url = url;
    }
    if let Some(key) = lookup("DESKHAND_HUB_API_KEY") {
        config.hub.api_key = key;
    }
    if let Some(key) = lookup("ANTHROPIC_API_KEY") {
        config.decider.api_key = Some(key);
    }
    if let Some(model) = lookup("DESKHAND_MODEL") {
        config.decider.model = model;
    }
    if let Some(display) = lookup("DESKHAND_DISPLAY") {
        config.host.display = Some(display);
    }
    if let Some(dry_run) = lookup("DESKHAND_DRY_RUN") {
        config.host.dry_run = is_true(&dry_run);
    }
    if let Some(level) = lookup("DESKHAND_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("DESKHAND_LOG_JSON") {
        config.logging.json = is_true(&json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.hub.url, "ws://localhost:3002");
        assert_eq!(config.hub.tool, "computer-use-agent");
        assert_eq!(config.hub.platform, "docker");
        assert_eq!(config.hub.auth_timeout_secs, 10);
        assert_eq!(config.reconnect.after_failure_ms, 5_000);
        assert_eq!(config.reconnect.after_disconnect_ms, 2_000);
        assert_eq!(config.tasks.history_window, 10);
        assert_eq!(config.tasks.action_pause_ms, 500);
        assert_eq!(config.decider.max_tokens, 4096);
        assert!(config.decider.api_key.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/nonexistent/deskhand.toml")).unwrap();
        assert_eq!(config.tasks.max_concurrent, 4);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[hub]\nurl = \"wss://hub.example:9000\"\n\n[reconnect]\nfactor = 2.0\n\n[logging]\njson = true"
        )
        .unwrap();

        let mut config: Config =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        apply_env_overrides(&mut config, env(&[]));

        assert_eq!(config.hub.url, "wss://hub.example:9000");
        assert_eq!(config.hub.platform, "docker");
        assert_eq!(config.reconnect.factor, 2.0);
        assert_eq!(config.reconnect.after_failure_ms, 5_000);
        assert!(config.logging.json);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hub\nurl = ").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("TERMINALWON_HUB_URL", "ws://legacy:1"),
                ("ANTHROPIC_API_KEY", "sk-test"),
                ("DESKHAND_DRY_RUN", "1"),
                ("DESKHAND_LOG_LEVEL", "debug"),
            ]),
        );

        assert_eq!(config.hub.url, "ws://legacy:1");
        assert_eq!(config.decider.api_key.as_deref(), Some("sk-test"));
        assert!(config.host.dry_run);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn new_hub_variable_wins_over_legacy_one() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("TERMINALWON_HUB_URL", "ws://legacy:1"),
                ("DESKHAND_HUB_URL", "ws://current:2"),
            ]),
        );
        assert_eq!(config.hub.url, "ws://current:2");
    }

    #[test]
    fn validation_requires_decision_api_key() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential("ANTHROPIC_API_KEY"))
        ));

        config.decider.api_key = Some("   ".to_string());
        assert!(config.validate().is_err());

        config.decider.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_delays() {
        let mut config = Config::default();
        config.decider.api_key = Some("sk-test".to_string());
        config.reconnect.after_disconnect_ms = 0;

        assert!(matches!(config.validate(), Err(ConfigError::Reconnect(_))));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = Config::default();
        config.hub.api_key = "hub-secret".to_string();
        config.decider.api_key = Some("sk-secret".to_string());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hub-secret"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn agent_settings_carry_configured_durations() {
        let mut config = Config::default();
        config.tasks.action_pause_ms = 250;
        config.hub.auth_timeout_secs = 3;

        let settings = config.agent_settings().unwrap();
        assert_eq!(settings.executor.action_pause, Duration::from_millis(250));
        assert_eq!(settings.supervisor.auth_timeout, Duration::from_secs(3));
        assert_eq!(settings.supervisor.credentials.tool, "computer-use-agent");
        assert_eq!(settings.max_concurrent_tasks, 4);
    }
}
