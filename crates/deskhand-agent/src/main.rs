//! deskhand agent binary.
//!
//! Loads configuration, wires the desktop capabilities and the decision
//! service, then keeps a session open to the hub until SIGINT/SIGTERM.

use deskhand_agent::config::{self, Config};
use deskhand_agent::transport::WsConnector;
use deskhand_agent::{Agent, Capabilities};
use deskhand_host::{Actuate, DryRunActuator, ScrotCapture, XdotoolActuator};
use deskhand_reasoning::AnthropicDecider;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("DESKHAND_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn capabilities(config: &Config, api_key: &str) -> Result<Capabilities, String> {
    let mut capture = ScrotCapture::new(&config.host.scrot_path, &config.host.screenshot_dir);
    let actuator: Arc<dyn Actuate> = if config.host.dry_run {
        tracing::warn!("dry run enabled, actions will be logged but not performed");
        Arc::new(DryRunActuator)
    } else {
        let mut xdotool = XdotoolActuator::new(&config.host.xdotool_path);
        if let Some(display) = &config.host.display {
            xdotool = xdotool.with_display(display);
        }
        Arc::new(xdotool)
    };
    if let Some(display) = &config.host.display {
        capture = capture.with_display(display);
    }

    let decider = AnthropicDecider::new(api_key, &config.decider.model)
        .map_err(|e| e.to_string())?
        .with_base_url(&config.decider.base_url);

    Ok(Capabilities {
        capture: Arc::new(capture),
        decider: Arc::new(decider),
        actuator,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("deskhand.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("deskhand-agent: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "cannot start agent");
        return ExitCode::FAILURE;
    }

    let settings = match config.agent_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let api_key = config.decider.api_key.clone().unwrap_or_default();
    let capabilities = match capabilities(&config, &api_key) {
        Ok(capabilities) => capabilities,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize decision service");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        hub = %config.hub.url,
        model = %config.decider.model,
        max_concurrent = config.tasks.max_concurrent,
        "starting deskhand agent"
    );

    let agent = Agent::new(WsConnector::new(&config.hub.url), settings, capabilities);

    let shutdown = agent.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    agent.run().await;

    tracing::info!("deskhand agent shut down");
    ExitCode::SUCCESS
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
