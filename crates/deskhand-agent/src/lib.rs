//! deskhand worker agent.
//!
//! Keeps a session open to a hub, executes the tasks it dispatches against
//! the local desktop and reports one result per task.

pub mod config;
pub mod executor;
pub mod gate;
pub mod handshake;
pub mod outbox;
pub mod policy;
pub mod router;
pub mod runner;
pub mod supervisor;
pub mod transport;

use deskhand_host::{Actuate, Capture};
use deskhand_reasoning::Decide;
use executor::{ExecutorSettings, TaskExecutor};
use gate::SessionGate;
use router::Router;
use runner::{ActionRunner, RunnerSettings};
use std::sync::Arc;
use supervisor::{ConnectionState, Supervisor, SupervisorConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use transport::Connector;

/// The capabilities a task pipeline drives.
#[derive(Clone)]
pub struct Capabilities {
    pub capture: Arc<dyn Capture>,
    pub decider: Arc<dyn Decide>,
    pub actuator: Arc<dyn Actuate>,
}

/// Runtime settings for every component.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub supervisor: SupervisorConfig,
    pub executor: ExecutorSettings,
    pub runner: RunnerSettings,
    /// Tasks allowed to run at once across all sessions.
    pub max_concurrent_tasks: usize,
}

/// A fully wired agent, ready to run.
pub struct Agent<C> {
    supervisor: Supervisor<C>,
    shutdown: CancellationToken,
}

impl<C: Connector> Agent<C> {
    pub fn new(connector: C, settings: AgentSettings, capabilities: Capabilities) -> Self {
        let (outbox, outbox_rx) = outbox::outbox();
        let runner = ActionRunner::new(capabilities.actuator, settings.runner);
        let executor = TaskExecutor::new(
            capabilities.capture,
            capabilities.decider,
            runner,
            settings.executor,
        );
        let router = Router::new(
            Arc::new(executor),
            outbox,
            SessionGate::new(settings.max_concurrent_tasks),
        );

        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(
            connector,
            settings.supervisor,
            router,
            outbox_rx,
            shutdown.clone(),
        );

        Self {
            supervisor,
            shutdown,
        }
    }

    /// Cancelling this token stops the agent.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    /// Runs until shutdown, then waits for in-flight tasks to report.
    pub async fn run(self) {
        self.supervisor.run().await;
    }
}
