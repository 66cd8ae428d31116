//! The per-task pipeline: capture, decide, act, assemble.

use crate::runner::ActionRunner;
use deskhand_host::Capture;
use deskhand_reasoning::{CapabilityDescription, Decide, DecisionRequest};
use deskhand_types::{SessionId, Task, TaskResult};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Used when a task carries no instructions.
pub const DEFAULT_INSTRUCTIONS: &str =
    "Help them complete their task based on the conversation context.";

/// Error text for a task whose snapshot could not be taken.
pub const CAPTURE_FAILED: &str = "capture failed";

/// Error text for a task stopped before it began acting.
pub const SHUTTING_DOWN: &str = "agent is shutting down";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Trailing conversation messages included in the prompt.
    pub history_window: usize,
    /// Pause between consecutive actions.
    pub action_pause: Duration,
    pub capture_timeout: Duration,
    pub decide_timeout: Duration,
    pub max_output_tokens: u32,
    pub capabilities: CapabilityDescription,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            history_window: 10,
            action_pause: Duration::from_millis(500),
            capture_timeout: Duration::from_secs(10),
            decide_timeout: Duration::from_secs(120),
            max_output_tokens: 4096,
            capabilities: CapabilityDescription::default(),
        }
    }
}

/// Runs tasks end to end. Shared by every in-flight task.
pub struct TaskExecutor {
    capture: Arc<dyn Capture>,
    decider: Arc<dyn Decide>,
    runner: ActionRunner,
    settings: ExecutorSettings,
    stop: CancellationToken,
}

impl TaskExecutor {
    pub fn new(
        capture: Arc<dyn Capture>,
        decider: Arc<dyn Decide>,
        runner: ActionRunner,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            capture,
            decider,
            runner,
            settings,
            stop: CancellationToken::new(),
        }
    }

    /// Stops every task that has not started acting yet; each reports
    /// [`SHUTTING_DOWN`]. A task already performing its actions runs the
    /// whole sequence.
    pub fn stop_pending(&self) {
        self.stop.cancel();
    }

    /// Produces the one result for `task`. Every failure is folded into the
    /// result.
    pub async fn execute(&self, task: Task) -> TaskResult {
        let session_id = task.session_id.clone();
        info!(session_id = %session_id, messages = task.messages.len(), "task started");

        let captured = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return stopped(session_id, "capture"),
            captured = tokio::time::timeout(self.settings.capture_timeout, self.capture.capture()) => captured,
        };
        let snapshot = match captured {
            Ok(Ok(bytes)) if !bytes.is_empty() => bytes,
            Ok(Ok(_)) => {
                warn!(session_id = %session_id, "capture returned no bytes");
                return TaskResult::failed(session_id, CAPTURE_FAILED);
            }
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "capture failed");
                return TaskResult::failed(session_id, CAPTURE_FAILED);
            }
            Err(_) => {
                warn!(session_id = %session_id, timeout = ?self.settings.capture_timeout, "capture timed out");
                return TaskResult::failed(session_id, CAPTURE_FAILED);
            }
        };

        let request = DecisionRequest {
            system_prompt: self.system_prompt(&task),
            snapshot,
            capabilities: self.settings.capabilities.clone(),
            max_output_tokens: self.settings.max_output_tokens,
        };

        let decided = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return stopped(session_id, "decide"),
            decided = tokio::time::timeout(self.settings.decide_timeout, self.decider.decide(request)) => decided,
        };
        let decision = match decided {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "decision failed");
                return TaskResult::failed(session_id, e.to_string());
            }
            Err(_) => {
                warn!(session_id = %session_id, timeout = ?self.settings.decide_timeout, "decision timed out");
                return TaskResult::failed(
                    session_id,
                    format!(
                        "decision timed out after {}s",
                        self.settings.decide_timeout.as_secs()
                    ),
                );
            }
        };

        // Past this check the action sequence always runs to the end.
        if self.stop.is_cancelled() {
            return stopped(session_id, "act");
        }

        let mut outcomes = Vec::with_capacity(decision.actions.len());
        for (i, action) in decision.actions.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.action_pause).await;
            }
            outcomes.push(self.runner.run(action).await);
        }

        let failed = outcomes.iter().filter(|o| !o.succeeded).count();
        info!(
            session_id = %session_id,
            actions = outcomes.len(),
            failed,
            "task completed"
        );
        TaskResult::completed(session_id, decision.text, outcomes)
    }

    /// Instructions for the decision service, followed by the trailing
    /// conversation window as pretty-printed JSON.
    pub fn system_prompt(&self, task: &Task) -> String {
        let instructions = match task.instructions.trim() {
            "" => DEFAULT_INSTRUCTIONS,
            given => given,
        };

        let mut prompt = String::from(
            "You are a computer-use agent helping to continue an IDE chat conversation.\n\n\
             The user was in the middle of a conversation in their IDE, and needs you to:\n",
        );
        let _ = writeln!(prompt, "{}", instructions);
        prompt.push_str(
            "\nYou can see the IDE screen and interact with it using computer-use tools.\n\
             Try to understand the context and provide helpful actions.\n\n\
             Previous conversation:\n",
        );

        let recent = task.recent_messages(self.settings.history_window);
        if recent.is_empty() {
            prompt.push_str("No previous messages");
        } else {
            match serde_json::to_string_pretty(recent) {
                Ok(json) => prompt.push_str(&json),
                Err(e) => {
                    warn!(session_id = %task.session_id, error = %e, "failed to serialize history");
                    prompt.push_str("No previous messages");
                }
            }
        }
        prompt.push('\n');
        prompt
    }
}

fn stopped(session_id: SessionId, phase: &'static str) -> TaskResult {
    warn!(session_id = %session_id, phase, "task stopped by shutdown");
    TaskResult::failed(session_id, SHUTTING_DOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerSettings;
    use async_trait::async_trait;
    use deskhand_host::{ActuationError, Actuate, CaptureError};
    use deskhand_reasoning::DecisionError;
    use deskhand_types::{Action, Decision};
    use serde_json::json;

    struct Blank;

    #[async_trait]
    impl Capture for Blank {
        async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
            Ok(vec![1])
        }
    }

    struct Nothing;

    #[async_trait]
    impl Decide for Nothing {
        async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
            Ok(Decision::default())
        }
    }

    #[async_trait]
    impl Actuate for Nothing {
        async fn actuate(&self, _action: &Action) -> Result<(), ActuationError> {
            Ok(())
        }
    }

    fn executor() -> TaskExecutor {
        TaskExecutor::new(
            Arc::new(Blank),
            Arc::new(Nothing),
            ActionRunner::new(Arc::new(Nothing), RunnerSettings::default()),
            ExecutorSettings::default(),
        )
    }

    fn task(messages: Vec<serde_json::Value>, instructions: &str) -> Task {
        Task {
            session_id: "s".into(),
            messages,
            instructions: instructions.to_string(),
        }
    }

    #[test]
    fn prompt_without_history_or_instructions_uses_fallbacks() {
        let prompt = executor().system_prompt(&task(vec![], ""));
        assert!(prompt.contains(DEFAULT_INSTRUCTIONS));
        assert!(prompt.contains("No previous messages"));
    }

    #[test]
    fn blank_instructions_count_as_missing() {
        let prompt = executor().system_prompt(&task(vec![], "   \n"));
        assert!(prompt.contains(DEFAULT_INSTRUCTIONS));
    }

    #[test]
    fn prompt_keeps_only_the_last_ten_messages_oldest_first() {
        let messages: Vec<_> = (0..15).map(|i| json!({"n": i})).collect();
        let prompt = executor().system_prompt(&task(messages, "reply to the reviewer"));

        assert!(prompt.contains("reply to the reviewer"));
        assert!(!prompt.contains(DEFAULT_INSTRUCTIONS));
        assert!(!prompt.contains("\"n\": 4\n"));
        let first = prompt.find("\"n\": 5\n").unwrap();
        let last = prompt.find("\"n\": 14\n").unwrap();
        assert!(first < last);
    }

    #[test]
    fn prompt_history_is_pretty_printed() {
        let prompt = executor().system_prompt(&task(vec![json!({"role": "user"})], ""));
        assert!(prompt.contains("[\n  {\n    \"role\": \"user\"\n  }\n]"));
    }

    #[tokio::test]
    async fn empty_decision_completes_with_no_actions() {
        let result = executor().execute(task(vec![], "")).await;
        assert!(result.success);
        assert_eq!(result.session_id, "s");
        assert_eq!(result.response.as_deref(), Some(""));
        assert_eq!(result.actions_taken, Some(vec![]));
    }

    #[tokio::test]
    async fn stopped_executor_fails_tasks_before_they_act() {
        let exec = executor();
        exec.stop_pending();

        let result = exec.execute(task(vec![], "")).await;
        assert!(!result.success);
        assert_eq!(result.session_id, "s");
        assert_eq!(result.error.as_deref(), Some(SHUTTING_DOWN));
        assert!(result.actions_taken.is_none());
    }
}
