//! Dispatches inbound envelopes.

use crate::executor::{TaskExecutor, SHUTTING_DOWN};
use crate::gate::SessionGate;
use crate::outbox::Outbox;
use deskhand_types::{message_type, Envelope, SessionId, Task, TaskResult};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Routes decoded envelopes to their handlers.
///
/// Routing never blocks on task work: each task runs on its own tokio task
/// and reports through the [`Outbox`].
pub struct Router {
    executor: Arc<TaskExecutor>,
    outbox: Outbox,
    gate: SessionGate,
    tracker: TaskTracker,
}

impl Router {
    pub fn new(executor: Arc<TaskExecutor>, outbox: Outbox, gate: SessionGate) -> Self {
        Self {
            executor,
            outbox,
            gate,
            tracker: TaskTracker::new(),
        }
    }

    /// Handles one inbound text frame. Returns the envelope to write back
    /// immediately, if any.
    pub fn route(&self, frame: &str) -> Option<Envelope> {
        let envelope = match Envelope::from_json(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return None;
            }
        };

        match envelope.kind.as_str() {
            message_type::CHAT_CONTINUE => {
                self.dispatch(envelope);
                None
            }
            message_type::PING => Some(Envelope::pong()),
            other => {
                debug!(kind = %other, message_id = %envelope.message_id, "ignoring envelope");
                None
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let session_hint = envelope.payload.get("sessionId").cloned().map(SessionId::from);

        let task = match Task::from_payload(envelope.payload) {
            Ok(task) => task,
            Err(e) => {
                // A task without a session cannot be answered.
                match session_hint {
                    Some(session_id) => {
                        warn!(session_id = %session_id, error = %e, "invalid task payload");
                        self.report(TaskResult::failed(session_id, e.to_string()));
                    }
                    None => warn!(error = %e, "dropping task without sessionId"),
                }
                return;
            }
        };

        if self.tracker.is_closed() {
            warn!(session_id = %task.session_id, "shutting down, rejecting task");
            self.report(TaskResult::failed(task.session_id, SHUTTING_DOWN));
            return;
        }

        info!(session_id = %task.session_id, message_id = %envelope.message_id, "task received");

        let ticket = self.gate.ticket(&task.session_id.key());
        let executor = Arc::clone(&self.executor);
        let outbox = self.outbox.clone();

        self.tracker.spawn(async move {
            let _pass = ticket.enter().await;
            let session_id = task.session_id.clone();

            // Run on a separate task so a panicking capability still yields a result.
            let result = match tokio::spawn(async move { executor.execute(task).await }).await {
                Ok(result) => result,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "task aborted");
                    TaskResult::failed(session_id, format!("task aborted: {}", e))
                }
            };
            push_result(&outbox, &result);
        });
    }

    fn report(&self, result: TaskResult) {
        push_result(&self.outbox, &result);
    }

    /// Stops accepting tasks. In-flight tasks keep running.
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Ends tasks still waiting, capturing or deciding. Tasks already
    /// acting are left to finish.
    pub fn stop_pending(&self) {
        self.executor.stop_pending();
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Resolves once closed and every task has reported.
    pub async fn idle(&self) {
        self.tracker.wait().await;
    }
}

fn push_result(outbox: &Outbox, result: &TaskResult) {
    match Envelope::task_result(result) {
        Ok(envelope) => {
            outbox.push(envelope);
        }
        Err(e) => {
            error!(session_id = %result.session_id, error = %e, "failed to encode task result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorSettings;
    use crate::outbox::{outbox, OutboxReceiver};
    use crate::runner::{ActionRunner, RunnerSettings};
    use async_trait::async_trait;
    use deskhand_host::{ActuationError, Actuate, Capture, CaptureError};
    use deskhand_reasoning::{Decide, DecisionError, DecisionRequest};
    use deskhand_types::{Action, Decision};

    struct Stub;

    #[async_trait]
    impl Capture for Stub {
        async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
            Ok(vec![0x89])
        }
    }

    #[async_trait]
    impl Decide for Stub {
        async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
            Ok(Decision {
                text: "done".to_string(),
                actions: vec![],
            })
        }
    }

    #[async_trait]
    impl Actuate for Stub {
        async fn actuate(&self, _action: &Action) -> Result<(), ActuationError> {
            Ok(())
        }
    }

    fn router() -> (Router, OutboxReceiver) {
        let (tx, rx) = outbox();
        let executor = TaskExecutor::new(
            Arc::new(Stub),
            Arc::new(Stub),
            ActionRunner::new(Arc::new(Stub), RunnerSettings::default()),
            ExecutorSettings::default(),
        );
        (Router::new(Arc::new(executor), tx, SessionGate::new(4)), rx)
    }

    fn result_of(envelope: &Envelope) -> TaskResult {
        assert!(envelope.is(message_type::CHAT_CONTINUE_RESULT));
        serde_json::from_value(envelope.payload.clone()).unwrap()
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (router, _rx) = router();
        let reply = router.route(r#"{"type":"ping","payload":{}}"#).unwrap();
        assert!(reply.is(message_type::PONG));
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_are_ignored() {
        let (router, mut rx) = router();
        assert!(router.route(r#"{"type":"hub.status","payload":{}}"#).is_none());
        assert!(router.route("{not json").is_none());
        assert!(router.route(r#"{"payload":{}}"#).is_none());
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn task_produces_one_result() {
        let (router, mut rx) = router();
        let reply = router.route(
            r#"{"type":"agent.chat.continue","payload":{"sessionId":"s1","messages":[],"instructions":""}}"#,
        );
        assert!(reply.is_none());

        let result = result_of(&rx.recv().await.unwrap());
        assert!(result.success);
        assert_eq!(result.session_id, "s1");
        assert_eq!(result.response.as_deref(), Some("done"));

        router.close();
        router.idle().await;
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn invalid_task_with_session_gets_failure_result() {
        let (router, mut rx) = router();
        router.route(r#"{"type":"agent.chat.continue","payload":{"sessionId":"s2","messages":"oops"}}"#);

        let result = result_of(&rx.recv().await.unwrap());
        assert!(!result.success);
        assert_eq!(result.session_id, "s2");
        assert!(result.error.unwrap().contains("invalid task payload"));
    }

    #[tokio::test]
    async fn numeric_session_id_is_echoed_back() {
        let (router, mut rx) = router();
        router.route(
            r#"{"type":"agent.chat.continue","payload":{"sessionId":42,"messages":[],"instructions":""}}"#,
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["sessionId"], serde_json::json!(42));
        assert!(result_of(&envelope).success);
    }

    #[tokio::test]
    async fn invalid_task_with_non_string_session_gets_failure_result() {
        let (router, mut rx) = router();
        router.route(r#"{"type":"agent.chat.continue","payload":{"sessionId":7,"messages":{}}}"#);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["sessionId"], serde_json::json!(7));
        assert!(!result_of(&envelope).success);
    }

    #[tokio::test]
    async fn task_without_session_is_dropped() {
        let (router, mut rx) = router();
        router.route(r#"{"type":"agent.chat.continue","payload":{"messages":[]}}"#);
        assert!(rx.try_recv().is_none());
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn tasks_after_close_are_rejected_with_a_result() {
        let (router, mut rx) = router();
        router.close();
        router.route(r#"{"type":"agent.chat.continue","payload":{"sessionId":"late"}}"#);

        let result = result_of(&rx.try_recv().unwrap());
        assert!(!result.success);
        assert_eq!(result.session_id, "late");
    }
}
