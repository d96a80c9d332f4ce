use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::engine::{
    spawn_session, DurationSource, EngineDeps, HostSignals, Question, SessionHandle,
    SessionSnapshot,
};
use crate::services::exam_loader::LoadError;

/// A running attempt: the engine handle plus the host side of its integrity sources.
#[derive(Clone)]
pub(crate) struct Attempt {
    pub(crate) handle: SessionHandle,
    pub(crate) host: HostSignals,
}

pub(crate) struct StartedAttempt {
    pub(crate) attempt_id: String,
    pub(crate) duration_source: DurationSource,
    pub(crate) questions: Vec<Question>,
    pub(crate) snapshot: SessionSnapshot,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DiscardOutcome {
    Discarded,
    NotFound,
    StillRunning,
}

#[derive(Default)]
pub(crate) struct AttemptRegistry {
    attempts: RwLock<HashMap<String, Attempt>>,
}

impl AttemptRegistry {
    pub(crate) async fn insert(&self, attempt_id: String, attempt: Attempt) {
        self.attempts.write().await.insert(attempt_id, attempt);
    }

    pub(crate) async fn get(&self, attempt_id: &str) -> Option<Attempt> {
        self.attempts.read().await.get(attempt_id).cloned()
    }

    pub(crate) async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }

    async fn remove(&self, attempt_id: &str) -> Option<Attempt> {
        self.attempts.write().await.remove(attempt_id)
    }

    /// Only settled attempts (terminal, or failed for good) can be dropped.
    pub(crate) async fn discard(&self, attempt_id: &str) -> DiscardOutcome {
        let mut attempts = self.attempts.write().await;
        let Some(attempt) = attempts.get(attempt_id) else {
            return DiscardOutcome::NotFound;
        };
        if !attempt.handle.snapshot().is_settled() {
            return DiscardOutcome::StillRunning;
        }

        if let Some(attempt) = attempts.remove(attempt_id) {
            attempt.handle.shutdown();
        }
        DiscardOutcome::Discarded
    }

    /// Tears down every attempt's timer and monitor. Submissions already in flight
    /// are left to finish on their own.
    pub(crate) async fn shutdown_all(&self) {
        let mut attempts = self.attempts.write().await;
        for (attempt_id, attempt) in attempts.drain() {
            tracing::info!(
                attempt_id = %attempt_id,
                status = %attempt.handle.snapshot().status,
                "Stopping attempt"
            );
            attempt.handle.shutdown();
        }
    }
}

/// Loads the exam and starts its clock; the attempt is registered before returning.
pub(crate) async fn start_attempt(
    state: &AppState,
    official_exam_id: &str,
) -> Result<StartedAttempt, LoadError> {
    let session = state.loader().load_session(official_exam_id).await?;
    let duration_source = session.duration_source;
    let questions = session.questions.clone();

    let (host, visibility, unload) = HostSignals::channel();
    let deps = EngineDeps {
        clock: state.clock().clone(),
        gateway: state.gateway().clone(),
        visibility: Box::new(visibility),
        unload: Box::new(unload),
    };
    let settings = state.settings();
    let config = settings.engine().engine_config(settings.backend().request_timeout_seconds);
    let handle = spawn_session(session, deps, config);

    let attempt_id = Uuid::new_v4().to_string();
    let snapshot = handle.snapshot();
    tracing::info!(
        attempt_id = %attempt_id,
        official_exam_id,
        session_id = %snapshot.session_id,
        duration_seconds = snapshot.duration_seconds,
        "Attempt started"
    );

    let retention = settings.engine().attempt_retention();
    state.attempts().insert(attempt_id.clone(), Attempt { handle: handle.clone(), host }).await;
    tokio::spawn(evict_when_settled(state.clone(), attempt_id.clone(), handle, retention));

    Ok(StartedAttempt { attempt_id, duration_source, questions, snapshot })
}

/// Keeps a settled attempt readable for `retention`, then drops it and its engine.
async fn evict_when_settled(
    state: AppState,
    attempt_id: String,
    handle: SessionHandle,
    retention: Duration,
) {
    // An error means the engine was shut down, which already removed the entry.
    if handle.wait_for(SessionSnapshot::is_settled).await.is_err() {
        return;
    }
    tokio::time::sleep(retention).await;

    if let Some(attempt) = state.attempts().remove(&attempt_id).await {
        attempt.handle.shutdown();
        tracing::info!(
            attempt_id = %attempt_id,
            status = %attempt.handle.snapshot().status,
            "Evicted settled attempt"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{GatewayError, OptionId, QuestionRefId, SessionStatus};
    use crate::test_support::{test_state, test_state_with, ScriptedGateway};

    #[tokio::test(start_paused = true)]
    async fn start_registers_a_running_attempt() {
        let (state, _gateway) = test_state(2700, 3);

        let started = start_attempt(&state, "42").await.expect("started");
        assert_eq!(started.snapshot.status, SessionStatus::InProgress);
        assert_eq!(started.questions.len(), 3);
        assert_eq!(state.attempts().len().await, 1);

        assert_eq!(
            state.attempts().discard(&started.attempt_id).await,
            DiscardOutcome::StillRunning
        );
        assert_eq!(state.attempts().discard("missing").await, DiscardOutcome::NotFound);

        state.attempts().shutdown_all().await;
        assert_eq!(state.attempts().len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_attempts_are_evicted_after_retention() {
        let (state, gateway) = test_state(2700, 3);
        let started = start_attempt(&state, "42").await.expect("started");
        let attempt = state.attempts().get(&started.attempt_id).await.expect("registered");

        assert!(attempt.host.unload_requested());
        let done = attempt.handle.wait_for(|s| s.status.is_terminal()).await.unwrap();
        assert_eq!(done.status, SessionStatus::Violated);
        assert_eq!(gateway.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(state.attempts().len().await, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.attempts().len().await, 0);
        assert!(attempt.handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn permanently_failed_attempt_can_be_discarded() {
        let gateway =
            Arc::new(ScriptedGateway::always(Err(GatewayError::from_status(401, "expired"))));
        let state = test_state_with(40, 1, gateway.clone());
        let started = start_attempt(&state, "42").await.expect("started");
        let attempt = state.attempts().get(&started.attempt_id).await.expect("registered");

        attempt.handle.select_answer(QuestionRefId::from(1), OptionId::from(11)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        attempt.handle.request_manual_submit().await.unwrap();
        attempt.handle.confirm_submit().await.unwrap();

        let failed = attempt.handle.wait_for(|s| s.status == SessionStatus::Failed).await.unwrap();
        assert!(failed.is_settled());
        assert_eq!(
            state.attempts().discard(&started.attempt_id).await,
            DiscardOutcome::Discarded
        );
        assert_eq!(state.attempts().len().await, 0);

        while !attempt.handle.is_stopped() {
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_exam_is_reported_by_loader() {
        let (state, _gateway) = test_state(2700, 3);
        let err = start_attempt(&state, "missing").await.err();
        assert_eq!(err, Some(LoadError::NotFound("missing".into())));
    }
}
