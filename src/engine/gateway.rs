use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::engine::types::{SubmissionOrigin, SubmissionPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    Auth,
    Server,
    Network,
    Validation,
}

impl GatewayErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayErrorKind::Auth => "auth_error",
            GatewayErrorKind::Server => "server_error",
            GatewayErrorKind::Network => "network_error",
            GatewayErrorKind::Validation => "validation_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("credentials rejected ({status}): {detail}")]
    Auth { status: u16, detail: String },
    #[error("backend error ({status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("payload rejected ({status}): {detail}")]
    Validation { status: u16, detail: String },
}

impl GatewayError {
    /// Maps a non-success HTTP status onto the retry taxonomy.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => GatewayError::Auth { status, detail },
            408 | 429 => GatewayError::Server { status, detail },
            500..=599 => GatewayError::Server { status, detail },
            _ => GatewayError::Validation { status, detail },
        }
    }

    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::Auth { .. } => GatewayErrorKind::Auth,
            GatewayError::Server { .. } => GatewayErrorKind::Server,
            GatewayError::Network(_) => GatewayErrorKind::Network,
            GatewayError::Validation { .. } => GatewayErrorKind::Validation,
        }
    }

    /// Server and network failures may succeed on a verbatim resend.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), GatewayErrorKind::Server | GatewayErrorKind::Network)
    }
}

/// The backend submit endpoint.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn submit(
        &self,
        official_exam_id: &str,
        payload: &SubmissionPayload,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub forced_max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            forced_max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Manual submissions get one shot; the student retries explicitly.
    pub fn max_attempts(&self, origin: SubmissionOrigin) -> u32 {
        if origin.is_forced() {
            self.forced_max_attempts.max(1)
        } else {
            1
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub attempts: u32,
    pub result: Result<(), GatewayError>,
}

/// Sends one prepared payload, resending it unchanged on transient failures.
///
/// Every attempt is bounded by `policy.timeout`; expiry counts as a network error.
pub async fn submit_with_retry(
    gateway: &dyn SubmissionGateway,
    official_exam_id: &str,
    origin: SubmissionOrigin,
    payload: &SubmissionPayload,
    policy: &RetryPolicy,
) -> SubmissionReport {
    let max_attempts = policy.max_attempts(origin);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let started = Instant::now();
        let result =
            match tokio::time::timeout(policy.timeout, gateway.submit(official_exam_id, payload))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Network(format!(
                    "no response within {}s",
                    policy.timeout.as_secs()
                ))),
            };

        let outcome = match &result {
            Ok(()) => "success",
            Err(err) => err.kind().as_str(),
        };
        metrics::counter!(
            "exam_submissions_total",
            "origin" => origin.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("exam_submission_attempt_duration_seconds", "origin" => origin.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::info!(
                    official_exam_id,
                    origin = origin.as_str(),
                    attempt,
                    answers = payload.answers.len(),
                    "Submission accepted"
                );
                return SubmissionReport { attempts: attempt, result: Ok(()) };
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    official_exam_id,
                    origin = origin.as_str(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Submission failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(
                    official_exam_id,
                    origin = origin.as_str(),
                    attempt,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Submission failed"
                );
                return SubmissionReport { attempts: attempt, result: Err(err) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGateway;

    #[test]
    fn status_classification() {
        assert_eq!(GatewayError::from_status(401, "").kind(), GatewayErrorKind::Auth);
        assert_eq!(GatewayError::from_status(403, "").kind(), GatewayErrorKind::Auth);
        assert_eq!(GatewayError::from_status(422, "").kind(), GatewayErrorKind::Validation);
        assert_eq!(GatewayError::from_status(400, "").kind(), GatewayErrorKind::Validation);
        assert_eq!(GatewayError::from_status(429, "").kind(), GatewayErrorKind::Server);
        assert_eq!(GatewayError::from_status(503, "").kind(), GatewayErrorKind::Server);
        assert!(GatewayError::Network("reset".into()).is_transient());
        assert!(!GatewayError::from_status(401, "").is_transient());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(9), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_submission_retries_transient_failures() {
        let gateway = ScriptedGateway::new(vec![
            Err(GatewayError::from_status(502, "bad gateway")),
            Err(GatewayError::Network("reset".into())),
            Ok(()),
        ]);
        let payload = SubmissionPayload::violation();

        let report = submit_with_retry(
            &gateway,
            "exam-1",
            SubmissionOrigin::Deadline,
            &payload,
            &RetryPolicy::default(),
        )
        .await;

        assert_eq!(report.result, Ok(()));
        assert_eq!(report.attempts, 3);
        let calls = gateway.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, sent)| sent == &payload));
    }

    #[tokio::test(start_paused = true)]
    async fn forced_submission_gives_up_after_cap() {
        let gateway = ScriptedGateway::always(Err(GatewayError::from_status(500, "boom")));
        let policy = RetryPolicy { forced_max_attempts: 3, ..RetryPolicy::default() };

        let report = submit_with_retry(
            &gateway,
            "exam-1",
            SubmissionOrigin::Violation,
            &SubmissionPayload::violation(),
            &policy,
        )
        .await;

        assert_eq!(report.attempts, 3);
        assert!(matches!(report.result, Err(GatewayError::Server { status: 500, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let gateway = ScriptedGateway::always(Err(GatewayError::from_status(401, "expired")));

        let report = submit_with_retry(
            &gateway,
            "exam-1",
            SubmissionOrigin::Deadline,
            &SubmissionPayload::violation(),
            &RetryPolicy::default(),
        )
        .await;

        assert_eq!(report.attempts, 1);
        assert!(matches!(report.result, Err(GatewayError::Auth { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_submission_is_sent_once() {
        let gateway = ScriptedGateway::always(Err(GatewayError::Network("down".into())));

        let report = submit_with_retry(
            &gateway,
            "exam-1",
            SubmissionOrigin::Manual,
            &SubmissionPayload { answers: vec![], cheating_detected: None },
            &RetryPolicy::default(),
        )
        .await;

        assert_eq!(report.attempts, 1);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_backend_times_out_as_network_error() {
        let gateway = ScriptedGateway::hanging();
        let policy = RetryPolicy { forced_max_attempts: 2, ..RetryPolicy::default() };

        let report = submit_with_retry(
            &gateway,
            "exam-1",
            SubmissionOrigin::Deadline,
            &SubmissionPayload::violation(),
            &policy,
        )
        .await;

        assert_eq!(report.attempts, 2);
        assert!(matches!(report.result, Err(GatewayError::Network(_))));
    }
}
