use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::{EntityId, ExamSession};
use crate::schemas::backend::SessionEnvelope;
use crate::services::session_timing::{resolve_duration, DurationPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum LoadError {
    #[error("exam {0} not found")]
    NotFound(String),
    #[error("exam backend rejected credentials ({0})")]
    Unauthorized(u16),
    #[error("exam backend error ({status}): {detail}")]
    Backend { status: u16, detail: String },
    #[error("exam backend unreachable: {0}")]
    Network(String),
    #[error("malformed session payload: {0}")]
    Malformed(String),
}

/// Fetches exam metadata and the question set for one attempt.
#[async_trait]
pub(crate) trait ExamLoader: Send + Sync {
    async fn load_session(&self, official_exam_id: &str) -> Result<ExamSession, LoadError>;
}

pub(crate) fn build_exam_session(
    official_exam_id: &str,
    envelope: SessionEnvelope,
    policy: &DurationPolicy,
) -> ExamSession {
    let duration_minutes = envelope.exam.and_then(|exam| exam.duration_minutes);
    let (duration_seconds, duration_source) =
        resolve_duration(policy, duration_minutes, envelope.start_time, envelope.end_time);

    let session_id = match envelope.session_id {
        Some(EntityId::Text(id)) if !id.trim().is_empty() => id,
        Some(EntityId::Number(id)) => id.to_string(),
        _ => {
            let generated = format!("{official_exam_id}-{}", Uuid::new_v4());
            tracing::warn!(
                official_exam_id,
                session_id = %generated,
                "Backend did not return a session id; using a local one"
            );
            generated
        }
    };

    ExamSession {
        session_id,
        official_exam_id: official_exam_id.to_string(),
        duration_seconds,
        duration_source,
        questions: envelope.questions,
    }
}
