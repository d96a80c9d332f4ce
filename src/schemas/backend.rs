use serde::Deserialize;
use time::OffsetDateTime;

use crate::engine::{EntityId, Question};

/// `GET /official-exams/{id}/session` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionEnvelope {
    #[serde(default, alias = "session_id", alias = "id")]
    pub(crate) session_id: Option<EntityId>,
    #[serde(default, alias = "start_time", with = "time::serde::rfc3339::option")]
    pub(crate) start_time: Option<OffsetDateTime>,
    #[serde(default, alias = "end_time", with = "time::serde::rfc3339::option")]
    pub(crate) end_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub(crate) exam: Option<ExamMeta>,
    #[serde(default)]
    pub(crate) questions: Vec<Question>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExamMeta {
    #[serde(default, alias = "durationMinutes")]
    pub(crate) duration_minutes: Option<f64>,
}
