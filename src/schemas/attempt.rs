use serde::{Deserialize, Serialize};

use crate::engine::{
    DurationSource, OptionId, Question, QuestionRefId, SessionSnapshot, Visibility,
};

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerRequest {
    #[serde(alias = "questionRefId")]
    pub(crate) question_ref_id: QuestionRefId,
    #[serde(alias = "optionId")]
    pub(crate) option_id: OptionId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NavigateRequest {
    pub(crate) index: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VisibilityRequest {
    pub(crate) visibility: Visibility,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) attempt_id: String,
    #[serde(flatten)]
    pub(crate) snapshot: SessionSnapshot,
}

/// Returned once, when the attempt starts; carries what the UI needs to render.
#[derive(Debug, Serialize)]
pub(crate) struct AttemptStarted {
    pub(crate) attempt_id: String,
    pub(crate) duration_source: DurationSource,
    pub(crate) questions: Vec<Question>,
    #[serde(flatten)]
    pub(crate) snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub(crate) struct HostSignalResponse {
    pub(crate) accepted: bool,
}
