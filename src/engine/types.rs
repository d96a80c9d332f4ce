use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier as issued by the exam backend. Numeric ids stay numeric on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(value) => write!(f, "{value}"),
            EntityId::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionRefId(pub EntityId);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionId(pub EntityId);

impl From<i64> for QuestionRefId {
    fn from(value: i64) -> Self {
        Self(EntityId::Number(value))
    }
}

impl From<&str> for QuestionRefId {
    fn from(value: &str) -> Self {
        Self(EntityId::Text(value.to_string()))
    }
}

impl From<i64> for OptionId {
    fn from(value: i64) -> Self {
        Self(EntityId::Number(value))
    }
}

impl From<&str> for OptionId {
    fn from(value: &str) -> Self {
        Self(EntityId::Text(value.to_string()))
    }
}

impl fmt::Display for QuestionRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    #[serde(alias = "option_id", alias = "id")]
    pub option_id: OptionId,
    /// Display content, passed through untouched.
    #[serde(flatten)]
    pub content: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(alias = "question_ref_id", alias = "id")]
    pub question_ref_id: QuestionRefId,
    #[serde(default)]
    pub score: f64,
    #[serde(default, alias = "option_list", alias = "options")]
    pub option_list: Vec<QuestionOption>,
    #[serde(flatten)]
    pub content: serde_json::Map<String, serde_json::Value>,
}

impl Question {
    pub fn has_option(&self, option_id: &OptionId) -> bool {
        self.option_list.iter().any(|option| &option.option_id == option_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    ExamDefined,
    ServerWindow,
    Fallback,
}

/// One student's attempt, as handed over by the loader.
#[derive(Debug, Clone)]
pub struct ExamSession {
    pub session_id: String,
    pub official_exam_id: String,
    pub duration_seconds: u64,
    pub duration_source: DurationSource,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    InProgress,
    AwaitingConfirmation,
    Submitting,
    Submitted,
    TimedOut,
    Violated,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Loading => "loading",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::AwaitingConfirmation => "awaiting_confirmation",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Submitted => "submitted",
            SessionStatus::TimedOut => "timed_out",
            SessionStatus::Violated => "violated",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Submitted | SessionStatus::TimedOut | SessionStatus::Violated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOrigin {
    Manual,
    Deadline,
    Violation,
}

impl SubmissionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionOrigin::Manual => "manual",
            SubmissionOrigin::Deadline => "deadline",
            SubmissionOrigin::Violation => "violation",
        }
    }

    pub fn is_forced(self) -> bool {
        !matches!(self, SubmissionOrigin::Manual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_ref_id: QuestionRefId,
    pub option_id: OptionId,
}

/// Body of the backend submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub answers: Vec<AnswerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheating_detected: Option<bool>,
}

impl SubmissionPayload {
    pub fn violation() -> Self {
        Self { answers: Vec::new(), cheating_detected: Some(true) }
    }
}

/// A payload bound to the path that produced it. Retries reuse it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSubmission {
    pub origin: SubmissionOrigin,
    pub payload: SubmissionPayload,
}
