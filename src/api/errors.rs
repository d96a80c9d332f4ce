use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::{CommandError, RejectReason};
use crate::services::exam_loader::LoadError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    NotFound(String),
    Conflict(String),
    Gone(String),
    /// The engine refused a command; `code` is machine-readable.
    Rejected(RejectReason),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn attempt_not_found(attempt_id: &str) -> Self {
        Self::NotFound(format!("Attempt {attempt_id} not found"))
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Rejected(reason) => ApiError::Rejected(reason),
            CommandError::Stopped => ApiError::Gone("Attempt is no longer running".to_string()),
        }
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound(id) => ApiError::NotFound(format!("Exam {id} not found")),
            other => {
                tracing::error!(error = %other, "Failed to load exam session");
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

fn rejection_status(reason: &RejectReason) -> StatusCode {
    match reason {
        RejectReason::InvalidState { .. } | RejectReason::RetryNotAllowed { .. } => {
            StatusCode::CONFLICT
        }
        RejectReason::Incomplete { .. }
        | RejectReason::TooEarly { .. }
        | RejectReason::Ledger(_)
        | RejectReason::IndexOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn error_response(status: StatusCode, detail: String, code: Option<&'static str>) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), detail, code })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => error_response(StatusCode::NOT_FOUND, message, None),
            ApiError::Conflict(message) => error_response(StatusCode::CONFLICT, message, None),
            ApiError::Gone(message) => error_response(StatusCode::GONE, message, None),
            ApiError::Rejected(reason) => {
                tracing::debug!(code = reason.code(), reason = %reason, "Command rejected");
                error_response(rejection_status(&reason), reason.to_string(), Some(reason.code()))
            }
            ApiError::BadGateway(message) => {
                error_response(StatusCode::BAD_GATEWAY, message, None)
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, message, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_json;

    #[tokio::test]
    async fn rejection_carries_code() {
        let response =
            ApiError::Rejected(RejectReason::TooEarly { wait_seconds: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let json = read_json(response).await;
        assert_eq!(json["status"], 422);
        assert_eq!(json["code"], "time_not_eligible");
    }

    #[tokio::test]
    async fn plain_errors_omit_code() {
        let response = ApiError::attempt_not_found("a-1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = read_json(response).await;
        assert_eq!(json["detail"], "Attempt a-1 not found");
        assert!(json.get("code").is_none());
    }
}
