use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::engine::{Command, Visibility};
use crate::schemas::attempt::{
    AnswerRequest, AttemptResponse, AttemptStarted, HostSignalResponse, NavigateRequest,
    VisibilityRequest,
};
use crate::services::attempts::{self, Attempt, DiscardOutcome};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", post(start_attempt).get(get_attempt).delete(discard_attempt))
        .route("/:id/answers", post(select_answer))
        .route("/:id/navigate", post(navigate))
        .route("/:id/submit", post(request_submit))
        .route("/:id/confirm", post(confirm_submit))
        .route("/:id/cancel", post(cancel_submit))
        .route("/:id/retry", post(retry_submit))
        .route("/:id/host/visibility", post(host_visibility))
        .route("/:id/host/unload", post(host_unload))
        .route("/:id/events", get(events))
}

async fn find_attempt(state: &AppState, attempt_id: &str) -> Result<Attempt, ApiError> {
    state.attempts().get(attempt_id).await.ok_or_else(|| ApiError::attempt_not_found(attempt_id))
}

async fn run_command(
    state: &AppState,
    attempt_id: String,
    command: Command,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = find_attempt(state, &attempt_id).await?;
    let snapshot = attempt.handle.execute(command).await?;
    Ok(Json(AttemptResponse { attempt_id, snapshot }))
}

/// `POST /attempts/{official_exam_id}`
async fn start_attempt(
    State(state): State<AppState>,
    Path(official_exam_id): Path<String>,
) -> Result<(StatusCode, Json<AttemptStarted>), ApiError> {
    let started = attempts::start_attempt(&state, &official_exam_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(AttemptStarted {
            attempt_id: started.attempt_id,
            duration_source: started.duration_source,
            questions: started.questions,
            snapshot: started.snapshot,
        }),
    ))
}

async fn get_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = find_attempt(&state, &attempt_id).await?;
    let snapshot = attempt.handle.snapshot();
    Ok(Json(AttemptResponse { attempt_id, snapshot }))
}

async fn discard_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.attempts().discard(&attempt_id).await {
        DiscardOutcome::Discarded => {
            tracing::info!(attempt_id = %attempt_id, "Attempt discarded");
            Ok(StatusCode::NO_CONTENT)
        }
        DiscardOutcome::NotFound => Err(ApiError::attempt_not_found(&attempt_id)),
        DiscardOutcome::StillRunning => {
            Err(ApiError::Conflict("Attempt is still running".to_string()))
        }
    }
}

async fn select_answer(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let command = Command::SelectAnswer {
        question_ref_id: payload.question_ref_id,
        option_id: payload.option_id,
    };
    run_command(&state, attempt_id, command).await
}

async fn navigate(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<NavigateRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    run_command(&state, attempt_id, Command::Navigate { index: payload.index }).await
}

async fn request_submit(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    run_command(&state, attempt_id, Command::RequestManualSubmit).await
}

async fn confirm_submit(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    run_command(&state, attempt_id, Command::ConfirmSubmit).await
}

async fn cancel_submit(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    run_command(&state, attempt_id, Command::CancelSubmit).await
}

async fn retry_submit(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptResponse>, ApiError> {
    run_command(&state, attempt_id, Command::RetrySubmit).await
}

async fn host_visibility(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<VisibilityRequest>,
) -> Result<Json<HostSignalResponse>, ApiError> {
    let attempt = find_attempt(&state, &attempt_id).await?;
    let accepted = attempt.host.visibility_changed(payload.visibility);
    if payload.visibility == Visibility::Hidden {
        tracing::info!(attempt_id = %attempt_id, accepted, "Host reported page hidden");
    }
    Ok(Json(HostSignalResponse { accepted }))
}

async fn host_unload(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Json<HostSignalResponse>, ApiError> {
    let attempt = find_attempt(&state, &attempt_id).await?;
    let accepted = attempt.host.unload_requested();
    tracing::info!(attempt_id = %attempt_id, accepted, "Host reported unload");
    Ok(Json(HostSignalResponse { accepted }))
}

/// Server-sent events: the current snapshot first, then every engine notification.
async fn events(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let attempt = find_attempt(&state, &attempt_id).await?;
    let notifications = attempt.handle.subscribe();

    let initial = Event::default()
        .event("snapshot")
        .json_data(attempt.handle.snapshot())
        .map_err(|err| ApiError::internal(err, "Failed to encode snapshot event"))?;

    let updates = BroadcastStream::new(notifications).filter_map(move |message| match message {
        Ok(notification) => Event::default().event("notification").json_data(notification).ok(),
        Err(err) => {
            tracing::warn!(attempt_id = %attempt_id, error = %err, "Event stream lagged");
            None
        }
    });

    let stream = tokio_stream::once(initial).chain(updates).map(Ok::<Event, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
