use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::engine::{
    DurationSource, ExamSession, GatewayError, OptionId, Question, QuestionOption, QuestionRefId,
    SubmissionGateway, SubmissionPayload,
};
use crate::services::exam_loader::{ExamLoader, LoadError};

pub(crate) const TEST_EXAM_ID: &str = "42";

pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn set_test_env() {
    std::env::set_var("ENGINE_ENV", "test");
    std::env::set_var("ENGINE_STRICT_CONFIG", "0");
    std::env::set_var("BACKEND_BASE_URL", "http://127.0.0.1:9/api");
    std::env::remove_var("BACKEND_API_TOKEN");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "API_V1_STR",
        "TICK_INTERVAL_MS",
        "LOW_TIME_WARNING_SECONDS",
        "FORCED_SUBMIT_MAX_ATTEMPTS",
        "SUBMIT_RETRY_BASE_DELAY_MS",
        "SUBMIT_RETRY_MAX_DELAY_MS",
        "FALLBACK_DURATION_SECONDS",
        "MAX_SERVER_WINDOW_SECONDS",
        "MAX_EXAM_DURATION_SECONDS",
        "ATTEMPT_RETENTION_SECONDS",
        "BACKEND_REQUEST_TIMEOUT_SECONDS",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) fn test_settings() -> Settings {
    let _guard = env_lock();
    set_test_env();
    Settings::load().expect("settings")
}

/// Question `n` has options `n*10+1 ..= n*10+4`.
pub(crate) fn questions(count: usize) -> Vec<Question> {
    (1..=count as i64)
        .map(|id| Question {
            question_ref_id: QuestionRefId::from(id),
            score: 1.0,
            option_list: (1..=4)
                .map(|offset| QuestionOption {
                    option_id: OptionId::from(id * 10 + offset),
                    content: serde_json::Map::new(),
                })
                .collect(),
            content: serde_json::Map::new(),
        })
        .collect()
}

pub(crate) fn exam_session(duration_seconds: u64, question_count: usize) -> ExamSession {
    ExamSession {
        session_id: "session-1".to_string(),
        official_exam_id: TEST_EXAM_ID.to_string(),
        duration_seconds,
        duration_source: DurationSource::ExamDefined,
        questions: questions(question_count),
    }
}

enum Script {
    Steps(Mutex<VecDeque<Result<(), GatewayError>>>),
    Always(Result<(), GatewayError>),
    Hang,
}

/// In-memory gateway that records every call and replays scripted outcomes.
pub(crate) struct ScriptedGateway {
    script: Script,
    calls: Mutex<Vec<(String, SubmissionPayload)>>,
}

impl ScriptedGateway {
    /// Replays `steps` in order, then succeeds.
    pub(crate) fn new(steps: Vec<Result<(), GatewayError>>) -> Self {
        Self::with_script(Script::Steps(Mutex::new(steps.into())))
    }

    pub(crate) fn always(result: Result<(), GatewayError>) -> Self {
        Self::with_script(Script::Always(result))
    }

    pub(crate) fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    fn with_script(script: Script) -> Self {
        Self { script, calls: Mutex::new(Vec::new()) }
    }

    pub(crate) fn calls(&self) -> Vec<(String, SubmissionPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionGateway for ScriptedGateway {
    async fn submit(
        &self,
        official_exam_id: &str,
        payload: &SubmissionPayload,
    ) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push((official_exam_id.to_string(), payload.clone()));
        match &self.script {
            Script::Steps(steps) => steps.lock().unwrap().pop_front().unwrap_or(Ok(())),
            Script::Always(result) => result.clone(),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Serves one exam under [`TEST_EXAM_ID`]; everything else is not found.
pub(crate) struct FakeLoader {
    duration_seconds: u64,
    question_count: usize,
}

impl FakeLoader {
    pub(crate) fn new(duration_seconds: u64, question_count: usize) -> Self {
        Self { duration_seconds, question_count }
    }
}

#[async_trait]
impl ExamLoader for FakeLoader {
    async fn load_session(&self, official_exam_id: &str) -> Result<ExamSession, LoadError> {
        if official_exam_id != TEST_EXAM_ID {
            return Err(LoadError::NotFound(official_exam_id.to_string()));
        }
        Ok(exam_session(self.duration_seconds, self.question_count))
    }
}

pub(crate) fn test_state(
    duration_seconds: u64,
    question_count: usize,
) -> (AppState, Arc<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::always(Ok(())));
    let state = test_state_with(duration_seconds, question_count, gateway.clone());
    (state, gateway)
}

pub(crate) fn test_state_with(
    duration_seconds: u64,
    question_count: usize,
    gateway: Arc<ScriptedGateway>,
) -> AppState {
    AppState::new(
        test_settings(),
        Arc::new(FakeLoader::new(duration_seconds, question_count)),
        gateway,
    )
}

pub(crate) fn test_app(state: &AppState) -> Router {
    api::router::router(state.clone())
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
