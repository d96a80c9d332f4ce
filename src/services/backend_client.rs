use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::core::config::Settings;
use crate::engine::{ExamSession, GatewayError, SubmissionGateway, SubmissionPayload};
use crate::schemas::backend::SessionEnvelope;
use crate::services::exam_loader::{build_exam_session, ExamLoader, LoadError};
use crate::services::session_timing::DurationPolicy;

/// HTTP client for the exam backend; serves as both loader and submission gateway.
#[derive(Debug, Clone)]
pub(crate) struct BackendClient {
    client: Client,
    base_url: String,
    api_token: String,
    duration_policy: DurationPolicy,
}

impl BackendClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = settings.backend();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(backend.connect_timeout_seconds))
            .timeout(Duration::from_secs(backend.request_timeout_seconds))
            .build()
            .context("Failed to build exam backend HTTP client")?;

        Ok(Self {
            client,
            base_url: backend.base_url().to_string(),
            api_token: backend.api_token.clone(),
            duration_policy: settings.engine().duration_policy(),
        })
    }

    fn exam_url(&self, official_exam_id: &str, action: &str) -> String {
        format!("{}/official-exams/{}/{}", self.base_url, official_exam_id, action)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_token)
        }
    }
}

#[async_trait]
impl ExamLoader for BackendClient {
    async fn load_session(&self, official_exam_id: &str) -> Result<ExamSession, LoadError> {
        let endpoint = self.exam_url(official_exam_id, "session");
        let response = self
            .authorized(self.client.get(&endpoint))
            .send()
            .await
            .map_err(|err| LoadError::Network(describe_transport_error(&err)))?;

        let status = response.status();
        let raw_body = response.text().await.map_err(|err| LoadError::Network(err.to_string()))?;

        if !status.is_success() {
            let detail = extract_error_message(&raw_body);
            return Err(match status {
                StatusCode::NOT_FOUND => LoadError::NotFound(official_exam_id.to_string()),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LoadError::Unauthorized(status.as_u16())
                }
                _ => LoadError::Backend { status: status.as_u16(), detail },
            });
        }

        let envelope: SessionEnvelope =
            serde_json::from_str(&raw_body).map_err(|err| LoadError::Malformed(err.to_string()))?;
        let session = build_exam_session(official_exam_id, envelope, &self.duration_policy);

        tracing::info!(
            official_exam_id,
            session_id = %session.session_id,
            duration_seconds = session.duration_seconds,
            duration_source = ?session.duration_source,
            questions = session.questions.len(),
            "Exam session loaded"
        );
        Ok(session)
    }
}

#[async_trait]
impl SubmissionGateway for BackendClient {
    async fn submit(
        &self,
        official_exam_id: &str,
        payload: &SubmissionPayload,
    ) -> Result<(), GatewayError> {
        let endpoint = self.exam_url(official_exam_id, "submit");
        let response = self
            .authorized(self.client.post(&endpoint))
            .json(payload)
            .send()
            .await
            .map_err(|err| GatewayError::Network(describe_transport_error(&err)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let raw_body = response.text().await.unwrap_or_default();
        Err(GatewayError::from_status(status.as_u16(), extract_error_message(&raw_body)))
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn extract_error_message(raw_body: &str) -> String {
    let Ok(payload) = serde_json::from_str::<Value>(raw_body) else {
        let trimmed = raw_body.trim();
        return if trimmed.is_empty() { "unknown_error".to_string() } else { trimmed.to_string() };
    };

    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
