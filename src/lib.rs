//! Timed assessment session engine.
//!
//! [`engine`] runs one student's exam attempt: the deadline clock, answer ledger,
//! integrity monitor and the single terminal submission. The rest of the crate hosts
//! engines behind an HTTP API backed by the exam backend.

pub(crate) mod api;
pub(crate) mod core;
pub mod engine;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::backend_client::BackendClient;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let backend = Arc::new(BackendClient::from_settings(&settings)?);
    let state = AppState::new(settings, backend.clone(), backend);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        backend = %state.settings().backend().base_url(),
        "Exam session engine listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(core::shutdown::shutdown_attempts_on_signal(state.clone()))
        .await?;

    Ok(())
}
