use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

fn describe() {
    describe_counter!(
        "exam_submissions_total",
        "Submission attempts against the exam backend, by origin and outcome"
    );
    describe_histogram!(
        "exam_submission_attempt_duration_seconds",
        Unit::Seconds,
        "Latency of a single submission attempt"
    );
    describe_counter!("exam_violations_total", "Integrity violations, by trigger");
    describe_counter!("http_requests_total", "HTTP responses, by status");
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
