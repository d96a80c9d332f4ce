use time::OffsetDateTime;

use crate::engine::DurationSource;

pub(crate) const DEFAULT_FALLBACK_DURATION_SECONDS: u64 = 2700;
pub(crate) const DEFAULT_MAX_SERVER_WINDOW_SECONDS: u64 = 3 * 60 * 60;
pub(crate) const DEFAULT_MAX_EXAM_DURATION_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DurationPolicy {
    pub(crate) fallback_seconds: u64,
    /// Server windows longer than this are treated as bogus.
    pub(crate) max_server_window_seconds: u64,
    /// Exam-defined limits above this are ignored like a missing one.
    pub(crate) max_exam_duration_seconds: u64,
}

impl Default for DurationPolicy {
    fn default() -> Self {
        Self {
            fallback_seconds: DEFAULT_FALLBACK_DURATION_SECONDS,
            max_server_window_seconds: DEFAULT_MAX_SERVER_WINDOW_SECONDS,
            max_exam_duration_seconds: DEFAULT_MAX_EXAM_DURATION_SECONDS,
        }
    }
}

/// Picks the attempt duration: the exam's own limit, then a sane server window,
/// then the fallback.
pub(crate) fn resolve_duration(
    policy: &DurationPolicy,
    duration_minutes: Option<f64>,
    window_start: Option<OffsetDateTime>,
    window_end: Option<OffsetDateTime>,
) -> (u64, DurationSource) {
    if let Some(minutes) = duration_minutes.filter(|value| value.is_finite() && *value > 0.0) {
        let seconds = (minutes * 60.0).round();
        if seconds <= policy.max_exam_duration_seconds as f64 {
            return (seconds as u64, DurationSource::ExamDefined);
        }
        tracing::warn!(
            duration_minutes = minutes,
            max_seconds = policy.max_exam_duration_seconds,
            "Ignoring out-of-range exam duration"
        );
    }

    if let (Some(start), Some(end)) = (window_start, window_end) {
        let window = (end - start).whole_seconds();
        if window > 0 && window as u64 <= policy.max_server_window_seconds {
            return (window as u64, DurationSource::ServerWindow);
        }
        tracing::debug!(window_seconds = window, "Ignoring out-of-range server window");
    }

    (policy.fallback_seconds, DurationSource::Fallback)
}
