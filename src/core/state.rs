use std::sync::Arc;

use crate::core::config::Settings;
use crate::engine::{ClockSource, SubmissionGateway, TokioClock};
use crate::services::attempts::AttemptRegistry;
use crate::services::exam_loader::ExamLoader;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    loader: Arc<dyn ExamLoader>,
    gateway: Arc<dyn SubmissionGateway>,
    clock: Arc<dyn ClockSource>,
    attempts: AttemptRegistry,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        loader: Arc<dyn ExamLoader>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Self {
        Self {
            inner: Arc::new(InnerState {
                settings,
                loader,
                gateway,
                clock: Arc::new(TokioClock),
                attempts: AttemptRegistry::default(),
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn loader(&self) -> &Arc<dyn ExamLoader> {
        &self.inner.loader
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn SubmissionGateway> {
        &self.inner.gateway
    }

    pub(crate) fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.inner.clock
    }

    pub(crate) fn attempts(&self) -> &AttemptRegistry {
        &self.inner.attempts
    }
}
