//! Attempt lifecycle as a synchronous state machine.
//!
//! Every handler takes the current instant and appends its side effects to an
//! [`Effects`] buffer; the runtime applies them. Keeping I/O out of here means each
//! transition runs to completion before the next event is looked at.

use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::engine::deadline::{DeadlineClock, DeadlineTimer, TimerEvent};
use crate::engine::gateway::{GatewayError, GatewayErrorKind};
use crate::engine::integrity::{IntegritySignal, ViolationTrigger};
use crate::engine::ledger::{AnswerLedger, LedgerError};
use crate::engine::types::{
    ExamSession, OptionId, PreparedSubmission, QuestionRefId, SessionStatus, SubmissionOrigin,
    SubmissionPayload,
};

/// Local rejection; nothing reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("{unanswered} question(s) are still unanswered")]
    Incomplete { unanswered: usize },
    #[error("submission opens in {wait_seconds} second(s)")]
    TooEarly { wait_seconds: u64 },
    #[error("not allowed while the session is {status}")]
    InvalidState { status: SessionStatus },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("question index {index} is out of range (0..{total})")]
    IndexOutOfRange { index: usize, total: usize },
    #[error("the last submission failed permanently ({kind:?}) and cannot be retried")]
    RetryNotAllowed { kind: GatewayErrorKind },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Incomplete { .. } => "incomplete_answers",
            RejectReason::TooEarly { .. } => "time_not_eligible",
            RejectReason::InvalidState { .. } => "invalid_state",
            RejectReason::Ledger(LedgerError::UnknownQuestion(_)) => "unknown_question",
            RejectReason::Ledger(LedgerError::UnknownOption { .. }) => "unknown_option",
            RejectReason::IndexOutOfRange { .. } => "index_out_of_range",
            RejectReason::RetryNotAllowed { .. } => "retry_not_allowed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    LowTimeWarning { remaining_seconds: u64 },
    QuarterTimeReached,
    DeadlineReached,
    ViolationDetected { trigger: ViolationTrigger },
    StateChanged { from: SessionStatus, to: SessionStatus },
}

impl From<TimerEvent> for Notification {
    fn from(event: TimerEvent) -> Self {
        match event {
            TimerEvent::LowTimeWarning { remaining_seconds } => {
                Notification::LowTimeWarning { remaining_seconds }
            }
            TimerEvent::QuarterTimeReached => Notification::QuarterTimeReached,
            TimerEvent::DeadlineReached => Notification::DeadlineReached,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effects {
    pub notifications: Vec<Notification>,
    pub submissions: Vec<PreparedSubmission>,
    /// Stop the timer and integrity tasks.
    pub teardown: bool,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.submissions.is_empty() && !self.teardown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionFailure {
    pub origin: SubmissionOrigin,
    pub kind: GatewayErrorKind,
    pub retryable: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub official_exam_id: String,
    pub status: SessionStatus,
    pub duration_seconds: u64,
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub answered_count: usize,
    pub total_questions: usize,
    pub can_submit: bool,
    pub current_question_index: usize,
    pub violation_detected: bool,
    pub submission_origin: Option<SubmissionOrigin>,
    pub failure: Option<SubmissionFailure>,
}

impl SessionSnapshot {
    /// Nothing further can happen: terminal, or failed with no retry allowed.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
            || (self.status == SessionStatus::Failed
                && self.failure.as_ref().is_some_and(|failure| !failure.retryable))
    }
}

pub struct SessionMachine {
    session: ExamSession,
    status: SessionStatus,
    ledger: AnswerLedger,
    timer: Option<DeadlineTimer>,
    current_index: usize,
    violation: Option<ViolationTrigger>,
    /// Violation seen while another submission was in flight.
    pending_violation: bool,
    /// Student came back while a held violation was still waiting to be sent.
    returned_after_violation: bool,
    in_flight: Option<SubmissionOrigin>,
    last_submission: Option<PreparedSubmission>,
    failure: Option<SubmissionFailure>,
    torn_down: bool,
}

impl SessionMachine {
    pub fn new(session: ExamSession) -> Self {
        let ledger = AnswerLedger::new(&session.questions);
        Self {
            session,
            status: SessionStatus::Loading,
            ledger,
            timer: None,
            current_index: 0,
            violation: None,
            pending_violation: false,
            returned_after_violation: false,
            in_flight: None,
            last_submission: None,
            failure: None,
            torn_down: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session(&self) -> &ExamSession {
        &self.session
    }

    pub fn ledger(&self) -> &AnswerLedger {
        &self.ledger
    }

    pub fn in_flight(&self) -> Option<SubmissionOrigin> {
        self.in_flight
    }

    /// Terminal with no submission left to report back.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() && self.in_flight.is_none()
    }

    /// Captures `started_at` and moves `Loading -> InProgress`.
    pub fn start(
        &mut self,
        now: Instant,
        low_time_threshold: u64,
        fx: &mut Effects,
    ) -> Result<(), RejectReason> {
        self.expect(SessionStatus::Loading)?;
        self.timer =
            Some(DeadlineTimer::start(now, self.session.duration_seconds, low_time_threshold));
        self.transition(SessionStatus::InProgress, fx);
        tracing::info!(
            session_id = %self.session.session_id,
            duration_seconds = self.session.duration_seconds,
            duration_source = ?self.session.duration_source,
            questions = self.ledger.total(),
            "Exam session started"
        );
        // A first sample so sub-threshold durations warn immediately.
        self.tick(now, fx);
        Ok(())
    }

    pub fn tick(&mut self, now: Instant, fx: &mut Effects) {
        if self.status.is_terminal() {
            return;
        }
        let Some(timer) = self.timer.as_mut() else {
            return;
        };

        for event in timer.tick(now).events {
            fx.notifications.push(event.into());
            if event == TimerEvent::DeadlineReached {
                self.on_deadline(fx);
            }
        }
    }

    pub fn clock(&self, now: Instant) -> DeadlineClock {
        match &self.timer {
            Some(timer) => timer.peek(now),
            None => DeadlineClock::from_elapsed(self.session.duration_seconds, 0),
        }
    }

    pub fn select_answer(
        &mut self,
        now: Instant,
        question_ref_id: &QuestionRefId,
        option_id: OptionId,
        fx: &mut Effects,
    ) -> Result<(), RejectReason> {
        self.tick(now, fx);
        self.expect(SessionStatus::InProgress)?;
        self.ledger.set_answer(question_ref_id, option_id)?;
        Ok(())
    }

    pub fn navigate(&mut self, index: usize) -> Result<usize, RejectReason> {
        if !matches!(self.status, SessionStatus::InProgress | SessionStatus::AwaitingConfirmation) {
            return Err(RejectReason::InvalidState { status: self.status });
        }
        let total = self.session.questions.len();
        if index >= total {
            return Err(RejectReason::IndexOutOfRange { index, total });
        }
        self.current_index = index;
        Ok(index)
    }

    /// Gating: every question answered, and past three quarters of the time.
    pub fn request_manual_submit(
        &mut self,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), RejectReason> {
        self.tick(now, fx);
        self.expect(SessionStatus::InProgress)?;

        if !self.ledger.is_complete() {
            return Err(RejectReason::Incomplete { unanswered: self.ledger.unanswered_count() });
        }
        let clock = self.clock(now);
        if !clock.can_submit {
            return Err(RejectReason::TooEarly { wait_seconds: clock.submit_wait_seconds() });
        }

        self.transition(SessionStatus::AwaitingConfirmation, fx);
        Ok(())
    }

    pub fn cancel_submit(&mut self, now: Instant, fx: &mut Effects) -> Result<(), RejectReason> {
        self.tick(now, fx);
        self.expect(SessionStatus::AwaitingConfirmation)?;
        self.transition(SessionStatus::InProgress, fx);
        Ok(())
    }

    pub fn confirm_submit(&mut self, now: Instant, fx: &mut Effects) -> Result<(), RejectReason> {
        self.tick(now, fx);
        self.expect(SessionStatus::AwaitingConfirmation)?;
        let payload = self.ledger.to_payload();
        self.begin_submission(SubmissionOrigin::Manual, payload, fx);
        Ok(())
    }

    /// Resends the last payload verbatim after a transient failure.
    pub fn retry_submit(&mut self, now: Instant, fx: &mut Effects) -> Result<(), RejectReason> {
        self.tick(now, fx);
        self.expect(SessionStatus::Failed)?;
        let failure = self.failure.as_ref().ok_or(RejectReason::InvalidState {
            status: self.status,
        })?;
        if !failure.retryable {
            return Err(RejectReason::RetryNotAllowed { kind: failure.kind });
        }
        let prepared = self
            .last_submission
            .clone()
            .ok_or(RejectReason::InvalidState { status: self.status })?;

        tracing::info!(
            session_id = %self.session.session_id,
            origin = prepared.origin.as_str(),
            "Retrying submission"
        );
        self.begin_submission(prepared.origin, prepared.payload, fx);
        Ok(())
    }

    pub fn integrity(&mut self, signal: IntegritySignal, fx: &mut Effects) {
        match signal {
            IntegritySignal::Violation(trigger) => self.on_violation(trigger, fx),
            IntegritySignal::StudentReturned => self.on_student_returned(fx),
        }
    }

    pub fn submission_finished(
        &mut self,
        origin: SubmissionOrigin,
        result: Result<(), GatewayError>,
        fx: &mut Effects,
    ) {
        if self.in_flight != Some(origin) {
            tracing::debug!(
                session_id = %self.session.session_id,
                origin = origin.as_str(),
                status = %self.status,
                "Ignoring completion of a submission that is no longer tracked"
            );
            return;
        }
        self.in_flight = None;

        if self.status == SessionStatus::Violated {
            // Student came back before the detached violation call finished.
            match result {
                Ok(()) => tracing::info!(
                    session_id = %self.session.session_id,
                    origin = origin.as_str(),
                    "Submission confirmed after session was closed"
                ),
                Err(err) => {
                    tracing::error!(
                        session_id = %self.session.session_id,
                        origin = origin.as_str(),
                        error = %err,
                        "Submission failed after session was closed"
                    );
                    if self.pending_violation && err.is_transient() {
                        self.pending_violation = false;
                        self.dispatch(SubmissionOrigin::Violation, SubmissionPayload::violation(), fx);
                    }
                }
            }
            return;
        }

        match result {
            Ok(()) => {
                self.failure = None;
                let terminal = match origin {
                    SubmissionOrigin::Manual => SessionStatus::Submitted,
                    SubmissionOrigin::Deadline => SessionStatus::TimedOut,
                    SubmissionOrigin::Violation => SessionStatus::Violated,
                };
                self.transition(terminal, fx);
            }
            Err(err) if self.pending_violation && err.is_transient() => {
                self.pending_violation = false;
                tracing::warn!(
                    session_id = %self.session.session_id,
                    origin = origin.as_str(),
                    error = %err,
                    "Submission failed with a violation pending; sending violation instead"
                );
                self.begin_submission(SubmissionOrigin::Violation, SubmissionPayload::violation(), fx);
                if self.returned_after_violation {
                    self.transition(SessionStatus::Violated, fx);
                }
            }
            Err(err) => {
                let retryable = err.is_transient();
                self.failure = Some(SubmissionFailure {
                    origin,
                    kind: err.kind(),
                    retryable,
                    detail: err.to_string(),
                });
                if origin == SubmissionOrigin::Violation && !retryable {
                    // The violation stands even though the backend refused the report.
                    tracing::error!(
                        session_id = %self.session.session_id,
                        error = %err,
                        "Violation submission failed permanently; closing session"
                    );
                    self.transition(SessionStatus::Violated, fx);
                    return;
                }
                self.transition(SessionStatus::Failed, fx);
                if !retryable {
                    self.teardown(fx);
                }
            }
        }
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let clock = self.clock(now);
        SessionSnapshot {
            session_id: self.session.session_id.clone(),
            official_exam_id: self.session.official_exam_id.clone(),
            status: self.status,
            duration_seconds: self.session.duration_seconds,
            remaining_seconds: clock.remaining_seconds,
            elapsed_seconds: clock.elapsed_seconds,
            answered_count: self.ledger.answered_count(),
            total_questions: self.ledger.total(),
            can_submit: clock.can_submit,
            current_question_index: self.current_index,
            violation_detected: self.violation.is_some(),
            submission_origin: self
                .in_flight
                .or_else(|| self.last_submission.as_ref().map(|s| s.origin)),
            failure: self.failure.clone(),
        }
    }

    /// Stops timer and monitor on shutdown without touching the status.
    pub fn shutdown(&mut self, fx: &mut Effects) {
        self.teardown(fx);
    }

    fn on_deadline(&mut self, fx: &mut Effects) {
        match self.status {
            SessionStatus::InProgress | SessionStatus::AwaitingConfirmation => {
                let payload = self.ledger.to_payload();
                self.begin_submission(SubmissionOrigin::Deadline, payload, fx);
            }
            SessionStatus::Failed if self.failure.as_ref().is_some_and(|f| f.retryable) => {
                if let Some(prepared) = self.last_submission.clone() {
                    let payload = prepared.payload;
                    let origin = if prepared.origin == SubmissionOrigin::Violation {
                        SubmissionOrigin::Violation
                    } else {
                        SubmissionOrigin::Deadline
                    };
                    self.begin_submission(origin, payload, fx);
                }
            }
            status => tracing::debug!(
                session_id = %self.session.session_id,
                status = %status,
                "Deadline reached; nothing to force"
            ),
        }
    }

    fn on_violation(&mut self, trigger: ViolationTrigger, fx: &mut Effects) {
        if self.status.is_terminal() || self.status == SessionStatus::Loading {
            return;
        }
        if self.violation.is_some() {
            return;
        }
        self.violation = Some(trigger);
        fx.notifications.push(Notification::ViolationDetected { trigger });

        match self.status {
            SessionStatus::InProgress | SessionStatus::AwaitingConfirmation => {
                self.begin_submission(SubmissionOrigin::Violation, SubmissionPayload::violation(), fx);
            }
            SessionStatus::Failed if self.failure.as_ref().is_some_and(|f| f.retryable) => {
                self.begin_submission(SubmissionOrigin::Violation, SubmissionPayload::violation(), fx);
            }
            SessionStatus::Submitting => {
                self.pending_violation = true;
                tracing::warn!(
                    session_id = %self.session.session_id,
                    trigger = trigger.as_str(),
                    "Violation during an in-flight submission; holding it"
                );
            }
            status => tracing::warn!(
                session_id = %self.session.session_id,
                status = %status,
                trigger = trigger.as_str(),
                "Violation recorded; session cannot submit again"
            ),
        }
    }

    fn on_student_returned(&mut self, fx: &mut Effects) {
        if self.violation.is_none() || self.status.is_terminal() {
            return;
        }
        let violation_sent = self
            .last_submission
            .as_ref()
            .is_some_and(|prepared| prepared.origin == SubmissionOrigin::Violation);
        if !violation_sent {
            if self.pending_violation {
                self.returned_after_violation = true;
                tracing::info!(
                    session_id = %self.session.session_id,
                    status = %self.status,
                    "Student returned; waiting for the in-flight submission before closing"
                );
            }
            return;
        }
        if !matches!(
            self.status,
            SessionStatus::InProgress
                | SessionStatus::AwaitingConfirmation
                | SessionStatus::Submitting
                | SessionStatus::Failed
        ) {
            return;
        }
        tracing::info!(
            session_id = %self.session.session_id,
            status = %self.status,
            "Student returned after violation; closing session"
        );
        self.transition(SessionStatus::Violated, fx);
    }

    /// Enters `Submitting` unless a call is already in flight.
    fn begin_submission(
        &mut self,
        origin: SubmissionOrigin,
        payload: SubmissionPayload,
        fx: &mut Effects,
    ) {
        if self.in_flight.is_some() {
            tracing::debug!(
                session_id = %self.session.session_id,
                origin = origin.as_str(),
                "Submission already in flight; ignoring trigger"
            );
            return;
        }
        self.failure = None;
        self.transition(SessionStatus::Submitting, fx);
        self.dispatch(origin, payload, fx);
    }

    fn dispatch(&mut self, origin: SubmissionOrigin, payload: SubmissionPayload, fx: &mut Effects) {
        let prepared = PreparedSubmission { origin, payload };
        self.in_flight = Some(origin);
        self.last_submission = Some(prepared.clone());
        tracing::info!(
            session_id = %self.session.session_id,
            origin = origin.as_str(),
            answers = prepared.payload.answers.len(),
            "Submission dispatched"
        );
        fx.submissions.push(prepared);
    }

    fn transition(&mut self, to: SessionStatus, fx: &mut Effects) {
        let from = self.status;
        if from == to {
            return;
        }
        self.status = to;
        tracing::info!(
            session_id = %self.session.session_id,
            from = %from,
            to = %to,
            "Session state changed"
        );
        fx.notifications.push(Notification::StateChanged { from, to });
        if to.is_terminal() {
            self.teardown(fx);
        }
    }

    fn teardown(&mut self, fx: &mut Effects) {
        if let Some(timer) = self.timer.as_mut() {
            timer.stop();
        }
        if !self.torn_down {
            self.torn_down = true;
            fx.teardown = true;
        }
    }

    fn expect(&self, expected: SessionStatus) -> Result<(), RejectReason> {
        if self.status == expected {
            Ok(())
        } else {
            Err(RejectReason::InvalidState { status: self.status })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::integrity::ViolationTrigger;
    use crate::test_support::exam_session;
    use std::time::Duration;

    struct Harness {
        machine: SessionMachine,
        origin: Instant,
    }

    impl Harness {
        fn started(duration_seconds: u64, questions: usize) -> Self {
            let origin = Instant::now();
            let mut machine = SessionMachine::new(exam_session(duration_seconds, questions));
            let mut fx = Effects::default();
            machine.start(origin, 300, &mut fx).expect("start");
            Self { machine, origin }
        }

        fn at(&self, secs: u64) -> Instant {
            self.origin + Duration::from_secs(secs)
        }

        fn answer(&mut self, ids: impl IntoIterator<Item = i64>, secs: u64) {
            let at = self.at(secs);
            for id in ids {
                let mut fx = Effects::default();
                self.machine
                    .select_answer(
                        at,
                        &QuestionRefId::from(id),
                        OptionId::from(id * 10 + 1),
                        &mut fx,
                    )
                    .expect("answer");
            }
        }

        fn tick(&mut self, secs: u64) -> Effects {
            let at = self.at(secs);
            let mut fx = Effects::default();
            self.machine.tick(at, &mut fx);
            fx
        }

        fn violate(&mut self, trigger: ViolationTrigger) -> Effects {
            let mut fx = Effects::default();
            self.machine.integrity(IntegritySignal::Violation(trigger), &mut fx);
            fx
        }

        fn finish(&mut self, origin: SubmissionOrigin, result: Result<(), GatewayError>) -> Effects {
            let mut fx = Effects::default();
            self.machine.submission_finished(origin, result, &mut fx);
            fx
        }
    }

    #[test]
    fn start_moves_to_in_progress_once() {
        let mut harness = Harness::started(2700, 3);
        assert_eq!(harness.machine.status(), SessionStatus::InProgress);

        let mut fx = Effects::default();
        let at = harness.at(1);
        assert_eq!(
            harness.machine.start(at, 300, &mut fx),
            Err(RejectReason::InvalidState { status: SessionStatus::InProgress })
        );
    }

    #[test]
    fn gating_requires_completeness_then_time() {
        let mut harness = Harness::started(2700, 4);
        harness.answer(1..=3, 10);

        let mut fx = Effects::default();
        let at = harness.at(1000);
        assert_eq!(
            harness.machine.request_manual_submit(at, &mut fx),
            Err(RejectReason::Incomplete { unanswered: 1 })
        );

        harness.answer([4], 1001);
        let at = harness.at(1002);
        assert_eq!(
            harness.machine.request_manual_submit(at, &mut Effects::default()),
            Err(RejectReason::TooEarly { wait_seconds: 1024 })
        );
        assert_eq!(harness.machine.status(), SessionStatus::InProgress);

        let at = harness.at(2026);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        assert_eq!(harness.machine.status(), SessionStatus::AwaitingConfirmation);
    }

    #[test]
    fn scenario_a_manual_submission_after_three_quarters() {
        let mut harness = Harness::started(2700, 20);
        harness.answer(1..=20, 60);

        let at = harness.at(2026);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        let mut fx = Effects::default();
        harness.machine.confirm_submit(at, &mut fx).unwrap();

        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].origin, SubmissionOrigin::Manual);
        assert_eq!(fx.submissions[0].payload.answers.len(), 20);
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);

        let fx = harness.finish(SubmissionOrigin::Manual, Ok(()));
        assert!(fx.teardown);
        assert_eq!(harness.machine.status(), SessionStatus::Submitted);
    }

    #[test]
    fn scenario_b_early_request_reports_wait() {
        let mut harness = Harness::started(2700, 20);
        harness.answer(1..=20, 60);

        let at = harness.at(2025);
        let mut fx = Effects::default();
        assert_eq!(
            harness.machine.request_manual_submit(at, &mut fx),
            Err(RejectReason::TooEarly { wait_seconds: 1 })
        );
        assert!(fx.submissions.is_empty());
    }

    #[test]
    fn scenario_c_deadline_forces_sparse_submission() {
        let mut harness = Harness::started(2700, 20);
        harness.answer(1..=7, 30);

        let fx = harness.tick(2699);
        assert!(fx.submissions.is_empty());

        let fx = harness.tick(2700);
        assert!(fx.notifications.contains(&Notification::DeadlineReached));
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].origin, SubmissionOrigin::Deadline);
        assert_eq!(fx.submissions[0].payload.answers.len(), 7);
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);

        harness.finish(SubmissionOrigin::Deadline, Ok(()));
        assert_eq!(harness.machine.status(), SessionStatus::TimedOut);
    }

    #[test]
    fn scenario_d_violation_discards_answers() {
        let mut harness = Harness::started(2700, 20);
        harness.answer(1..=5, 100);
        harness.tick(500);

        let fx = harness.violate(ViolationTrigger::VisibilityLost);
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].payload, SubmissionPayload::violation());
        assert!(fx
            .notifications
            .contains(&Notification::ViolationDetected { trigger: ViolationTrigger::VisibilityLost }));

        harness.finish(SubmissionOrigin::Violation, Ok(()));
        assert_eq!(harness.machine.status(), SessionStatus::Violated);
    }

    #[test]
    fn forced_deadline_bypasses_gating_at_time_zero() {
        let origin = Instant::now();
        let mut machine = SessionMachine::new(exam_session(0, 5));
        let mut fx = Effects::default();
        machine.start(origin, 300, &mut fx).unwrap();

        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].origin, SubmissionOrigin::Deadline);
        assert!(fx.submissions[0].payload.answers.is_empty());
    }

    #[test]
    fn repeated_deadline_and_violation_produce_one_call() {
        let mut harness = Harness::started(100, 3);
        let first = harness.tick(100);
        let second = harness.tick(101);
        let third = harness.violate(ViolationTrigger::NavigationAway);
        let fourth = harness.violate(ViolationTrigger::VisibilityLost);

        let calls = [first, second, third, fourth].iter().map(|fx| fx.submissions.len()).sum::<usize>();
        assert_eq!(calls, 1);
    }

    #[test]
    fn answers_after_deadline_tick_are_rejected() {
        let mut harness = Harness::started(100, 3);
        harness.tick(100);

        let mut fx = Effects::default();
        let at = harness.at(100);
        let result =
            harness.machine.select_answer(at, &QuestionRefId::from(1), OptionId::from(11), &mut fx);
        assert_eq!(result, Err(RejectReason::InvalidState { status: SessionStatus::Submitting }));
        assert_eq!(harness.machine.ledger().answered_count(), 0);
    }

    #[test]
    fn late_answer_catches_up_with_the_clock_first() {
        let mut harness = Harness::started(100, 3);
        harness.answer([1], 10);

        // No tick was delivered at the deadline, the command itself observes it.
        let mut fx = Effects::default();
        let at = harness.at(150);
        let result =
            harness.machine.select_answer(at, &QuestionRefId::from(2), OptionId::from(21), &mut fx);

        assert!(result.is_err());
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].payload.answers.len(), 1);
    }

    #[test]
    fn cancel_returns_to_in_progress() {
        let mut harness = Harness::started(40, 1);
        harness.answer([1], 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        harness.machine.cancel_submit(at, &mut Effects::default()).unwrap();
        assert_eq!(harness.machine.status(), SessionStatus::InProgress);
    }

    #[test]
    fn deadline_while_confirming_forces_submission() {
        let mut harness = Harness::started(40, 1);
        harness.answer([1], 1);
        let at = harness.at(35);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();

        let fx = harness.tick(40);
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].origin, SubmissionOrigin::Deadline);
    }

    #[test]
    fn manual_failure_allows_verbatim_retry() {
        let mut harness = Harness::started(40, 2);
        harness.answer(1..=2, 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        let mut fx = Effects::default();
        harness.machine.confirm_submit(at, &mut fx).unwrap();
        let sent = fx.submissions[0].payload.clone();

        harness.finish(SubmissionOrigin::Manual, Err(GatewayError::from_status(503, "busy")));
        assert_eq!(harness.machine.status(), SessionStatus::Failed);
        let snapshot = harness.machine.snapshot(harness.at(32));
        assert_eq!(snapshot.failure.as_ref().map(|f| f.retryable), Some(true));

        let mut fx = Effects::default();
        let at = harness.at(33);
        harness.machine.retry_submit(at, &mut fx).unwrap();
        assert_eq!(fx.submissions[0].payload, sent);
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);
    }

    #[test]
    fn fatal_failure_blocks_retry_and_tears_down() {
        let mut harness = Harness::started(40, 1);
        harness.answer([1], 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        harness.machine.confirm_submit(at, &mut Effects::default()).unwrap();

        let fx = harness.finish(SubmissionOrigin::Manual, Err(GatewayError::from_status(401, "")));
        assert!(fx.teardown);
        let at = harness.at(32);
        assert_eq!(
            harness.machine.retry_submit(at, &mut Effects::default()),
            Err(RejectReason::RetryNotAllowed { kind: GatewayErrorKind::Auth })
        );
    }

    #[test]
    fn deadline_after_transient_failure_resends_stored_payload() {
        let mut harness = Harness::started(40, 1);
        harness.answer([1], 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        harness.machine.confirm_submit(at, &mut Effects::default()).unwrap();
        harness.finish(SubmissionOrigin::Manual, Err(GatewayError::Network("down".into())));

        let fx = harness.tick(40);
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].origin, SubmissionOrigin::Deadline);
        assert_eq!(fx.submissions[0].payload.answers.len(), 1);
    }

    #[test]
    fn returning_student_closes_session_before_confirmation() {
        let mut harness = Harness::started(2700, 3);
        harness.violate(ViolationTrigger::VisibilityLost);
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);

        let mut fx = Effects::default();
        harness.machine.integrity(IntegritySignal::StudentReturned, &mut fx);
        assert!(fx.teardown);
        assert_eq!(harness.machine.status(), SessionStatus::Violated);

        // The detached call finishing later changes nothing.
        let fx = harness.finish(SubmissionOrigin::Violation, Err(GatewayError::Network("x".into())));
        assert!(fx.is_empty());
        assert_eq!(harness.machine.status(), SessionStatus::Violated);
    }

    #[test]
    fn violation_during_manual_submission_is_sent_if_manual_fails() {
        let mut harness = Harness::started(40, 1);
        harness.answer([1], 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        harness.machine.confirm_submit(at, &mut Effects::default()).unwrap();

        let fx = harness.violate(ViolationTrigger::NavigationAway);
        assert!(fx.submissions.is_empty());

        let fx = harness.finish(SubmissionOrigin::Manual, Err(GatewayError::from_status(500, "")));
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].payload, SubmissionPayload::violation());
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);
    }

    fn confirmed(harness: &mut Harness) {
        harness.answer([1], 1);
        let at = harness.at(31);
        harness.machine.request_manual_submit(at, &mut Effects::default()).unwrap();
        harness.machine.confirm_submit(at, &mut Effects::default()).unwrap();
    }

    fn student_returns(harness: &mut Harness) -> Effects {
        let mut fx = Effects::default();
        harness.machine.integrity(IntegritySignal::StudentReturned, &mut fx);
        fx
    }

    #[test]
    fn return_during_held_violation_waits_for_in_flight_submission() {
        let mut harness = Harness::started(40, 1);
        confirmed(&mut harness);
        harness.violate(ViolationTrigger::VisibilityLost);

        let fx = student_returns(&mut harness);
        assert!(fx.is_empty());
        assert_eq!(harness.machine.status(), SessionStatus::Submitting);

        // The manual answers were accepted first; the held violation is dropped.
        let fx = harness.finish(SubmissionOrigin::Manual, Ok(()));
        assert!(fx.submissions.is_empty());
        assert_eq!(harness.machine.status(), SessionStatus::Submitted);
    }

    #[test]
    fn return_during_held_violation_closes_once_violation_is_sent() {
        let mut harness = Harness::started(40, 1);
        confirmed(&mut harness);
        harness.violate(ViolationTrigger::NavigationAway);
        student_returns(&mut harness);

        let fx = harness.finish(SubmissionOrigin::Manual, Err(GatewayError::Network("reset".into())));
        assert_eq!(fx.submissions.len(), 1);
        assert_eq!(fx.submissions[0].payload, SubmissionPayload::violation());
        assert_eq!(harness.machine.status(), SessionStatus::Violated);
        assert!(!harness.machine.is_finished());

        harness.finish(SubmissionOrigin::Violation, Ok(()));
        assert!(harness.machine.is_finished());
    }

    #[test]
    fn ignored_violation_does_not_close_failed_session() {
        let mut harness = Harness::started(40, 1);
        confirmed(&mut harness);
        harness.finish(SubmissionOrigin::Manual, Err(GatewayError::from_status(403, "")));
        harness.violate(ViolationTrigger::VisibilityLost);

        student_returns(&mut harness);
        assert_eq!(harness.machine.status(), SessionStatus::Failed);
        assert!(harness.machine.snapshot(harness.at(32)).is_settled());
    }

    #[test]
    fn fatal_violation_failure_still_closes_session() {
        let mut harness = Harness::started(2700, 3);
        harness.violate(ViolationTrigger::VisibilityLost);

        let fx =
            harness.finish(SubmissionOrigin::Violation, Err(GatewayError::from_status(401, "")));
        assert!(fx.teardown);
        assert_eq!(harness.machine.status(), SessionStatus::Violated);

        let snapshot = harness.machine.snapshot(harness.at(10));
        assert!(snapshot.is_settled());
        assert_eq!(snapshot.failure.map(|f| f.kind), Some(GatewayErrorKind::Auth));
    }

    #[test]
    fn terminal_session_ignores_ticks_and_answers() {
        let mut harness = Harness::started(100, 2);
        harness.tick(100);
        harness.finish(SubmissionOrigin::Deadline, Ok(()));
        assert_eq!(harness.machine.status(), SessionStatus::TimedOut);

        assert!(harness.tick(500).is_empty());
        let at = harness.at(501);
        assert!(harness
            .machine
            .select_answer(at, &QuestionRefId::from(1), OptionId::from(11), &mut Effects::default())
            .is_err());
        assert_eq!(harness.machine.snapshot(harness.at(900)).elapsed_seconds, 100);
    }

    #[test]
    fn navigation_is_bounds_checked() {
        let mut harness = Harness::started(100, 3);
        assert_eq!(harness.machine.navigate(2), Ok(2));
        assert_eq!(
            harness.machine.navigate(3),
            Err(RejectReason::IndexOutOfRange { index: 3, total: 3 })
        );
        assert_eq!(harness.machine.snapshot(harness.at(1)).current_question_index, 2);
    }
}
