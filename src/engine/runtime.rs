use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::clock::ClockSource;
use crate::engine::deadline::DEFAULT_LOW_TIME_WARNING_SECONDS;
use crate::engine::gateway::{submit_with_retry, RetryPolicy, SubmissionGateway, SubmissionReport};
use crate::engine::integrity::{
    run_monitor, IntegrityMonitor, IntegritySignal, UnloadSource, VisibilitySource,
};
use crate::engine::machine::{Effects, Notification, RejectReason, SessionMachine, SessionSnapshot};
use crate::engine::types::{ExamSession, OptionId, PreparedSubmission, QuestionRefId, SubmissionOrigin};

const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub low_time_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            low_time_threshold: DEFAULT_LOW_TIME_WARNING_SECONDS,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct EngineDeps {
    pub clock: Arc<dyn ClockSource>,
    pub gateway: Arc<dyn SubmissionGateway>,
    pub visibility: Box<dyn VisibilitySource>,
    pub unload: Box<dyn UnloadSource>,
}

#[derive(Debug, Clone)]
pub enum Command {
    SelectAnswer { question_ref_id: QuestionRefId, option_id: OptionId },
    Navigate { index: usize },
    RequestManualSubmit,
    ConfirmSubmit,
    CancelSubmit,
    RetrySubmit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error("session engine has stopped")]
    Stopped,
}

type CommandReply = oneshot::Sender<Result<SessionSnapshot, CommandError>>;

enum EngineEvent {
    Command { command: Command, reply: CommandReply },
    Tick,
    Integrity(IntegritySignal),
    SubmissionFinished { origin: SubmissionOrigin, report: SubmissionReport },
    Shutdown,
}

/// Cheap, cloneable front door to one running attempt.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notifications: broadcast::Sender<Notification>,
}

impl SessionHandle {
    pub async fn execute(&self, command: Command) -> Result<SessionSnapshot, CommandError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(EngineEvent::Command { command, reply })
            .map_err(|_| CommandError::Stopped)?;
        response.await.map_err(|_| CommandError::Stopped)?
    }

    pub async fn select_answer(
        &self,
        question_ref_id: QuestionRefId,
        option_id: OptionId,
    ) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::SelectAnswer { question_ref_id, option_id }).await
    }

    pub async fn navigate(&self, index: usize) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::Navigate { index }).await
    }

    pub async fn request_manual_submit(&self) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::RequestManualSubmit).await
    }

    pub async fn confirm_submit(&self) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::ConfirmSubmit).await
    }

    pub async fn cancel_submit(&self) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::CancelSubmit).await
    }

    pub async fn retry_submit(&self) -> Result<SessionSnapshot, CommandError> {
        self.execute(Command::RetrySubmit).await
    }

    /// Last published snapshot; refreshed on every tick and command.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub async fn wait_for(
        &self,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, CommandError> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver.wait_for(|s| predicate(s)).await.map_err(|_| CommandError::Stopped)?;
        Ok(snapshot.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Tears the attempt down. In-flight submissions still run to completion.
    pub fn shutdown(&self) {
        if self.events.send(EngineEvent::Shutdown).is_err() {
            tracing::debug!("Session engine already stopped");
        }
    }

    /// True once the loop has exited, after a terminal result or a shutdown.
    pub fn is_stopped(&self) -> bool {
        self.events.is_closed()
    }
}

/// Starts the attempt clock and spawns its event loop, ticker and integrity monitor.
pub fn spawn_session(session: ExamSession, deps: EngineDeps, config: EngineConfig) -> SessionHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

    let signal_tx = events_tx.clone();
    let monitor = Arc::new(IntegrityMonitor::new(move |signal| {
        if signal_tx.send(EngineEvent::Integrity(signal)).is_err() {
            tracing::warn!(?signal, "Integrity signal dropped; engine stopped");
        }
    }));

    let session_id = session.session_id.clone();
    let mut machine = SessionMachine::new(session);
    let now = deps.clock.now();
    let mut fx = Effects::default();
    if let Err(err) = machine.start(now, config.low_time_threshold, &mut fx) {
        tracing::error!(session_id = %session_id, error = %err, "Failed to start session");
    }
    let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot(now));

    tokio::spawn(run_ticker(config.tick_interval, events_tx.clone(), shutdown_rx.clone()));
    tokio::spawn(run_monitor(monitor.clone(), deps.visibility, deps.unload, shutdown_rx));

    let mut engine = EngineLoop {
        machine,
        clock: deps.clock,
        gateway: deps.gateway,
        retry: config.retry,
        events: events_tx.clone(),
        snapshot: snapshot_tx,
        notifications: notifications.clone(),
        shutdown: shutdown_tx,
        monitor,
    };
    engine.apply(fx);
    tokio::spawn(engine.run(events_rx));

    SessionHandle { events: events_tx, snapshot: snapshot_rx, notifications }
}

struct EngineLoop {
    machine: SessionMachine,
    clock: Arc<dyn ClockSource>,
    gateway: Arc<dyn SubmissionGateway>,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    notifications: broadcast::Sender<Notification>,
    shutdown: watch::Sender<bool>,
    monitor: Arc<IntegrityMonitor>,
}

impl EngineLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            let now = self.clock.now();
            let mut fx = Effects::default();
            let mut reply = None;
            let mut stop = false;

            match event {
                EngineEvent::Tick => self.machine.tick(now, &mut fx),
                EngineEvent::Integrity(signal) => self.machine.integrity(signal, &mut fx),
                EngineEvent::SubmissionFinished { origin, report } => {
                    tracing::debug!(
                        origin = origin.as_str(),
                        attempts = report.attempts,
                        "Submission finished"
                    );
                    self.machine.submission_finished(origin, report.result, &mut fx);
                }
                EngineEvent::Command { command, reply: sender } => {
                    let result = self.execute(command, now, &mut fx);
                    reply = Some((sender, result));
                }
                EngineEvent::Shutdown => {
                    self.machine.shutdown(&mut fx);
                    stop = true;
                }
            }

            self.apply(fx);
            let snapshot = self.machine.snapshot(now);
            self.snapshot.send_replace(snapshot.clone());

            if let Some((sender, result)) = reply {
                // Caller may have gone away; the command still took effect.
                let _ = sender.send(result.map(|()| snapshot).map_err(CommandError::from));
            }
            if stop || self.machine.is_finished() {
                break;
            }
        }

        self.stop_background();
        tracing::debug!(
            session_id = %self.machine.session().session_id,
            status = %self.machine.status(),
            "Session engine loop finished"
        );
    }

    fn execute(
        &mut self,
        command: Command,
        now: std::time::Instant,
        fx: &mut Effects,
    ) -> Result<(), RejectReason> {
        match command {
            Command::SelectAnswer { question_ref_id, option_id } => {
                self.machine.select_answer(now, &question_ref_id, option_id, fx)
            }
            Command::Navigate { index } => self.machine.navigate(index).map(|_| ()),
            Command::RequestManualSubmit => self.machine.request_manual_submit(now, fx),
            Command::ConfirmSubmit => self.machine.confirm_submit(now, fx),
            Command::CancelSubmit => self.machine.cancel_submit(now, fx),
            Command::RetrySubmit => self.machine.retry_submit(now, fx),
        }
    }

    fn apply(&mut self, fx: Effects) {
        for notification in fx.notifications {
            // No subscribers is fine.
            let _ = self.notifications.send(notification);
        }
        for prepared in fx.submissions {
            self.spawn_submission(prepared);
        }
        if fx.teardown {
            self.stop_background();
        }
    }

    /// Detached: the loop keeps handling ticks and commands while this runs, and the
    /// task outlives the loop if the attempt is torn down first.
    fn spawn_submission(&self, prepared: PreparedSubmission) {
        let gateway = self.gateway.clone();
        let events = self.events.clone();
        let policy = self.retry;
        let official_exam_id = self.machine.session().official_exam_id.clone();

        tokio::spawn(async move {
            let report = submit_with_retry(
                gateway.as_ref(),
                &official_exam_id,
                prepared.origin,
                &prepared.payload,
                &policy,
            )
            .await;
            let origin = prepared.origin;
            if events.send(EngineEvent::SubmissionFinished { origin, report }).is_err() {
                tracing::info!(
                    official_exam_id = %official_exam_id,
                    origin = origin.as_str(),
                    "Submission finished after the session was discarded"
                );
            }
        });
    }

    fn stop_background(&self) {
        self.shutdown.send_replace(true);
        self.monitor.stop();
    }
}

async fn run_ticker(
    period: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if *shutdown.borrow() || events.send(EngineEvent::Tick).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Deadline ticker stopped");
}
