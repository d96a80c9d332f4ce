use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationTrigger {
    VisibilityLost,
    NavigationAway,
}

impl ViolationTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationTrigger::VisibilityLost => "visibility_lost",
            ViolationTrigger::NavigationAway => "navigation_away",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegritySignal {
    Violation(ViolationTrigger),
    /// The page became visible again after a violation.
    StudentReturned,
}

/// Host reports of page visibility changes.
#[async_trait]
pub trait VisibilitySource: Send {
    /// `None` once the host side is gone.
    async fn next_change(&mut self) -> Option<Visibility>;
}

/// Host reports of an imminent unload, reload or close.
#[async_trait]
pub trait UnloadSource: Send {
    async fn next_unload(&mut self) -> Option<()>;
}

pub struct ChannelVisibilitySource(mpsc::UnboundedReceiver<Visibility>);

pub struct ChannelUnloadSource(mpsc::UnboundedReceiver<()>);

#[async_trait]
impl VisibilitySource for ChannelVisibilitySource {
    async fn next_change(&mut self) -> Option<Visibility> {
        self.0.recv().await
    }
}

#[async_trait]
impl UnloadSource for ChannelUnloadSource {
    async fn next_unload(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

/// Sending half of the channel-backed sources; this is what the host side holds.
#[derive(Debug, Clone)]
pub struct HostSignals {
    visibility: mpsc::UnboundedSender<Visibility>,
    unload: mpsc::UnboundedSender<()>,
}

impl HostSignals {
    pub fn channel() -> (Self, ChannelVisibilitySource, ChannelUnloadSource) {
        let (visibility_tx, visibility_rx) = mpsc::unbounded_channel();
        let (unload_tx, unload_rx) = mpsc::unbounded_channel();
        (
            Self { visibility: visibility_tx, unload: unload_tx },
            ChannelVisibilitySource(visibility_rx),
            ChannelUnloadSource(unload_rx),
        )
    }

    /// Returns `false` when the monitor has already shut down.
    pub fn visibility_changed(&self, visibility: Visibility) -> bool {
        self.visibility.send(visibility).is_ok()
    }

    pub fn unload_requested(&self) -> bool {
        self.unload.send(()).is_ok()
    }
}

type SignalCallback = Box<dyn Fn(IntegritySignal) + Send + Sync>;

/// Folds visibility loss and navigation-away into a single sticky violation.
///
/// The callback runs synchronously on the first trigger and never again; it must not
/// block, since unload handlers on the host side cannot wait for it.
pub struct IntegrityMonitor {
    armed: AtomicBool,
    stopped: AtomicBool,
    on_signal: SignalCallback,
}

impl IntegrityMonitor {
    pub fn new(on_signal: impl Fn(IntegritySignal) + Send + Sync + 'static) -> Self {
        Self {
            armed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            on_signal: Box::new(on_signal),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn observe_visibility(&self, visibility: Visibility) -> bool {
        match visibility {
            Visibility::Hidden => self.trigger(ViolationTrigger::VisibilityLost),
            Visibility::Visible => {
                if self.is_stopped() || !self.is_armed() {
                    return false;
                }
                (self.on_signal)(IntegritySignal::StudentReturned);
                true
            }
        }
    }

    pub fn observe_unload(&self) -> bool {
        self.trigger(ViolationTrigger::NavigationAway)
    }

    /// Returns `true` only for the trigger that armed the monitor.
    pub fn trigger(&self, trigger: ViolationTrigger) -> bool {
        if self.is_stopped() {
            return false;
        }
        if self.armed.swap(true, Ordering::SeqCst) {
            tracing::debug!(trigger = trigger.as_str(), "Integrity monitor already armed");
            return false;
        }

        metrics::counter!("exam_violations_total", "trigger" => trigger.as_str()).increment(1);
        tracing::warn!(trigger = trigger.as_str(), "Integrity violation detected");
        (self.on_signal)(IntegritySignal::Violation(trigger));
        true
    }

    /// Idempotent; nothing is reported after the first call.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub(crate) async fn run_monitor(
    monitor: Arc<IntegrityMonitor>,
    mut visibility: Box<dyn VisibilitySource>,
    mut unload: Box<dyn UnloadSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut visibility_open = true;
    let mut unload_open = true;

    while (visibility_open || unload_open) && !*shutdown.borrow() {
        tokio::select! {
            _ = shutdown.changed() => break,
            change = visibility.next_change(), if visibility_open => match change {
                Some(change) => {
                    monitor.observe_visibility(change);
                }
                None => visibility_open = false,
            },
            request = unload.next_unload(), if unload_open => match request {
                Some(()) => {
                    monitor.observe_unload();
                }
                None => unload_open = false,
            },
        }
    }

    monitor.stop();
    tracing::debug!("Integrity monitor stopped");
}
