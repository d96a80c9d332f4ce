pub mod clock;
pub mod deadline;
pub mod gateway;
pub mod integrity;
pub mod ledger;
pub mod machine;
pub mod runtime;
pub mod types;

pub use clock::{ClockSource, ManualClock, TokioClock};
pub use deadline::{DeadlineClock, DeadlineTimer, TimerEvent};
pub use gateway::{
    submit_with_retry, GatewayError, GatewayErrorKind, RetryPolicy, SubmissionGateway,
    SubmissionReport,
};
pub use integrity::{
    HostSignals, IntegrityMonitor, IntegritySignal, UnloadSource, ViolationTrigger, Visibility,
    VisibilitySource,
};
pub use ledger::{AnswerLedger, LedgerError};
pub use machine::{Effects, Notification, RejectReason, SessionMachine, SessionSnapshot};
pub use runtime::{spawn_session, Command, CommandError, EngineConfig, EngineDeps, SessionHandle};
pub use types::{
    DurationSource, EntityId, ExamSession, OptionId, Question, QuestionOption, QuestionRefId,
    SessionStatus, SubmissionOrigin, SubmissionPayload,
};
