// Publication state machine
// Pure decisions per (content, platform) record; callers persist the result.

pub mod permalink;

pub use permalink::{Permalink, PublishReceipt};

use crate::errors::TransitionError;
use crate::models::{FailureKind, PlatformRecord, PublicationStatus};
use chrono::{DateTime, Duration, Utc};

/// Default early-attempt tolerance
pub const DEFAULT_GRACE_SECONDS: i64 = 60;

/// Externally driven events on a platform record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Set or move the earliest allowed attempt time
    Schedule { at: DateTime<Utc> },
    /// Start an attempt; refused before `scheduled_at - grace`
    BeginPublishing { grace: Duration },
    /// Transport returned a remote post
    Succeed(PublishReceipt),
    Fail { kind: FailureKind, message: String },
    /// The attempt's outcome was never recorded
    Interrupt { reason: String },
    Retry,
    /// Repair a record that breaks the permalink or schedule invariant
    CorrectInvariant { reason: String },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Schedule { .. } => "schedule",
            Transition::BeginPublishing { .. } => "begin_publishing",
            Transition::Succeed(_) => "succeed",
            Transition::Fail { .. } => "fail",
            Transition::Interrupt { .. } => "interrupt",
            Transition::Retry => "retry",
            Transition::CorrectInvariant { .. } => "correct_invariant",
        }
    }
}

/// Apply a transition, returning the new record
///
/// The input record is never modified. Any (status, transition) pair not in
/// the automaton yields `TransitionError::Invalid`.
pub fn apply(
    record: &PlatformRecord,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<PlatformRecord, TransitionError> {
    use PublicationStatus::*;

    let invalid = |transition: &Transition| TransitionError::Invalid {
        from: record.status,
        transition: transition.name(),
    };
    let mut next = record.clone();

    match (record.status, transition) {
        (Unscheduled | Pending | Scheduled, Transition::Schedule { at }) => {
            next.status = Scheduled;
            next.scheduled_at = Some(at);
            next.error = None;
            next.error_kind = None;
        }
        (Scheduled, Transition::BeginPublishing { grace }) => {
            let at = record
                .scheduled_at
                .ok_or(TransitionError::MissingScheduledAt)?;
            let earliest = at - grace;
            if now < earliest {
                return Err(TransitionError::NotDue { earliest });
            }
            next.status = Publishing;
            next.attempts = record.attempts.saturating_add(1);
            next.last_attempt_at = Some(now);
            next.error = None;
            next.error_kind = None;
        }
        (Publishing, Transition::Succeed(receipt)) => {
            next.status = Published;
            next.remote_id = Some(receipt.remote_id);
            next.permalink = Some(receipt.permalink.as_str().to_string());
            next.published_at = Some(now);
            next.error = None;
            next.error_kind = None;
        }
        (Publishing, Transition::Fail { kind, message }) => {
            next.status = Failed;
            next.error = Some(message);
            next.error_kind = Some(kind);
        }
        (Publishing, Transition::Interrupt { reason }) => {
            next.status = Failed;
            next.error = Some(reason);
            next.error_kind = Some(FailureKind::Interrupted);
        }
        (Failed, Transition::Retry) => {
            next.status = Pending;
            next.error = None;
            next.error_kind = None;
        }
        (Published | Scheduled, Transition::CorrectInvariant { reason }) => {
            if !violates_permalink_invariant(record) && !violates_schedule_invariant(record) {
                return Err(TransitionError::NothingToCorrect);
            }
            next.status = Pending;
            next.error = None;
            next.error_kind = None;
            next.corrected_at = Some(now);
            next.correction_reason = Some(reason);
        }
        (_, transition) => return Err(invalid(&transition)),
    }

    Ok(next)
}

/// Due: scheduled, with a time, and no more than `grace` before it
pub fn is_due(record: &PlatformRecord, now: DateTime<Utc>, grace: Duration) -> bool {
    record.status == PublicationStatus::Scheduled
        && record
            .scheduled_at
            .map(|at| now >= at - grace)
            .unwrap_or(false)
}

/// Published with a permalink; the only state that counts as delivered
pub fn is_terminal_success(record: &PlatformRecord) -> bool {
    record.status == PublicationStatus::Published && record.has_permalink()
}

/// False only for records that are already delivered
pub fn can_publish_to_platform(record: &PlatformRecord) -> bool {
    !is_terminal_success(record)
}

/// Published but without a permalink
pub fn violates_permalink_invariant(record: &PlatformRecord) -> bool {
    record.status == PublicationStatus::Published && !record.has_permalink()
}

/// Scheduled but without a time, so it can never become due
pub fn violates_schedule_invariant(record: &PlatformRecord) -> bool {
    record.status == PublicationStatus::Scheduled && record.scheduled_at.is_none()
}
