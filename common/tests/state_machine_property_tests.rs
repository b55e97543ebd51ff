// Property-based tests for the publication state machine

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::models::{FailureKind, PlatformRecord, PublicationStatus};
use common::publication::{self, Permalink, PublishReceipt, Transition};
use proptest::prelude::*;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
enum Step {
    Schedule(i64),
    Begin(i64),
    Succeed(u8),
    Fail(u8),
    Interrupt,
    Retry,
    Correct,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (-600i64..600).prop_map(Step::Schedule),
        (0i64..120).prop_map(Step::Begin),
        any::<u8>().prop_map(Step::Succeed),
        (0u8..4).prop_map(Step::Fail),
        Just(Step::Interrupt),
        Just(Step::Retry),
        Just(Step::Correct),
    ]
}

fn failure_kind(n: u8) -> FailureKind {
    match n {
        0 => FailureKind::Content,
        1 => FailureKind::Credential,
        2 => FailureKind::Transport,
        _ => FailureKind::Interrupted,
    }
}

fn transition(step: &Step, now: DateTime<Utc>) -> Transition {
    match step {
        Step::Schedule(offset) => Transition::Schedule {
            at: now + Duration::seconds(*offset),
        },
        Step::Begin(grace) => Transition::BeginPublishing {
            grace: Duration::seconds(*grace),
        },
        Step::Succeed(n) => Transition::Succeed(PublishReceipt {
            remote_id: n.to_string(),
            permalink: Permalink::parse(&format!("https://t.me/channel/{}", n)).unwrap(),
        }),
        Step::Fail(n) => Transition::Fail {
            kind: failure_kind(*n),
            message: "rejected".to_string(),
        },
        Step::Interrupt => Transition::Interrupt {
            reason: "lost".to_string(),
        },
        Step::Retry => Transition::Retry,
        Step::Correct => Transition::CorrectInvariant {
            reason: "repair".to_string(),
        },
    }
}

/// Walking any sequence of transitions from a fresh record never reaches a
/// record that is published without a permalink or scheduled without a time.
#[test]
fn property_reachable_records_satisfy_invariants() {
    proptest!(|(steps in prop::collection::vec((step(), 0i64..300), 1..40))| {
        let mut record = PlatformRecord::unscheduled();
        let mut now = base_time();

        for (step, advance) in steps {
            now += Duration::seconds(advance);
            if let Ok(next) = publication::apply(&record, transition(&step, now), now) {
                record = next;
            }
            prop_assert!(!publication::violates_permalink_invariant(&record));
            prop_assert!(!publication::violates_schedule_invariant(&record));
        }
    });
}

/// A refused transition leaves no trace and attempts never go down.
#[test]
fn property_attempts_are_monotonic() {
    proptest!(|(steps in prop::collection::vec((step(), 0i64..300), 1..40))| {
        let mut record = PlatformRecord::unscheduled();
        let mut now = base_time();

        for (step, advance) in steps {
            now += Duration::seconds(advance);
            let before = record.clone();
            match publication::apply(&record, transition(&step, now), now) {
                Ok(next) => {
                    prop_assert!(next.attempts >= before.attempts);
                    if matches!(step, Step::Begin(_)) {
                        prop_assert_eq!(next.attempts, before.attempts + 1);
                        prop_assert_eq!(next.last_attempt_at, Some(now));
                    }
                    record = next;
                }
                Err(_) => prop_assert_eq!(&record, &before),
            }
        }
    });
}

/// An attempt can start no earlier than the grace window before `scheduled_at`.
#[test]
fn property_no_attempt_before_grace_window() {
    proptest!(|(offset in -3600i64..3600, grace in 0i64..600)| {
        let now = base_time();
        let record = PlatformRecord {
            status: PublicationStatus::Scheduled,
            scheduled_at: Some(now + Duration::seconds(offset)),
            ..PlatformRecord::default()
        };
        let result = publication::apply(
            &record,
            Transition::BeginPublishing { grace: Duration::seconds(grace) },
            now,
        );

        let due = publication::is_due(&record, now, Duration::seconds(grace));
        prop_assert_eq!(result.is_ok(), due);
        prop_assert_eq!(due, offset <= grace);
    });
}

/// Delivered records are the only ones the validator refuses to publish again.
#[test]
fn property_can_publish_is_negation_of_terminal_success() {
    proptest!(|(status_index in 0usize..6, permalink in prop::option::of("[a-z:/.]{0,20}"))| {
        let statuses = [
            PublicationStatus::Unscheduled,
            PublicationStatus::Pending,
            PublicationStatus::Scheduled,
            PublicationStatus::Publishing,
            PublicationStatus::Published,
            PublicationStatus::Failed,
        ];
        let record = PlatformRecord {
            status: statuses[status_index],
            permalink,
            ..PlatformRecord::default()
        };
        prop_assert_eq!(
            publication::can_publish_to_platform(&record),
            !(record.status == PublicationStatus::Published && record.has_permalink())
        );
    });
}
