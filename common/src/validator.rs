// Status validator
// Periodic self-healing pass over every item with platform records. Repairs
// broken records, sweeps attempts whose outcome was lost, re-schedules
// retryable failures and keeps the aggregate content status in line.

use crate::config::ValidatorConfig;
use crate::errors::StoreError;
use crate::models::{
    ContentFilter, ContentItem, ContentPatch, ContentStatus, Platform, PlatformRecord,
    PublicationStatus, RecordExpectation,
};
pub use crate::publication::can_publish_to_platform;
use crate::publication::{self, Transition};
use crate::retry::AutoRetryPolicy;
use crate::store::ContentStore;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const PERMALINK_REASON: &str = "published without permalink";
const SCHEDULE_REASON: &str = "scheduled without scheduled_at";
const INTERRUPTED_REASON: &str = "delivery outcome unknown: attempt did not finish";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub scanned: usize,
    /// Records forced back to pending
    pub corrected: usize,
    /// Stale publishing records marked failed
    pub interrupted: usize,
    /// Failed records put back on the schedule
    pub retried: usize,
    /// Items whose aggregate status changed
    pub rolled_up: usize,
    pub failed_writes: usize,
    pub duration_ms: u64,
}

/// Repairs decided for one item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairPlan {
    pub patch: ContentPatch,
    pub corrected: usize,
    pub interrupted: usize,
    pub retried: usize,
    pub rolled_up: bool,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }
}

/// Decide every repair for `item` at `now` without touching the store
pub fn plan_repairs(
    item: &ContentItem,
    now: DateTime<Utc>,
    stale_publishing: Duration,
    policy: &AutoRetryPolicy,
) -> RepairPlan {
    let mut plan = RepairPlan::default();
    let mut records = item.platforms.clone();

    for (platform, record) in &item.platforms {
        let Some(next) = repair_record(*platform, record, now, stale_publishing, policy, &mut plan)
        else {
            continue;
        };
        records.insert(*platform, next.clone());
        plan.patch.set_platform(*platform, next);
        plan.patch.expected.insert(*platform, RecordExpectation::of(record));
    }

    let status = rolled_up_status(item.status, &records);
    if status != item.status {
        debug!(content_id = %item.id, from = item.status.as_str(), to = status.as_str(), "Rolling up content status");
        plan.patch.set_status(status);
        plan.rolled_up = true;
    }

    plan
}

fn repair_record(
    platform: Platform,
    record: &PlatformRecord,
    now: DateTime<Utc>,
    stale_publishing: Duration,
    policy: &AutoRetryPolicy,
    plan: &mut RepairPlan,
) -> Option<PlatformRecord> {
    let correction = if publication::violates_permalink_invariant(record) {
        Some(("permalink", PERMALINK_REASON))
    } else if publication::violates_schedule_invariant(record) {
        Some(("schedule", SCHEDULE_REASON))
    } else {
        None
    };

    if let Some((repair, reason)) = correction {
        let next = apply_logged(
            platform,
            record,
            Transition::CorrectInvariant {
                reason: reason.to_string(),
            },
            now,
        )?;
        warn!(platform = %platform, reason, "Correcting invalid platform record");
        telemetry::record_invariant_correction(repair);
        plan.corrected += 1;
        return Some(next);
    }

    match record.status {
        PublicationStatus::Publishing if is_stale(record, now, stale_publishing) => {
            let next = apply_logged(
                platform,
                record,
                Transition::Interrupt {
                    reason: INTERRUPTED_REASON.to_string(),
                },
                now,
            )?;
            warn!(platform = %platform, last_attempt_at = ?record.last_attempt_at, "Sweeping stale publishing record");
            telemetry::record_invariant_correction("stale_publishing");
            plan.interrupted += 1;
            Some(next)
        }
        PublicationStatus::Failed if policy.eligible(record, now) => {
            let pending = apply_logged(platform, record, Transition::Retry, now)?;
            let next = apply_logged(platform, &pending, Transition::Schedule { at: now }, now)?;
            info!(platform = %platform, attempts = record.attempts, "Re-scheduling failed delivery");
            plan.retried += 1;
            Some(next)
        }
        _ => None,
    }
}

fn apply_logged(
    platform: Platform,
    record: &PlatformRecord,
    transition: Transition,
    now: DateTime<Utc>,
) -> Option<PlatformRecord> {
    match publication::apply(record, transition, now) {
        Ok(next) => Some(next),
        Err(e) => {
            error!(platform = %platform, error = %e, "Repair transition refused");
            None
        }
    }
}

/// Publishing with no attempt time counts as stale: its start was never recorded properly
fn is_stale(record: &PlatformRecord, now: DateTime<Utc>, stale_publishing: Duration) -> bool {
    record
        .last_attempt_at
        .map(|at| now - at > stale_publishing)
        .unwrap_or(true)
}

/// Published once every record has settled with at least one delivered
fn rolled_up_status(
    current: ContentStatus,
    records: &std::collections::BTreeMap<Platform, PlatformRecord>,
) -> ContentStatus {
    let settled = !records.is_empty()
        && records.values().all(|r| {
            publication::is_terminal_success(r) || r.status == PublicationStatus::Failed
        });
    let delivered = records.values().any(publication::is_terminal_success);

    match current {
        _ if settled && delivered => ContentStatus::Published,
        ContentStatus::Published => ContentStatus::Scheduled,
        other => other,
    }
}

pub struct StatusValidator {
    store: Arc<dyn ContentStore>,
    config: ValidatorConfig,
    policy: AutoRetryPolicy,
    shutdown_tx: broadcast::Sender<()>,
}

impl StatusValidator {
    pub fn new(store: Arc<dyn ContentStore>, config: ValidatorConfig, policy: AutoRetryPolicy) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            store,
            config,
            policy,
            shutdown_tx,
        }
    }

    /// Whether the pair may still be published (it is not yet delivered)
    pub async fn can_publish(&self, id: Uuid, platform: Platform) -> Result<bool, StoreError> {
        let item = self.store.get(id).await?;
        Ok(item
            .platforms
            .get(&platform)
            .map(can_publish_to_platform)
            .unwrap_or(true))
    }

    pub async fn run_pass(&self) -> Result<ValidationReport, StoreError> {
        self.run_pass_at(Utc::now()).await
    }

    /// Scan every item in id order, `batch_size` at a time, until a page comes back empty
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<ValidationReport, StoreError> {
        let started = Instant::now();
        let stale = self.config.stale_publishing();
        let mut report = ValidationReport::default();
        let mut after = None;

        loop {
            let filter = ContentFilter::page(after, self.config.batch_size);
            let batch = self.store.list(&filter).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = Some(last.id);

            for item in &batch {
                report.scanned += 1;
                let plan = plan_repairs(item, now, stale, &self.policy);
                if plan.is_empty() {
                    continue;
                }

                match self.store.patch(item.id, &plan.patch).await {
                    Ok(()) => {
                        report.corrected += plan.corrected;
                        report.interrupted += plan.interrupted;
                        report.retried += plan.retried;
                        report.rolled_up += usize::from(plan.rolled_up);
                    }
                    Err(StoreError::Conflict { platform, .. }) => {
                        debug!(content_id = %item.id, platform = %platform, "Record changed during the pass, repairing next pass");
                    }
                    Err(e) => {
                        warn!(content_id = %item.id, error = %e, "Failed to write repairs, retrying next pass");
                        report.failed_writes += 1;
                    }
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            scanned = report.scanned,
            corrected = report.corrected,
            interrupted = report.interrupted,
            retried = report.retried,
            rolled_up = report.rolled_up,
            failed_writes = report.failed_writes,
            "Validation pass completed"
        );
        Ok(report)
    }

    /// Run passes every `interval_seconds` until `stop` is called
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            interval_seconds = self.config.interval_seconds,
            batch_size = self.config.batch_size,
            "Starting status validator"
        );

        let mut pass_interval = interval(self.config.interval());
        pass_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = pass_interval.tick() => {
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "Validation pass aborted");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping status validator");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
