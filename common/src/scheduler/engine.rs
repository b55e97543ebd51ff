// Scheduler engine
// One tick: take the flag, find due (content, platform) pairs, deliver each pair
// in isolation, persist every outcome as soon as it is known.

use super::guard::TickGuard;
use crate::config::SchedulerConfig;
use crate::credentials::{Credential, CredentialSupplier, Principal};
use crate::errors::{StoreError, TickError, TransportError};
use crate::models::{ContentFilter, ContentItem, ContentPatch, FailureKind, Platform, PlatformRecord};
use crate::publication::{self, Permalink, PublishReceipt, Transition};
use crate::retry::{FixedDelay, RetryStrategy};
use crate::store::ContentStore;
use crate::telemetry;
use crate::transform;
use crate::transport::{PlatformRegistry, PlatformRoute};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, FutureExt, StreamExt};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Scheduler trait for the periodic publication loop
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run ticks until `stop` is called
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop after the in-flight tick, if any, completes
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Run one tick now
    async fn run_tick(&self) -> Result<TickReport, TickError>;
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Another tick held the flag; nothing was done
    pub skipped: bool,
    pub due_pairs: usize,
    pub published: usize,
    pub failed: usize,
    /// Left untouched for the next tick: open circuit, failed store write,
    /// record claimed elsewhere, or the tick ran past the stuck timeout
    pub deferred: usize,
    /// Delivered or failed, but the outcome could not be written; the record stays `publishing`
    pub unrecorded: usize,
    pub duration_ms: u64,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn tally(&mut self, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Published => self.published += 1,
            PairOutcome::Failed(_) => self.failed += 1,
            PairOutcome::Deferred => self.deferred += 1,
            PairOutcome::Unrecorded => self.unrecorded += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOutcome {
    Published,
    Failed(FailureKind),
    Deferred,
    Unrecorded,
}

pub struct SchedulerEngine {
    config: SchedulerConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<PlatformRegistry>,
    credentials: Arc<dyn CredentialSupplier>,
    guard: TickGuard,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn ContentStore>,
        registry: Arc<PlatformRegistry>,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let guard = TickGuard::new(config.stuck_tick_timeout());

        Self {
            config,
            store,
            registry,
            credentials,
            guard,
            shutdown_tx,
        }
    }

    pub fn guard(&self) -> &TickGuard {
        &self.guard
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run one tick with `now` as the tick clock
    #[instrument(skip(self), fields(now = %now))]
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let started = Instant::now();

        let _permit = match self.guard.try_enter(now) {
            Ok(permit) => permit,
            Err(busy) => {
                info!(since = %busy.since, "Previous tick still running, skipping");
                telemetry::record_tick_skipped();
                return Ok(TickReport::skipped());
            }
        };

        let grace = self.config.grace();
        let filter = ContentFilter::due_by(now + grace).with_limit(self.config.max_items_per_tick);
        let items = self.store.list(&filter).await.map_err(|e| {
            error!(error = %e, "Failed to query due content");
            TickError::from(e)
        })?;

        let pairs: Vec<(Arc<ContentItem>, Platform)> = items
            .into_iter()
            .map(Arc::new)
            .flat_map(|item| {
                item.due_platforms(now, grace)
                    .into_iter()
                    .map(move |platform| (Arc::clone(&item), platform))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut report = TickReport {
            due_pairs: pairs.len(),
            ..TickReport::default()
        };
        telemetry::update_due_pairs(pairs.len());
        if pairs.is_empty() {
            debug!("No due pairs");
        }

        // Past this point a newer tick may have force-cleared the flag
        let deadline = started + Duration::from_secs(self.config.stuck_tick_timeout_seconds);
        let outcomes: Vec<PairOutcome> = stream::iter(pairs)
            .map(|(item, platform)| self.process_pair_isolated(item, platform, now, deadline))
            .buffer_unordered(self.config.max_concurrent_pairs.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            report.tally(outcome);
        }

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        telemetry::record_tick_duration(elapsed.as_secs_f64());

        if report.due_pairs > 0 {
            info!(
                due_pairs = report.due_pairs,
                published = report.published,
                failed = report.failed,
                deferred = report.deferred,
                unrecorded = report.unrecorded,
                duration_ms = report.duration_ms,
                "Tick completed"
            );
        }
        Ok(report)
    }

    /// Run a pair, turning a panic into that pair's outcome
    async fn process_pair_isolated(
        &self,
        item: Arc<ContentItem>,
        platform: Platform,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> PairOutcome {
        let id = item.id;
        if Instant::now() >= deadline {
            debug!(content_id = %id, platform = %platform, "Tick ran past the stuck timeout, leaving pair for the next tick");
            return PairOutcome::Deferred;
        }
        match AssertUnwindSafe(self.process_pair(item, platform, now))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(content_id = %id, platform = %platform, panic = %message, "Pair processing panicked");
                self.interrupt_after_panic(id, platform, &message).await
            }
        }
    }

    #[instrument(skip(self, item), fields(content_id = %item.id, platform = %platform))]
    async fn process_pair(
        &self,
        item: Arc<ContentItem>,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> PairOutcome {
        let Some(record) = item.platforms.get(&platform) else {
            return PairOutcome::Deferred;
        };
        if !publication::can_publish_to_platform(record) {
            return PairOutcome::Deferred;
        }

        let publishing = match publication::apply(
            record,
            Transition::BeginPublishing {
                grace: self.config.grace(),
            },
            now,
        ) {
            Ok(next) => next,
            Err(e) => {
                debug!(error = %e, "Pair not eligible");
                return PairOutcome::Deferred;
            }
        };

        let Some(route) = self.registry.route(platform) else {
            let err = TransportError::NotConfigured(platform);
            return self
                .fail_without_attempt(item.id, platform, record, &publishing, FailureKind::Transport, err.to_string())
                .await;
        };

        let permit = match route.circuit.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                debug!(error = %e, "Circuit open, deferring");
                return PairOutcome::Deferred;
            }
        };

        let payload = match transform::transform_with(&item, &route.profile, now) {
            Ok(payload) => payload,
            Err(e) => {
                return self
                    .fail_without_attempt(item.id, platform, record, &publishing, FailureKind::Content, e.to_string())
                    .await;
            }
        };

        let credential = match self.credential_for(&item, platform, now).await {
            Ok(credential) => credential,
            Err(message) => {
                return self
                    .fail_without_attempt(item.id, platform, record, &publishing, FailureKind::Credential, message)
                    .await;
            }
        };

        // Claim the pair only if nobody moved it since `list`
        let claim = ContentPatch::platform(platform, publishing.clone()).expecting(platform, record);
        match self.store.patch(item.id, &claim).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!("Record changed since it was listed, leaving it to its current owner");
                return PairOutcome::Deferred;
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Failed to mark pair publishing, deferring to next tick");
                return PairOutcome::Deferred;
            }
        }

        let transition = match self.deliver(route, &payload, &credential).await {
            Ok(receipt) => {
                permit.success();
                Transition::Succeed(receipt)
            }
            Err(e) => {
                permit.failure();
                warn!(error = %e, "Delivery failed");
                Transition::Fail {
                    kind: FailureKind::Transport,
                    message: e.to_string(),
                }
            }
        };

        self.record_outcome(item.id, platform, &publishing, transition).await
    }

    async fn credential_for(
        &self,
        item: &ContentItem,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<Credential, String> {
        let principal = Principal::new(item.owner.clone(), platform);
        let credential = self
            .credentials
            .get_credential(&principal)
            .await
            .map_err(|e| e.to_string())?;
        credential
            .ensure_valid(&principal, now, self.config.credential_min_validity())
            .map_err(|e| e.to_string())?;
        Ok(credential)
    }

    /// Transport call bounded by the platform timeout; the permalink must parse
    async fn deliver(
        &self,
        route: &PlatformRoute,
        payload: &transform::PlatformPayload,
        credential: &Credential,
    ) -> Result<PublishReceipt, TransportError> {
        let post = tokio::time::timeout(route.timeout, route.transport.publish(payload, credential))
            .await
            .map_err(|_| TransportError::Timeout(route.timeout))??;

        let permalink = Permalink::parse(&post.permalink)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        Ok(PublishReceipt {
            remote_id: post.remote_id,
            permalink,
        })
    }

    /// Record a failure found before any transport call, in one write
    async fn fail_without_attempt(
        &self,
        id: uuid::Uuid,
        platform: Platform,
        seen: &PlatformRecord,
        publishing: &PlatformRecord,
        kind: FailureKind,
        message: String,
    ) -> PairOutcome {
        warn!(content_id = %id, platform = %platform, kind = kind.as_str(), error = %message, "Pair failed before delivery");
        let failed = match publication::apply(publishing, Transition::Fail { kind, message }, Utc::now()) {
            Ok(failed) => failed,
            Err(e) => {
                error!(error = %e, "Unexpected transition failure");
                return PairOutcome::Deferred;
            }
        };
        let patch = ContentPatch::platform(platform, failed).expecting(platform, seen);
        match self.store.patch(id, &patch).await {
            Ok(()) => {
                telemetry::record_publication_failure(platform, kind);
                PairOutcome::Failed(kind)
            }
            Err(StoreError::Conflict { .. }) => {
                debug!(content_id = %id, platform = %platform, "Record changed since it was listed, failure not recorded");
                PairOutcome::Deferred
            }
            Err(e) => {
                warn!(error = %e, "Failed to record failure, deferring to next tick");
                PairOutcome::Deferred
            }
        }
    }

    /// Persist the outcome of a transport call, retrying briefly
    async fn record_outcome(
        &self,
        id: uuid::Uuid,
        platform: Platform,
        publishing: &PlatformRecord,
        transition: Transition,
    ) -> PairOutcome {
        let outcome_time = Utc::now().max(publishing.last_attempt_at.unwrap_or_default());
        let next = match publication::apply(publishing, transition, outcome_time) {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Unexpected transition failure after delivery");
                return PairOutcome::Unrecorded;
            }
        };

        let outcome = match next.error_kind {
            None => PairOutcome::Published,
            Some(kind) => PairOutcome::Failed(kind),
        };
        let patch = ContentPatch::platform(platform, next);
        let strategy = FixedDelay::new(
            self.config.outcome_write_retry_delay(),
            self.config.outcome_write_retries,
        );

        let mut attempt = 0;
        loop {
            match self.store.patch(id, &patch).await {
                Ok(()) => break,
                Err(e) => match strategy.next_delay(attempt) {
                    Some(delay) => {
                        warn!(error = %e, attempt, "Failed to persist outcome, retrying");
                        attempt += 1;
                        sleep(delay).await;
                    }
                    None => {
                        error!(
                            error = %e,
                            ?outcome,
                            "Outcome could not be persisted; record left publishing for the validator"
                        );
                        return PairOutcome::Unrecorded;
                    }
                },
            }
        }

        match outcome {
            PairOutcome::Published => {
                info!(remote_id = ?patch.platforms.get(&platform).and_then(|r| r.remote_id.as_deref()), "Published");
                telemetry::record_publication_success(platform);
            }
            PairOutcome::Failed(kind) => telemetry::record_publication_failure(platform, kind),
            _ => {}
        }
        outcome
    }

    /// A publishing record whose pair panicked has an unknown outcome
    async fn interrupt_after_panic(&self, id: uuid::Uuid, platform: Platform, message: &str) -> PairOutcome {
        let item = match self.store.get(id).await {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "Could not reload item after panic");
                return PairOutcome::Deferred;
            }
        };
        let Some(record) = item.platforms.get(&platform) else {
            return PairOutcome::Deferred;
        };
        let interrupted = match publication::apply(
            record,
            Transition::Interrupt {
                reason: format!("Processing panicked: {}", message),
            },
            Utc::now(),
        ) {
            Ok(next) => next,
            // Not publishing yet: nothing was sent, leave it for the next tick
            Err(_) => return PairOutcome::Deferred,
        };
        let patch = ContentPatch::platform(platform, interrupted).expecting(platform, record);
        match self.store.patch(id, &patch).await {
            Ok(()) => {
                telemetry::record_publication_failure(platform, FailureKind::Interrupted);
                PairOutcome::Failed(FailureKind::Interrupted)
            }
            Err(e) => {
                warn!(error = %e, "Could not record interrupted pair");
                PairOutcome::Unrecorded
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            early_grace_seconds = self.config.early_grace_seconds,
            platforms = ?self.registry.platforms(),
            max_transport_timeout_seconds = self.registry.max_timeout().as_secs(),
            "Starting scheduler engine"
        );

        let mut tick_interval = interval(self.config.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if let Err(e) = self.run_tick().await {
                        error!(error = %e, "Tick aborted");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping scheduler engine");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    async fn run_tick(&self) -> Result<TickReport, TickError> {
        self.run_tick_at(Utc::now()).await
    }
}
