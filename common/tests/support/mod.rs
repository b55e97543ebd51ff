// Shared fakes for the scheduler and validator tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::circuit_breaker::CircuitBreakerConfig;
use common::config::SchedulerConfig;
use common::credentials::{Credential, StaticCredentialSupplier};
use common::errors::{StoreError, TransportError};
use common::models::{ContentFilter, ContentItem, ContentPatch, Platform, PlatformRecord, PublicationStatus};
use common::scheduler::SchedulerEngine;
use common::store::{ContentStore, InMemoryContentStore};
use common::transform::PlatformPayload;
use common::transport::{PlatformRegistry, PlatformRoute, PlatformTransport, RemotePost};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// What a fake platform does with each publish call
pub enum Behavior {
    Succeed,
    /// Succeed after the given delay
    Delay(Duration),
    Hang,
    Panic,
    Reject,
    /// Signal `entered`, then wait for `release`
    Block { entered: Arc<Notify>, release: Arc<Notify> },
}

pub struct ScriptedTransport {
    pub behavior: Behavior,
    pub calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformTransport for ScriptedTransport {
    async fn publish(
        &self,
        payload: &PlatformPayload,
        _credential: &Credential,
    ) -> Result<RemotePost, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Delay(delay) => tokio::time::sleep(*delay).await,
            Behavior::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
            Behavior::Panic => panic!("transport exploded"),
            Behavior::Reject => {
                return Err(TransportError::Rejected {
                    status: 400,
                    message: "bad request".to_string(),
                })
            }
            Behavior::Block { entered, release } => {
                entered.notify_one();
                release.notified().await;
            }
        }
        Ok(RemotePost {
            remote_id: n.to_string(),
            permalink: format!("https://{}.example.com/posts/{}", payload.platform, payload.content_id),
        })
    }
}

/// Wraps the memory store and fails chosen `patch` calls
pub struct FlakyStore {
    pub inner: InMemoryContentStore,
    patches: AtomicUsize,
    /// Zero-based patch call indexes that fail
    failing: Vec<usize>,
    /// Every patch from this index on fails
    fail_from: Option<usize>,
}

impl FlakyStore {
    pub fn failing_patches(items: Vec<ContentItem>, failing: Vec<usize>) -> Self {
        Self {
            inner: InMemoryContentStore::with_items(items),
            patches: AtomicUsize::new(0),
            failing,
            fail_from: None,
        }
    }

    pub fn failing_from(items: Vec<ContentItem>, from: usize) -> Self {
        Self {
            inner: InMemoryContentStore::with_items(items),
            patches: AtomicUsize::new(0),
            failing: Vec::new(),
            fail_from: Some(from),
        }
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        self.inner.list(filter).await
    }

    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError> {
        let index = self.patches.fetch_add(1, Ordering::SeqCst);
        let fails = self.failing.contains(&index) || self.fail_from.map(|from| index >= from).unwrap_or(false);
        if fails {
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        self.inner.patch(id, patch).await
    }
}

/// Drops the first item of the first page, the way a store skips a row it cannot decode
pub struct SkippingStore {
    pub inner: InMemoryContentStore,
    skipped: AtomicBool,
}

impl SkippingStore {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            inner: InMemoryContentStore::with_items(items),
            skipped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ContentStore for SkippingStore {
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        let mut page = self.inner.list(filter).await?;
        if !page.is_empty() && !self.skipped.swap(true, Ordering::SeqCst) {
            page.remove(0);
        }
        Ok(page)
    }

    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError> {
        self.inner.patch(id, patch).await
    }
}

/// Serves `list` from a frozen snapshot while `get` and `patch` hit the live store
pub struct SnapshotListStore {
    pub live: InMemoryContentStore,
    snapshot: InMemoryContentStore,
}

impl SnapshotListStore {
    pub fn new(snapshot: Vec<ContentItem>, live: Vec<ContentItem>) -> Self {
        Self {
            live: InMemoryContentStore::with_items(live),
            snapshot: InMemoryContentStore::with_items(snapshot),
        }
    }
}

#[async_trait]
impl ContentStore for SnapshotListStore {
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError> {
        self.live.get(id).await
    }

    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        self.snapshot.list(filter).await
    }

    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError> {
        self.live.patch(id, patch).await
    }
}

pub fn scheduled(at: DateTime<Utc>) -> PlatformRecord {
    PlatformRecord {
        status: PublicationStatus::Scheduled,
        scheduled_at: Some(at),
        ..PlatformRecord::default()
    }
}

pub fn credentials() -> Arc<StaticCredentialSupplier> {
    let credentials: HashMap<Platform, Credential> = Platform::ALL
        .into_iter()
        .map(|platform| {
            (
                platform,
                Credential {
                    token: format!("{}-token", platform),
                    expires_at: None,
                },
            )
        })
        .collect();
    Arc::new(StaticCredentialSupplier::new(credentials))
}

pub fn route(platform: Platform, transport: Arc<ScriptedTransport>, timeout: Duration) -> PlatformRoute {
    PlatformRoute::new(platform, transport, timeout, CircuitBreakerConfig::default())
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        outcome_write_retries: 2,
        outcome_write_retry_delay_ms: 1,
        ..SchedulerConfig::default()
    }
}

pub fn engine(
    config: SchedulerConfig,
    store: Arc<dyn ContentStore>,
    routes: Vec<PlatformRoute>,
) -> SchedulerEngine {
    let registry = routes
        .into_iter()
        .fold(PlatformRegistry::new(), |registry, route| registry.with_route(route));
    SchedulerEngine::new(config, store, Arc::new(registry), credentials())
}
