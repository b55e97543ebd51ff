// Bootstrap utilities for binary initialization
// Wires settings into the store, platform routes, credentials and background services.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::{Settings, StoreBackend};
use crate::credentials::{CredentialSupplier, StaticCredentialSupplier};
use crate::db::DbPool;
use crate::ops::Operations;
use crate::retry::AutoRetryPolicy;
use crate::scheduler::SchedulerEngine;
use crate::store::{ContentStore, InMemoryContentStore, PostgresContentStore};
use crate::transport::{PlatformRegistry, PlatformRoute, WebhookTransport};
use crate::validator::StatusValidator;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize database pool
///
/// # Errors
/// Returns error if database pool initialization fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    db_pool
        .health_check()
        .await
        .context("Database health check failed")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Initialize the content store for the configured backend
///
/// The Postgres backend applies pending migrations before use.
#[tracing::instrument(skip(settings))]
pub async fn init_store(settings: &Settings) -> Result<Arc<dyn ContentStore>> {
    match settings.store.backend {
        StoreBackend::Postgres => {
            let pool = init_database_pool(settings).await?;
            let store = PostgresContentStore::new(pool);
            store
                .migrate()
                .await
                .context("Failed to apply database migrations")?;
            info!("PostgreSQL content store ready");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let store = match &settings.store.seed_path {
                Some(path) => InMemoryContentStore::from_seed_file(path)
                    .await
                    .with_context(|| format!("Failed to seed store from {}", path.display()))?,
                None => InMemoryContentStore::new(),
            };
            warn!("Using in-memory content store; state is lost on restart");
            Ok(Arc::new(store))
        }
    }
}

/// Build a webhook route for every enabled platform
pub fn init_registry(settings: &Settings) -> Result<PlatformRegistry> {
    let circuit = CircuitBreakerConfig::from(&settings.circuit_breaker);
    let mut registry = PlatformRegistry::new();

    for (platform, platform_settings) in settings.enabled_platforms() {
        let transport = WebhookTransport::new(&platform_settings.endpoint, platform_settings.timeout())
            .with_context(|| format!("Failed to create transport for {}", platform))?;
        registry.insert(PlatformRoute::new(
            platform,
            Arc::new(transport),
            platform_settings.timeout(),
            circuit.clone(),
        ));
        info!(
            platform = %platform,
            endpoint = %platform_settings.endpoint,
            timeout_seconds = platform_settings.timeout_seconds,
            "Platform route configured"
        );
    }

    if registry.is_empty() {
        warn!("No platforms enabled; due pairs will fail as not configured");
    }
    Ok(registry)
}

pub fn init_credentials(settings: &Settings) -> Arc<dyn CredentialSupplier> {
    let credentials: HashMap<_, _> = settings
        .credentials
        .iter()
        .map(|(platform, credential)| (*platform, credential.clone()))
        .collect();
    info!(count = credentials.len(), "Static credentials loaded");
    Arc::new(StaticCredentialSupplier::new(credentials))
}

/// Everything the scheduler binary runs
pub struct Services {
    pub engine: Arc<SchedulerEngine>,
    pub validator: Arc<StatusValidator>,
    pub operations: Operations,
}

/// Assemble the engine, validator and ops facade over one store
pub fn init_services(
    settings: &Settings,
    store: Arc<dyn ContentStore>,
    registry: PlatformRegistry,
    credentials: Arc<dyn CredentialSupplier>,
) -> Services {
    let engine = Arc::new(SchedulerEngine::new(
        settings.scheduler.clone(),
        Arc::clone(&store),
        Arc::new(registry),
        credentials,
    ));
    let validator = Arc::new(StatusValidator::new(
        store,
        settings.validator.clone(),
        AutoRetryPolicy::new(settings.retry.backoff()),
    ));
    let operations = Operations::new(Arc::clone(&engine), Arc::clone(&validator));

    Services {
        engine,
        validator,
        operations,
    }
}
