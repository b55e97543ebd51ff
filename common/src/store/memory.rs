// In-memory content store for development and tests

use super::ContentStore;
use crate::errors::StoreError;
use crate::models::{ContentFilter, ContentItem, ContentPatch};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    items: RwLock<BTreeMap<Uuid, ContentItem>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(|item| (item.id, item)).collect()),
        }
    }

    /// Load items from a JSON array file
    #[instrument]
    pub async fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            StoreError::Transient(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        let items: Vec<ContentItem> = serde_json::from_str(&raw).map_err(|e| {
            StoreError::Transient(format!("Invalid seed file {}: {}", path.display(), e))
        })?;
        info!(count = items.len(), path = %path.display(), "Seeded in-memory content store");
        Ok(Self::with_items(items))
    }

    pub async fn insert(&self, item: ContentItem) {
        self.items.write().await.insert(item.id, item);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        let items = self.items.read().await;
        let matching = items.values().filter(|item| filter.matches(item)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(platform) = patch.unmet_expectation(item) {
            return Err(StoreError::Conflict { id, platform });
        }
        item.apply_patch(patch);
        Ok(())
    }
}
