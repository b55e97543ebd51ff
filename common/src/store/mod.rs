// Content store abstraction
// The scheduler and validator only read items and merge per-platform records back.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryContentStore;
pub use postgres::PostgresContentStore;

use crate::errors::StoreError;
use crate::models::{ContentFilter, ContentItem, ContentPatch};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistent content store
///
/// `list` returns items ordered by id; `patch` replaces the given platform
/// records by key and leaves every other record untouched, atomically per item.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError>;

    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError>;

    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError>;
}
