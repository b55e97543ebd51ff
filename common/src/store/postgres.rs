// PostgreSQL content store
// Platform records live in one JSONB object per item, keyed by platform name.

use super::ContentStore;
use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{
    ContentFilter, ContentItem, ContentPatch, ContentStatus, MediaRef, Platform, PlatformRecord,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "id, owner, title, body, media, platforms, status, created_at, updated_at";

/// Content store backed by the `content_items` table
#[derive(Debug, Clone)]
pub struct PostgresContentStore {
    pool: DbPool,
}

impl PostgresContentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../migrations")
            .run(self.pool.pool())
            .await
            .map_err(|e| StoreError::Transient(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    fn row_to_item(row: &PgRow) -> Result<ContentItem, StoreError> {
        let id: Uuid = row.try_get("id")?;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let media_json: serde_json::Value = row.try_get("media")?;
        let media: Vec<MediaRef> = serde_json::from_value(media_json)
            .map_err(|e| corrupt(format!("Invalid media: {}", e)))?;

        let platforms_json: serde_json::Value = row.try_get("platforms")?;
        let platforms = parse_platforms(id, platforms_json)?;

        let status: String = row.try_get("status")?;
        let status = status.parse::<ContentStatus>().map_err(corrupt)?;

        Ok(ContentItem {
            id,
            owner: row.try_get("owner")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            media,
            platforms,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Decode the platforms object; unknown platform keys are skipped
fn parse_platforms(
    id: Uuid,
    value: serde_json::Value,
) -> Result<BTreeMap<Platform, PlatformRecord>, StoreError> {
    let serde_json::Value::Object(entries) = value else {
        return Err(StoreError::Corrupt {
            id,
            reason: "platforms is not an object".to_string(),
        });
    };

    let mut platforms = BTreeMap::new();
    for (key, raw) in entries {
        let Ok(platform) = key.parse::<Platform>() else {
            warn!(content_id = %id, platform = %key, "Skipping unknown platform record");
            continue;
        };
        let record: PlatformRecord = serde_json::from_value(raw).map_err(|e| {
            StoreError::Corrupt {
                id,
                reason: format!("Invalid {} record: {}", platform, e),
            }
        })?;
        platforms.insert(platform, record);
    }
    Ok(platforms)
}

#[async_trait]
impl ContentStore for PostgresContentStore {
    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<ContentItem, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::row_to_item(&row)
    }

    /// Items are ordered by id. Corrupt rows are skipped, and the scan continues
    /// past them so a short page still means the end of the table.
    #[instrument(skip(self))]
    async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        let limit = filter.limit.map(|l| l as i64);
        let mut cursor = filter.after;
        let mut items = Vec::new();

        loop {
            let want = limit.map(|l| l - items.len() as i64);
            let rows = sqlx::query(&format!(
                r#"
                SELECT {}
                FROM content_items
                WHERE ($1::uuid IS NULL OR id > $1)
                  AND (NOT $2 OR platforms <> '{{}}'::jsonb)
                  AND ($3::timestamptz IS NULL OR EXISTS (
                        SELECT 1 FROM jsonb_each(platforms) AS p(key, record)
                        WHERE p.record->>'status' = 'scheduled'
                          AND p.record ? 'scheduled_at'
                          AND (p.record->>'scheduled_at')::timestamptz <= $3
                      ))
                ORDER BY id
                LIMIT $4
                "#,
                SELECT_COLUMNS
            ))
            .bind(cursor)
            .bind(filter.with_platforms)
            .bind(filter.due_by)
            .bind(want)
            .fetch_all(self.pool.pool())
            .await?;

            let mut skipped = 0;
            for row in &rows {
                match Self::row_to_item(row) {
                    Ok(item) => items.push(item),
                    Err(StoreError::Corrupt { id, reason }) => {
                        warn!(content_id = %id, reason = %reason, "Skipping corrupt content item");
                        skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            let page_was_full = want.is_some_and(|w| rows.len() as i64 == w);
            if skipped == 0 || !page_was_full {
                break;
            }
            cursor = match rows.last() {
                Some(row) => Some(row.try_get("id")?),
                None => break,
            };
        }

        debug!(count = items.len(), "Listed content items");
        Ok(items)
    }

    #[instrument(skip(self, patch))]
    async fn patch(&self, id: Uuid, patch: &ContentPatch) -> Result<(), StoreError> {
        let platforms = serde_json::to_value(&patch.platforms).map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("Failed to serialize platform records: {}", e),
        })?;
        let expected = serde_json::to_value(&patch.expected).map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("Failed to serialize record expectations: {}", e),
        })?;

        // Merge and expectation check happen in one statement
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET platforms = platforms || $2::jsonb,
                status = COALESCE($3, status),
                updated_at = now()
            WHERE id = $1
              AND NOT EXISTS (
                    SELECT 1 FROM jsonb_each($4::jsonb) AS e(key, want)
                    WHERE content_items.platforms->e.key->>'status' IS DISTINCT FROM e.want->>'status'
                       OR COALESCE((content_items.platforms->e.key->>'attempts')::bigint, 0)
                          <> (e.want->>'attempts')::bigint
                  )
            "#,
        )
        .bind(id)
        .bind(platforms)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(expected)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM content_items WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool.pool())
            .await?;
        match patch.expected.keys().next() {
            Some(platform) if exists => Err(StoreError::Conflict {
                id,
                platform: *platform,
            }),
            _ => Err(StoreError::NotFound(id)),
        }
    }
}
