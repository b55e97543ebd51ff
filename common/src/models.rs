use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Platforms
// ============================================================================

/// Delivery platform identifier
///
/// A closed set; per-platform behavior hangs off this tag (see
/// `transform::PlatformProfile` and `transport::PlatformRegistry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Vk,
    Instagram,
    Facebook,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Telegram,
        Platform::Vk,
        Platform::Instagram,
        Platform::Facebook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Vk => "vk",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Platform::Telegram),
            "vk" => Ok(Platform::Vk),
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

// ============================================================================
// Per-platform publication records
// ============================================================================

/// Status of one (content, platform) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    #[default]
    Unscheduled,
    Pending,
    Scheduled,
    Publishing,
    Published,
    Failed,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Unscheduled => "unscheduled",
            PublicationStatus::Pending => "pending",
            PublicationStatus::Scheduled => "scheduled",
            PublicationStatus::Publishing => "publishing",
            PublicationStatus::Published => "published",
            PublicationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the last attempt failed; drives automatic retry eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transformation rejected the content (empty payload, missing media)
    Content,
    /// Credential missing or about to expire
    Credential,
    /// Network, auth, rate-limit or platform rejection
    Transport,
    /// Attempt started but its outcome was never recorded
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Content => "content",
            FailureKind::Credential => "credential",
            FailureKind::Transport => "transport",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

/// Delivery state of one content item on one platform
///
/// Mirrors the persisted JSON, so it can represent states that break the
/// invariants (e.g. `published` without a permalink). Code paths change it
/// through `publication::apply` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
    #[serde(default)]
    pub status: PublicationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_reason: Option<String>,
}

impl PlatformRecord {
    /// Fresh record that has never been scheduled
    pub fn unscheduled() -> Self {
        Self::default()
    }

    /// Fresh record waiting for a schedule
    pub fn pending() -> Self {
        Self {
            status: PublicationStatus::Pending,
            ..Self::default()
        }
    }

    /// True if the record carries a non-blank permalink
    pub fn has_permalink(&self) -> bool {
        self.permalink
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

// ============================================================================
// Content items
// ============================================================================

/// Kind of an attached media reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Attached media, referenced by URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
        }
    }
}

/// Aggregate status of a content item across all its platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Published => "published",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "scheduled" => Ok(ContentStatus::Scheduled),
            "published" => Ok(ContentStatus::Published),
            other => Err(format!("Unknown content status: {}", other)),
        }
    }
}

/// A piece of content to be delivered to one or more platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    /// Principal on whose behalf delivery happens
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Rich-text body as produced by the authoring editor
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub platforms: BTreeMap<Platform, PlatformRecord>,
    #[serde(default)]
    pub status: ContentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(owner: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            title: None,
            body: body.into(),
            media: Vec::new(),
            platforms: BTreeMap::new(),
            status: ContentStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_platform(mut self, platform: Platform, record: PlatformRecord) -> Self {
        self.platforms.insert(platform, record);
        self
    }

    /// Platforms whose record is due at `now` given the early-attempt tolerance
    pub fn due_platforms(&self, now: DateTime<Utc>, grace: Duration) -> Vec<Platform> {
        self.platforms
            .iter()
            .filter(|(_, record)| crate::publication::is_due(record, now, grace))
            .map(|(platform, _)| *platform)
            .collect()
    }

    /// Merge a patch into this item the same way the stores do
    pub fn apply_patch(&mut self, patch: &ContentPatch) {
        for (platform, record) in &patch.platforms {
            self.platforms.insert(*platform, record.clone());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Store query & update shapes
// ============================================================================

/// Filter for `ContentStore::list`
///
/// Results are ordered by id; `after` is an exclusive keyset cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentFilter {
    /// Only items with at least one `scheduled` record whose `scheduled_at <= due_by`
    pub due_by: Option<DateTime<Utc>>,
    /// Only items that have at least one platform record
    pub with_platforms: bool,
    pub after: Option<Uuid>,
    pub limit: Option<usize>,
}

impl ContentFilter {
    pub fn due_by(cutoff: DateTime<Utc>) -> Self {
        Self {
            due_by: Some(cutoff),
            with_platforms: true,
            ..Self::default()
        }
    }

    pub fn page(after: Option<Uuid>, limit: usize) -> Self {
        Self {
            due_by: None,
            with_platforms: true,
            after,
            limit: Some(limit),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Row-level predicate (ordering, cursor and limit are applied by the store)
    pub fn matches(&self, item: &ContentItem) -> bool {
        if self.with_platforms && item.platforms.is_empty() {
            return false;
        }
        if let Some(after) = self.after {
            if item.id <= after {
                return false;
            }
        }
        if let Some(cutoff) = self.due_by {
            let any_due = item.platforms.values().any(|record| {
                record.status == PublicationStatus::Scheduled
                    && record.scheduled_at.map(|at| at <= cutoff).unwrap_or(false)
            });
            if !any_due {
                return false;
            }
        }
        true
    }
}

/// State a platform record must still be in for a conditional patch to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordExpectation {
    pub status: PublicationStatus,
    pub attempts: u32,
}

impl RecordExpectation {
    pub fn of(record: &PlatformRecord) -> Self {
        Self {
            status: record.status,
            attempts: record.attempts,
        }
    }

    pub fn holds(&self, current: Option<&PlatformRecord>) -> bool {
        current.is_some_and(|record| record.status == self.status && record.attempts == self.attempts)
    }
}

/// Partial update: platform records replace existing ones by key
///
/// With expectations set, the whole patch applies only if every listed
/// record still matches; otherwise the store returns `StoreError::Conflict`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentPatch {
    pub platforms: BTreeMap<Platform, PlatformRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ContentStatus>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub expected: BTreeMap<Platform, RecordExpectation>,
}

impl ContentPatch {
    pub fn platform(platform: Platform, record: PlatformRecord) -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(platform, record);
        Self {
            platforms,
            status: None,
            expected: BTreeMap::new(),
        }
    }

    /// Apply only if the platform record still looks like `seen`
    pub fn expecting(mut self, platform: Platform, seen: &PlatformRecord) -> Self {
        self.expected.insert(platform, RecordExpectation::of(seen));
        self
    }

    /// First platform whose record no longer matches its expectation
    pub fn unmet_expectation(&self, item: &ContentItem) -> Option<Platform> {
        self.expected
            .iter()
            .find(|(platform, expected)| !expected.holds(item.platforms.get(platform)))
            .map(|(platform, _)| *platform)
    }

    pub fn set_platform(&mut self, platform: Platform, record: PlatformRecord) {
        self.platforms.insert(platform, record);
    }

    pub fn set_status(&mut self, status: ContentStatus) {
        self.status = Some(status);
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty() && self.status.is_none()
    }
}
