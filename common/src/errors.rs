// Error handling framework
// One thiserror enum per concern; binaries wrap these with anyhow at the edge.

use crate::models::{Platform, PublicationStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Content store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Content item not found: {0}")]
    NotFound(Uuid),

    /// Connection, pool or I/O trouble; the caller retries at the next tick.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Corrupt content item {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    /// A conditional patch found the record changed since it was read.
    #[error("Content item {id} changed on {platform} since it was read")]
    Conflict { id: Uuid, platform: Platform },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Database connection errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Transient(err.to_string())
    }
}

/// Platform content transformation errors
///
/// Both variants are terminal for the attempt: nothing changes until the
/// content is edited.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Nothing left to publish on {0} after transformation")]
    EmptyPayload(Platform),

    #[error("{0} requires at least one media item")]
    MissingRequiredMedia(Platform),
}

/// Transport (delivery) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Transport timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Platform rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Rate limited by platform (retry after {retry_after_seconds:?} seconds)")]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("Platform rejected publication with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid platform response: {0}")]
    InvalidResponse(String),

    #[error("No transport configured for {0}")]
    NotConfigured(Platform),
}

/// Credential supplier errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No credential available for {0}")]
    Missing(String),

    #[error("Credential for {principal} expired or expires too soon (at {expires_at})")]
    Expiring {
        principal: String,
        expires_at: DateTime<Utc>,
    },
}

/// Publication state machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Transition '{transition}' is not allowed from status '{from}'")]
    Invalid {
        from: PublicationStatus,
        transition: &'static str,
    },

    #[error("Record is not due before {earliest}")]
    NotDue { earliest: DateTime<Utc> },

    #[error("Scheduled record has no scheduled_at")]
    MissingScheduledAt,

    #[error("Invalid permalink '{0}'")]
    InvalidPermalink(String),

    #[error("Record satisfies its invariants, nothing to correct")]
    NothingToCorrect,
}

/// Errors that abort a whole scheduler tick
///
/// Per-pair failures never surface here; they are recorded on the pair.
#[derive(Error, Debug)]
pub enum TickError {
    #[error("Failed to query due content: {0}")]
    Query(#[from] StoreError),
}

/// Errors of a forced run-once cycle
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Validation pass failed: {0}")]
    Validation(#[source] StoreError),

    #[error("Scheduler tick failed: {0}")]
    Tick(#[from] TickError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // NotFound is decided by the repository from fetch_optional / rows_affected
        StoreError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_uses_seconds() {
        let err = TransportError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30 seconds"));
    }

    #[test]
    fn test_transform_error_names_platform() {
        let err = TransformError::MissingRequiredMedia(Platform::Instagram);
        assert_eq!(err.to_string(), "instagram requires at least one media item");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = TransitionError::Invalid {
            from: PublicationStatus::Published,
            transition: "begin_publishing",
        };
        assert!(err.to_string().contains("'published'"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transient("pool timed out".into()).is_transient());
        assert!(!StoreError::NotFound(Uuid::new_v4()).is_transient());
    }
}
