// Credential supplier interface
// Tokens are owned by an external cache; the scheduler only asks for one per attempt.

use crate::errors::CredentialError;
use crate::models::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Owner of the remote account a post is made from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub owner: String,
    pub platform: Platform,
}

impl Principal {
    pub fn new(owner: impl Into<String>, platform: Platform) -> Self {
        Self {
            owner: owner.into(),
            platform,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.platform)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

// Never print the token
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// A credential is usable if it does not expire within `min_validity`
    pub fn ensure_valid(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
        min_validity: Duration,
    ) -> Result<(), CredentialError> {
        if self.token.trim().is_empty() {
            return Err(CredentialError::Missing(principal.to_string()));
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now + min_validity => {
                Err(CredentialError::Expiring {
                    principal: principal.to_string(),
                    expires_at,
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    async fn get_credential(&self, principal: &Principal) -> Result<Credential, CredentialError>;
}

/// Credentials from configuration, one per platform, shared by every owner
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSupplier {
    credentials: HashMap<Platform, Credential>,
}

impl StaticCredentialSupplier {
    pub fn new(credentials: HashMap<Platform, Credential>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialSupplier for StaticCredentialSupplier {
    async fn get_credential(&self, principal: &Principal) -> Result<Credential, CredentialError> {
        self.credentials
            .get(&principal.platform)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(principal.to_string()))
    }
}
