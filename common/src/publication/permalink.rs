// Validated external references of a created remote post

use crate::errors::TransitionError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "tg"];

/// Resolvable URL of a remote post; the only witness of terminal success
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Permalink(String);

impl Permalink {
    pub fn parse(raw: &str) -> Result<Self, TransitionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TransitionError::InvalidPermalink(raw.to_string()));
        }
        let url =
            Url::parse(trimmed).map_err(|_| TransitionError::InvalidPermalink(raw.to_string()))?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) || (url.scheme() != "tg" && !url.has_host()) {
            return Err(TransitionError::InvalidPermalink(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permalink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permalink {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Permalink::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a successful transport call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub remote_id: String,
    pub permalink: Permalink,
}
